//! Post-download sweeper moving obviously broken images out of the way.
//!
//! Some image hosts answer requests for vanished images with a placeholder instead of an error status, and
//! interrupted transfers from older tools may leave empty files behind. Both kinds are moved to a separate error
//! directory so they can be inspected or fetched again.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::{fs, io};

const IMAGE_EXT: &str = "jpg";

/// Fingerprint of the placeholder served by Flickr for unavailable photos.
pub const FLICKR_PLACEHOLDER: Fingerprint = Fingerprint {
    size: 2051,
    md5: "880a7a58e05d3e83797f27573bb6d35c",
};

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such image directory: `{}`", .0.display())]
    MissingDir(PathBuf),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Size and MD5 digest identifying a known bogus file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub md5: &'static str,
}

impl Fingerprint {
    fn matches(&self, data: &[u8]) -> bool {
        data.len() as u64 == self.size && format!("{:x}", md5::compute(data)) == self.md5
    }
}

/// Why a file has been swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reason {
    Empty,
    Placeholder,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Number of image files inspected.
    pub scanned: u64,
    /// Swept files, with their original path.
    pub moved: Vec<(PathBuf, Reason)>,
}

/// Moves broken images from an image directory to an error directory.
#[derive(Debug, Clone)]
pub struct Sweeper {
    img_dir: PathBuf,
    err_dir: PathBuf,
    placeholder: Fingerprint,
}

impl Sweeper {
    pub fn new(img_dir: PathBuf, err_dir: PathBuf) -> Self {
        Self {
            img_dir,
            err_dir,
            placeholder: FLICKR_PLACEHOLDER,
        }
    }

    #[inline]
    pub fn with_placeholder(self, placeholder: Fingerprint) -> Self {
        Self { placeholder, ..self }
    }

    pub async fn run(&self) -> Result<SweepReport, Error> {
        if !fs::try_exists(&self.img_dir).await? {
            return Err(Error::MissingDir(self.img_dir.clone()));
        }

        fs::create_dir_all(&self.err_dir).await?;

        let mut report = SweepReport::default();
        let mut entries = fs::read_dir(&self.img_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if !entry.file_type().await?.is_file() || !path.extension().is_some_and(|ext| ext == IMAGE_EXT) {
                continue;
            }

            report.scanned += 1;
            tracing::debug!("Processing: {}", report.scanned);

            if let Some(reason) = self.inspect(&path).await? {
                let dest = self.err_dir.join(entry.file_name());

                tracing::info!("Move ({reason:?}): `{}` -> `{}`", path.display(), dest.display());

                fs::rename(&path, &dest).await?;
                report.moved.push((path, reason));
            }
        }

        Ok(report)
    }

    async fn inspect(&self, path: &Path) -> io::Result<Option<Reason>> {
        let size = fs::metadata(path).await?.len();

        if size == 0 {
            return Ok(Some(Reason::Empty));
        }

        if size == self.placeholder.size && self.placeholder.matches(&fs::read(path).await?) {
            return Ok(Some(Reason::Placeholder));
        }

        Ok(None)
    }
}
