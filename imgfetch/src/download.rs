use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::future::{self, TryFutureExt};
use futures::stream::{Stream, TryStreamExt};
use thiserror::Error;
use tokio::{fs, io};

pub use reqwest::{Client, Response, StatusCode};
use url::Url;

const PART_EXT: &str = "part";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("unexpected HTTP status: {0}")]
    Status(StatusCode),
}

/// Fetch and store collaborator.
///
/// Given a locator and a destination path, an implementor pulls the remote resource and writes it to the local
/// storage. Implementors must not leave anything at `dest` unless the whole body has been stored.
pub trait Fetch: Send + Sync {
    /// Fetch `url` into `dest`, returning the number of bytes written.
    fn fetch(&self, url: &Url, dest: &Path) -> impl Future<Output = Result<u64, Error>> + Send;
}

/// HTTP implementation of [`Fetch`].
///
/// The body is streamed into a sibling `.part` file which is only renamed to its final destination once fully
/// written and synced, so that an interrupted or failed download never publishes a truncated file.
#[derive(Debug, Clone, Default)]
pub struct Downloader {
    client: Client,
}

impl Downloader {
    /// Create a `Downloader` whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).user_agent(USER_AGENT).build()?;

        Ok(Self { client })
    }

    async fn store(&self, url: &Url, path: &Path) -> Result<u64, Error> {
        use io::AsyncWriteExt;

        let resp = self.request(url.clone()).await?;
        let mut stream = std::pin::pin!(body(resp));

        let file = fs::File::create(path).await?;
        let mut writer = io::BufWriter::new(file);
        let mut written = 0;

        while let Some(chunk) = stream.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.shutdown().await?;
        writer.into_inner().sync_all().await?;

        Ok(written)
    }

    /// Send a GET request for `url`, only accepting a successful response.
    fn request(&self, url: Url) -> impl Future<Output = Result<Response, Error>> {
        self.client
            .get(url)
            .send()
            .err_into::<Error>()
            .and_then(|resp| match resp.status() {
                status if status.is_success() => future::ready(Ok(resp)),
                status => future::ready(Err(Error::Status(status))),
            })
    }
}

fn body(resp: Response) -> impl Stream<Item = Result<Bytes, Error>> {
    resp.bytes_stream().err_into::<Error>()
}

impl Fetch for Downloader {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, Error> {
        let part = PartFile::new(dest);

        let written = self.store(url, part.path()).await?;
        fs::rename(part.path(), dest).await?;
        part.keep();

        Ok(written)
    }
}

/// Guard over the temporary file a body is streamed to.
///
/// The file is removed on drop unless it has been published with [`keep`](PartFile::keep), which also covers a
/// fetch future dropped mid-flight when its worker is aborted.
#[derive(Debug)]
struct PartFile {
    path: PathBuf,
    published: bool,
}

impl PartFile {
    fn new(dest: &Path) -> Self {
        Self {
            path: part_path(dest),
            published: false,
        }
    }

    #[inline]
    fn path(&self) -> &Path {
        &self.path
    }

    /// The file has been renamed to its destination, leave it alone.
    fn keep(mut self) {
        self.published = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.published {
            // the file may never have been created
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Temporary path a body is streamed to before being published at `dest`.
fn part_path(dest: &Path) -> PathBuf {
    let mut part = OsString::from(dest.as_os_str());
    part.push(".");
    part.push(PART_EXT);
    part.into()
}
