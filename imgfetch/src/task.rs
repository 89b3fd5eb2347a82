//! Units of work handed over from the producer to the workers.

use std::path::{Path, PathBuf};

use tokio::fs;
use url::Url;

use crate::download::{self, Fetch};

/// A unit of work queued for execution by a worker.
///
/// Only downloads carry a payload. The terminal variant is the sentinel enqueued once by the producer as its very
/// last action: whichever worker dequeues it stops the whole pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Download(Download),
    Terminal,
}

impl Task {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Task::Terminal)
    }

    /// Execute the task, consuming it.
    ///
    /// Never fails: any error is caught at the task boundary and reported through the returned [`Outcome`].
    pub async fn execute<F: Fetch>(self, fetcher: &F) -> Outcome {
        match self {
            Task::Download(download) => download.execute(fetcher).await,
            Task::Terminal => Outcome::Noop,
        }
    }
}

/// Fetch one resource and persist it at a given path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    url: Url,
    path: PathBuf,
}

impl Download {
    pub fn new(url: Url, path: PathBuf) -> Self {
        Self { url, path }
    }

    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Download to the destination path unless it already exists.
    ///
    /// There is no retry: a failed download is logged and reported as done.
    pub async fn execute<F: Fetch>(self, fetcher: &F) -> Outcome {
        match fs::try_exists(&self.path).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!("Skip `{}`", self.path.display());

                return Outcome::Skipped;
            }
            Err(err) => {
                tracing::warn!("Cannot access `{}`: {err}", self.path.display());

                return Outcome::Failed(err.into());
            }
        }

        tracing::debug!("Processing `{}`", self.path.display());

        match fetcher.fetch(&self.url, &self.path).await {
            Ok(bytes) => Outcome::Downloaded { bytes },
            Err(err) => {
                tracing::warn!("Failed to download {} to `{}`: {err}", self.url, self.path.display());

                Outcome::Failed(err)
            }
        }
    }
}

/// Status of an executed task.
#[derive(Debug)]
pub enum Outcome {
    Downloaded { bytes: u64 },
    /// The destination already existed, nothing has been fetched.
    Skipped,
    Failed(download::Error),
    /// Nothing to do, ie. for the terminal task.
    Noop,
}

impl Outcome {
    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }
}
