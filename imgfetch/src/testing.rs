//! Shared helpers for unit tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::fs;
use url::Url;

use crate::download::{Error, Fetch, StatusCode};
use crate::list::Entry;

/// In-memory fetcher writing each URL as the body of its destination file.
#[derive(Debug, Default)]
pub(crate) struct MockFetcher {
    calls: AtomicUsize,
    failing: Vec<Url>,
    panicking: Vec<Url>,
    delay: Duration,
}

impl MockFetcher {
    pub(crate) fn failing(mut self, url: Url) -> Self {
        self.failing.push(url);
        self
    }

    pub(crate) fn panicking(mut self, url: Url) -> Self {
        self.panicking.push(url);
        self
    }

    pub(crate) fn with_delay(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl Fetch for MockFetcher {
    async fn fetch(&self, url: &Url, dest: &Path) -> Result<u64, Error> {
        self.calls.fetch_add(1, Ordering::AcqRel);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.panicking.contains(url) {
            panic!("fetching {url} blew up");
        }

        if self.failing.contains(url) {
            return Err(Error::Status(StatusCode::NOT_FOUND));
        }

        let body = url.as_str().as_bytes();
        fs::write(dest, body).await?;

        Ok(body.len() as u64)
    }
}

/// `n` work-list entries named `0.jpg`, `1.jpg`, ...
pub(crate) fn entries(n: usize) -> Vec<Entry> {
    (0..n).map(entry).collect()
}

pub(crate) fn entry(i: usize) -> Entry {
    Entry {
        name: format!("{i}.jpg"),
        url: format!("http://farm{}.static.flickr.com/{i}.jpg", i % 9 + 1).parse().unwrap(),
    }
}
