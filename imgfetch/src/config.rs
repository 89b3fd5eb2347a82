use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TARGET_DIR: &str = "master_images2";
pub const DEFAULT_URL_LIST: &str = "urllist.txt";
pub const DEFAULT_WORKERS: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(16) };
pub const DEFAULT_CAPACITY: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(1024) };
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime configuration of a fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory downloaded files are stored into, created if absent.
    pub target_dir: PathBuf,
    /// Work list to read entries from.
    pub url_list: PathBuf,
    pub workers: NonZeroUsize,
    /// Channel capacity, ie. maximum number of outstanding tasks.
    pub capacity: NonZeroUsize,
    /// Number of leading work-list entries not to enqueue.
    pub skip: usize,
    /// Timeout of a single HTTP request.
    pub request_timeout: Duration,
    /// Grace period for workers to stop once interrupted, after which they are aborted.
    pub join_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_dir: DEFAULT_TARGET_DIR.into(),
            url_list: DEFAULT_URL_LIST.into(),
            workers: DEFAULT_WORKERS,
            capacity: DEFAULT_CAPACITY,
            skip: 0,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }
}
