//! This module provides the pool of workers draining the channel.

use std::future::Future;
use std::num::NonZeroUsize;
use std::ops::AddAssign;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::{self, FutureExt};
use tokio::task::{AbortHandle, JoinError, JoinHandle};

use crate::channel::Channel;
use crate::download::Fetch;
use crate::task::Outcome;

/// Tally of the tasks executed by a worker.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub downloaded: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Bytes written by successful downloads.
    pub bytes: u64,
}

impl Report {
    fn record(&mut self, outcome: &Outcome) {
        match *outcome {
            Outcome::Downloaded { bytes } => {
                self.downloaded += 1;
                self.bytes += bytes;
            }
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Noop => {}
        }
    }

    /// Number of executed download tasks.
    #[inline]
    pub fn executed(&self) -> u64 {
        self.downloaded + self.skipped + self.failed
    }
}

impl AddAssign for Report {
    fn add_assign(&mut self, rhs: Self) {
        self.downloaded += rhs.downloaded;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
        self.bytes += rhs.bytes;
    }
}

/// Handle to stop a whole pool of workers.
///
/// Requesting a shutdown marks the channel as finished, waking up every worker waiting for a task, and sets the
/// shutdown flag of every worker, so that a worker busy executing a task stops right after completing it.
#[derive(Debug, Clone)]
pub struct Shutdown {
    channel: Arc<Channel>,
    flags: Arc<[AtomicBool]>,
}

impl Shutdown {
    fn new(channel: Arc<Channel>, size: usize) -> Self {
        Self {
            channel,
            flags: (0..size).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn request(&self) {
        self.channel.request_stop();

        for flag in self.flags.iter() {
            flag.store(true, Ordering::Release);
        }
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.channel.is_finished()
    }

    #[inline]
    fn is_requested_for(&self, index: usize) -> bool {
        self.flags[index].load(Ordering::Acquire)
    }
}

/// A fixed-size pool of workers, all reading from the same [`Channel`].
///
/// Workers are started once and exit permanently, either when one of them dequeues the terminal task or when a
/// [`Shutdown`] is requested. There is no restart.
#[derive(Debug)]
pub struct Pool {
    workers: Vec<Worker>,
    shutdown: Shutdown,
}

impl Pool {
    /// Start a pool with `size` workers executing tasks taken from `channel` with `fetcher`.
    pub fn start<F: Fetch + 'static>(size: NonZeroUsize, channel: Arc<Channel>, fetcher: Arc<F>) -> Self {
        static WORKER_ID: AtomicUsize = AtomicUsize::new(0);
        let size = size.get();
        let id = WORKER_ID.fetch_add(size, Ordering::Relaxed);

        let shutdown = Shutdown::new(channel, size);

        let workers = (0..size)
            .map(|i| Worker::new(id.wrapping_add(i), i, shutdown.clone(), Arc::clone(&fetcher)))
            .collect();

        Self { workers, shutdown }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Handles to forcibly abort workers which would not stop in time.
    pub fn abort_handles(&self) -> Vec<AbortHandle> {
        self.workers.iter().map(|worker| worker.handle.abort_handle()).collect()
    }

    /// Wait for all workers to exit.
    ///
    /// A worker which panicked or has been aborted is reported as a [`JoinError`], others are unaffected.
    pub async fn join(self) -> Vec<Result<Report, JoinError>> {
        future::join_all(self.workers.into_iter().inspect(|worker| {
            tracing::trace!("Waiting for worker {}...", worker.id);
        }))
        .await
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    handle: JoinHandle<Report>,
}

impl Worker {
    fn new<F: Fetch + 'static>(id: usize, index: usize, shutdown: Shutdown, fetcher: Arc<F>) -> Worker {
        tracing::debug!("Starting worker {id}...");

        Worker {
            id,
            handle: tokio::spawn(async move {
                let mut report = Report::default();

                loop {
                    let Some(task) = shutdown.channel.take().await else {
                        tracing::debug!("Channel finished, shutting down worker {id}.");
                        break;
                    };

                    if task.is_terminal() {
                        tracing::debug!("Terminal task reached worker {id}, stopping all workers...");

                        shutdown.request();
                        break;
                    }

                    tracing::trace!("Executing task on worker {id}...");

                    let outcome = task.execute(&*fetcher).await;
                    report.record(&outcome);

                    if shutdown.is_requested_for(index) {
                        tracing::debug!("Shutdown requested, stopping worker {id}.");
                        break;
                    }
                }

                tracing::debug!("Worker {id} stopped: {report:?}");

                report
            }),
        }
    }
}

impl Future for Worker {
    type Output = Result<Report, JoinError>;

    #[inline]
    fn poll(mut self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Self::Output> {
        self.handle.poll_unpin(cx)
    }
}
