//! This module wires the producer and the worker pool together and drives a whole fetch run.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::AbortHandle;

use crate::channel::Channel;
use crate::config::Config;
use crate::download::Fetch;
use crate::list::{self, Entry};
use crate::producer::Producer;
use crate::progress::{LogProgress, Progress};
use crate::worker::{Pool, Report};
use crate::Error;

/// State of a fetch run.
///
/// `Idle → Running → Draining → Stopped`, there is no way back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Workers are polling the channel while the producer is enqueuing.
    Running,
    /// The terminal task has been dequeued or an interrupt has been received.
    Draining,
    /// Every worker has exited.
    Stopped,
}

/// Summary of a fetch run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    /// Download tasks enqueued by the producer.
    pub enqueued: u64,
    /// Duration of the producer pass.
    pub enqueue_elapsed: Duration,
    /// Whether the producer went through the whole work list.
    pub producer_completed: bool,
    /// Aggregated tally of all workers which exited normally.
    pub report: Report,
    /// Final value of the channel processed counter.
    pub processed: u64,
    /// Whether the channel had been stopped by the time every worker exited.
    pub finished: bool,
    /// Workers which panicked while executing a task.
    pub crashed_workers: usize,
    /// Workers aborted for not stopping in time after an interrupt.
    pub aborted_workers: usize,
    pub interrupted: bool,
}

/// Read the work list and prepare the target directory.
///
/// Any failure here is fatal and must happen before any worker starts.
pub async fn prepare(config: &Config) -> Result<Vec<Entry>, Error> {
    let target_dir = &config.target_dir;

    if !tokio::fs::try_exists(target_dir).await.unwrap_or(false) {
        tracing::info!("Create dir: `{}`", target_dir.display());
    }

    // also fails on an existing path which is not a directory
    tokio::fs::create_dir_all(target_dir).await.map_err(|source| Error::TargetDir {
        path: target_dir.clone(),
        source,
    })?;

    if !tokio::fs::try_exists(&config.url_list).await.unwrap_or(false) {
        return Err(Error::MissingUrlList(config.url_list.clone()));
    }

    Ok(list::read(&config.url_list).await?)
}

/// Fetch run driver.
///
/// It creates the channel and the worker pool, starts the workers, then runs the producer and waits for the pool
/// to drain. An interrupt requests every worker to stop: in-flight tasks complete, queued ones are left behind,
/// and workers still busy after the configured join timeout are aborted.
pub struct Supervisor<F> {
    config: Config,
    fetcher: Arc<F>,
    progress: Arc<dyn Progress>,
    state: watch::Sender<State>,
}

impl<F: Fetch + 'static> Supervisor<F> {
    pub fn new(config: Config, fetcher: F) -> Self {
        Self {
            config,
            fetcher: Arc::new(fetcher),
            progress: Arc::new(LogProgress),
            state: watch::Sender::new(State::Idle),
        }
    }

    /// Build a new `Supervisor` reporting progress to the given sink.
    #[inline]
    pub fn with_progress(self, progress: Arc<dyn Progress>) -> Self {
        Self { progress, ..self }
    }

    #[inline]
    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    #[inline]
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Run the producer over `entries` until every worker has exited, or `interrupt` resolves.
    pub async fn run(self, entries: Vec<Entry>, interrupt: impl Future<Output = ()>) -> Summary {
        let channel = Arc::new(
            Channel::new(self.config.capacity)
                .with_progress(Arc::clone(&self.progress))
                .with_offset(self.config.skip as u64),
        );

        let pool = Pool::start(self.config.workers, Arc::clone(&channel), Arc::clone(&self.fetcher));
        let shutdown = pool.shutdown();
        let mut abort_handles = pool.abort_handles();

        let producer = Producer::new(Arc::clone(&channel), self.config.target_dir.clone(), entries).skip(self.config.skip);
        let producer = tokio::spawn(producer.run());
        abort_handles.push(producer.abort_handle());

        self.set_state(State::Running);

        let all = async {
            let workers = pool.join().await;
            let finished = channel.is_finished();

            // nobody is left to drain the channel, ie. when every worker crashed
            channel.request_stop();

            (producer.await, workers, finished)
        };

        tokio::pin!(all);
        tokio::pin!(interrupt);

        let mut interrupted = false;
        let mut aborted = false;

        let (producer, workers, finished) = loop {
            tokio::select! {
                biased;
                () = channel.stopped(), if self.state() == State::Running => self.set_state(State::Draining),
                () = &mut interrupt, if !interrupted => {
                    tracing::info!("Caught interrupt, stopping all workers...");

                    interrupted = true;
                    shutdown.request();
                    self.set_state(State::Draining);

                    match tokio::time::timeout(self.config.join_timeout, &mut all).await {
                        Ok(outcome) => break outcome,
                        Err(_) => {
                            tracing::warn!("Workers did not stop within {:?}, aborting them", self.config.join_timeout);

                            abort_handles.iter().for_each(AbortHandle::abort);
                            aborted = true;

                            break all.await;
                        }
                    }
                }
                outcome = &mut all => break outcome,
            }
        };

        let mut summary = Summary {
            finished,
            interrupted,
            ..Default::default()
        };

        match producer {
            Ok(report) => {
                summary.enqueued = report.enqueued;
                summary.enqueue_elapsed = report.elapsed;
                summary.producer_completed = report.completed;
            }
            Err(err) => tracing::warn!("Producer did not complete: {err}"),
        }

        for worker in workers {
            match worker {
                Ok(report) => summary.report += report,
                Err(err) if aborted && err.is_cancelled() => summary.aborted_workers += 1,
                Err(err) => {
                    tracing::error!("Worker crashed: {err}");

                    summary.crashed_workers += 1;
                }
            }
        }

        summary.processed = channel.processed();

        self.set_state(State::Stopped);

        tracing::info!(
            "Done: {} downloaded, {} skipped, {} failed ({} bytes)",
            summary.report.downloaded,
            summary.report.skipped,
            summary.report.failed,
            summary.report.bytes,
        );

        summary
    }

    fn set_state(&self, state: State) {
        let previous = self.state.send_replace(state);

        if previous != state {
            tracing::debug!("State: {previous:?} -> {state:?}");
        }
    }
}
