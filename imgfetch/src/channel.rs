//! This module provides the bounded channel shared by the producer and the workers.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::progress::{NoProgress, Progress};
use crate::task::Task;

/// Error returned by [`Channel::put()`] once the channel has been requested to stop.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("channel is finished")]
pub struct Closed;

/// A fixed-capacity FIFO queue of [`Task`]s with blocking put/take semantics.
///
/// # Backpressure
/// [`Channel::put()`] waits while the queue holds `capacity` tasks, bounding the outstanding work regardless of
/// how many tasks the producer eventually enqueues.
///
/// # Stop
/// [`Channel::request_stop()`] marks the channel as finished and wakes every waiter: pending [`Channel::put()`]
/// calls fail with [`Closed`] and [`Channel::take()`] calls waiting on an empty queue return `None`. Tasks that were
/// already queued are not discarded and can still be drained by subsequent takes.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use imgfetch::channel::Channel;
/// # use imgfetch::task::Task;
/// let channel = Channel::new(2.try_into().unwrap());
///
/// channel.put(Task::Terminal).await.unwrap();
/// assert_eq!(channel.len(), 1);
///
/// assert!(channel.take().await.unwrap().is_terminal());
///
/// channel.request_stop();
/// assert!(channel.take().await.is_none());
/// # })
/// ```
pub struct Channel {
    /// Sending half, kept alive for the whole channel lifetime so the receiving half never disconnects.
    sender: mpsc::Sender<Task>,
    /// Receiving half, shared by all workers.
    ///
    /// The lock also serializes progress accounting so that observations are reported in order.
    receiver: Mutex<mpsc::Receiver<Task>>,
    /// The `finished` flag.
    finished: CancellationToken,
    /// Number of dequeued download tasks, only ever increasing.
    processed: AtomicU64,
    /// Informational total of tasks the producer expects to enqueue.
    expected: AtomicU64,
    progress: Arc<dyn Progress>,
}

impl Channel {
    /// Create a channel holding up to `capacity` tasks.
    pub fn new(capacity: NonZeroUsize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.get());

        Self {
            sender,
            receiver: Mutex::new(receiver),
            finished: CancellationToken::new(),
            processed: AtomicU64::new(0),
            expected: AtomicU64::new(0),
            progress: Arc::new(NoProgress),
        }
    }

    /// Build a new `Channel` reporting to the given progress sink.
    #[inline]
    pub fn with_progress(self, progress: Arc<dyn Progress>) -> Self {
        Self { progress, ..self }
    }

    /// Build a new `Channel` whose processed counter starts at `offset`, ie. when resuming a partial run.
    #[inline]
    pub fn with_offset(self, offset: u64) -> Self {
        Self {
            processed: AtomicU64::new(offset),
            ..self
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of tasks currently queued, always within `0..=capacity`.
    #[inline]
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    #[inline]
    pub fn expected(&self) -> u64 {
        self.expected.load(Ordering::Acquire)
    }

    /// Record the total task count the producer expects to enqueue.
    ///
    /// This is purely informational for progress reporting and does not block anything.
    pub fn set_expected_total(&self, expected: u64) {
        self.expected.store(expected, Ordering::Release);
    }

    /// Enqueue `task` at the tail, waiting while the channel is full.
    ///
    /// Fails only once the channel has been requested to stop, in which case `task` is dropped.
    pub async fn put(&self, task: Task) -> Result<(), Closed> {
        tokio::select! {
            biased;
            _ = self.finished.cancelled() => Err(Closed),
            res = self.sender.send(task) => res.map_err(|_| Closed),
        }
    }

    /// Dequeue the task at the head, waiting while the channel is empty.
    ///
    /// Returns `None` without consuming anything if the channel is, or becomes, finished while empty.
    pub async fn take(&self) -> Option<Task> {
        let mut receiver = tokio::select! {
            biased;
            receiver = self.receiver.lock() => receiver,
            _ = self.finished.cancelled() => return None,
        };

        let task = match receiver.try_recv() {
            Ok(task) => task,
            Err(TryRecvError::Disconnected) => return None,
            Err(TryRecvError::Empty) => tokio::select! {
                biased;
                _ = self.finished.cancelled() => return None,
                task = receiver.recv() => task?,
            },
        };

        if !task.is_terminal() {
            let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
            self.progress.report(processed, self.expected());
        }

        Some(task)
    }

    /// Mark the channel as finished and wake all waiters.
    ///
    /// Queued tasks are left in place.
    pub fn request_stop(&self) {
        if !self.finished.is_cancelled() {
            tracing::debug!("Stopping channel with {} queued task(s)...", self.len());
        }

        self.finished.cancel();
    }

    /// Wait for the channel to be requested to stop.
    #[inline]
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.finished.cancelled()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("finished", &self.is_finished())
            .field("processed", &self.processed())
            .field("expected", &self.expected())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use tokio_test::{assert_pending, assert_ready, assert_ready_eq};

    use super::*;
    use crate::task::Download;

    fn download(i: usize) -> Task {
        let url = format!("http://farm{i}.static.flickr.com/{i}.jpg").parse().unwrap();
        Task::Download(Download::new(url, PathBuf::from(format!("{i}.jpg"))))
    }

    fn path_of(task: &Task) -> &std::path::Path {
        match task {
            Task::Download(download) => download.path(),
            Task::Terminal => panic!("unexpected terminal task"),
        }
    }

    #[tokio::test]
    async fn test_fifo() {
        let channel = Channel::new(NonZeroUsize::new(8).unwrap());

        for i in 0..5 {
            channel.put(download(i)).await.unwrap();
        }

        for i in 0..5 {
            let task = channel.take().await.unwrap();
            assert_eq!(path_of(&task), PathBuf::from(format!("{i}.jpg")));
        }

        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_count_bounds() {
        let capacity = 3;
        let channel = Channel::new(NonZeroUsize::new(capacity).unwrap());

        // interleave puts and takes without ever blocking
        let ops = [true, true, false, true, true, false, false, true, false, false];
        let mut expected = 0usize;

        for put in ops {
            if put {
                channel.put(download(expected)).await.unwrap();
                expected += 1;
            } else {
                channel.take().await.unwrap();
                expected -= 1;
            }

            assert_eq!(channel.len(), expected);
            assert!(channel.len() <= capacity);
        }

        assert_eq!(channel.capacity(), capacity);
    }

    #[tokio::test]
    async fn test_backpressure() {
        let channel = Channel::new(NonZeroUsize::new(2).unwrap());

        channel.put(download(0)).await.unwrap();
        channel.put(download(1)).await.unwrap();

        let mut put = tokio_test::task::spawn(channel.put(download(2)));
        assert_pending!(put.poll());
        assert_pending!(put.poll());
        assert_eq!(channel.len(), 2);

        let task = channel.take().await.unwrap();
        assert_eq!(path_of(&task), PathBuf::from("0.jpg"));

        assert!(put.is_woken());
        assert_ready_eq!(put.poll(), Ok(()));
        drop(put);

        assert_eq!(channel.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_unblocks_put() {
        let channel = Channel::new(NonZeroUsize::new(1).unwrap());
        channel.put(download(0)).await.unwrap();

        let mut put = tokio_test::task::spawn(channel.put(download(1)));
        assert_pending!(put.poll());

        channel.request_stop();

        assert!(put.is_woken());
        assert_ready_eq!(put.poll(), Err(Closed));
        drop(put);

        // queued task is kept
        assert_eq!(channel.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_unblocks_takers() {
        let channel = Arc::new(Channel::new(NonZeroUsize::new(4).unwrap()));

        let takers: Vec<_> = (0..3)
            .map(|_| {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { channel.take().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.request_stop();

        for taker in takers {
            let task = tokio::time::timeout(Duration::from_secs(1), taker).await.unwrap().unwrap();
            assert!(task.is_none());
        }

        assert!(channel.is_finished());
        assert_eq!(channel.processed(), 0);
    }

    #[tokio::test]
    async fn test_drain_after_stop() {
        let channel = Channel::new(NonZeroUsize::new(4).unwrap());

        channel.put(download(0)).await.unwrap();
        channel.put(download(1)).await.unwrap();
        channel.request_stop();

        assert_eq!(channel.put(download(2)).await, Err(Closed));

        assert!(channel.take().await.is_some());
        assert!(channel.take().await.is_some());
        assert!(channel.take().await.is_none());
    }

    #[tokio::test]
    async fn test_take_pending_while_empty() {
        let channel = Channel::new(NonZeroUsize::new(1).unwrap());

        let mut take = tokio_test::task::spawn(channel.take());
        assert_pending!(take.poll());

        channel.put(Task::Terminal).await.unwrap();

        assert!(take.is_woken());
        let task = assert_ready!(take.poll());
        assert!(task.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_progress() {
        let observed = Arc::new(StdMutex::new(vec![]));

        let sink = {
            let observed = Arc::clone(&observed);
            move |processed: u64, expected: u64| observed.lock().unwrap().push((processed, expected))
        };

        let channel = Channel::new(NonZeroUsize::new(8).unwrap())
            .with_progress(Arc::new(sink))
            .with_offset(2);
        channel.set_expected_total(5);

        for i in 2..5 {
            channel.put(download(i)).await.unwrap();
        }
        channel.put(Task::Terminal).await.unwrap();

        while !channel.is_empty() {
            channel.take().await.unwrap();
        }

        // the terminal task is not accounted for
        assert_eq!(*observed.lock().unwrap(), [(3, 5), (4, 5), (5, 5)]);
        assert_eq!(channel.processed(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_progress_monotonic_under_contention() {
        let observed = Arc::new(StdMutex::new(vec![]));

        let sink = {
            let observed = Arc::clone(&observed);
            move |processed: u64, _: u64| observed.lock().unwrap().push(processed)
        };

        let total = 200;
        let channel = Arc::new(Channel::new(NonZeroUsize::new(4).unwrap()).with_progress(Arc::new(sink)));
        channel.set_expected_total(total as u64);

        let takers: Vec<_> = (0..4)
            .map(|_| {
                let channel = Arc::clone(&channel);
                tokio::spawn(async move { while channel.take().await.is_some() {} })
            })
            .collect();

        for i in 0..total {
            channel.put(download(i)).await.unwrap();
        }

        while !channel.is_empty() {
            tokio::task::yield_now().await;
        }
        // let the last taker report
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.request_stop();

        for taker in takers {
            taker.await.unwrap();
        }

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), total);
        assert!(observed.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(observed.last().copied(), Some(total as u64));
    }
}
