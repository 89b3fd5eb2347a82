use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::Channel;
use crate::list::Entry;
use crate::task::{Download, Task};

/// Outcome of a producer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    /// Number of download tasks handed over to the channel.
    pub enqueued: u64,
    /// Wall-clock time of the whole enqueue pass, not of the downloads themselves.
    pub elapsed: Duration,
    /// Whether the pass went through the whole list and enqueued the terminal task.
    pub completed: bool,
}

/// Single pass over a work list, feeding the channel with one download task per entry.
///
/// Enqueuing blocks while the channel is full, so at most `capacity` tasks are ever outstanding whatever the list
/// size. The terminal task is enqueued exactly once, as the last action of a complete pass. A pass stops early,
/// without any terminal task, as soon as the channel is requested to stop.
#[derive(Debug)]
pub struct Producer {
    channel: Arc<Channel>,
    target_dir: PathBuf,
    entries: Vec<Entry>,
    skip: usize,
}

impl Producer {
    pub fn new(channel: Arc<Channel>, target_dir: PathBuf, entries: Vec<Entry>) -> Self {
        Self {
            channel,
            target_dir,
            entries,
            skip: 0,
        }
    }

    /// Build a new `Producer` not enqueuing the first `skip` entries.
    #[inline]
    pub fn skip(self, skip: usize) -> Self {
        Self { skip, ..self }
    }

    pub async fn run(self) -> ProducerReport {
        let Self {
            channel,
            target_dir,
            entries,
            skip,
        } = self;

        let start = Instant::now();
        let total = entries.len();

        channel.set_expected_total(total as u64);
        tracing::info!("URL lines: {total}");

        let mut enqueued = 0;
        let mut completed = true;

        for entry in entries.into_iter().skip(skip) {
            let task = Task::Download(Download::new(entry.url, target_dir.join(entry.name)));

            if channel.put(task).await.is_err() {
                completed = false;
                break;
            }

            enqueued += 1;
        }

        if completed {
            completed = channel.put(Task::Terminal).await.is_ok();
        }

        if !completed {
            tracing::info!(
                "Channel stopped after {enqueued} of {} task(s) enqueued",
                total.saturating_sub(skip)
            );
        }

        let elapsed = start.elapsed();
        tracing::info!("Elapsed time: {elapsed:?}");

        ProducerReport {
            enqueued,
            elapsed,
            completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;
    use crate::testing;

    fn channel(capacity: usize) -> Arc<Channel> {
        Arc::new(Channel::new(NonZeroUsize::new(capacity).unwrap()))
    }

    async fn drain(channel: &Channel) -> Vec<Task> {
        let mut tasks = vec![];

        loop {
            let task = channel.take().await.unwrap();
            let terminal = task.is_terminal();
            tasks.push(task);

            if terminal {
                break tasks;
            }
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_run() {
        let channel = channel(2);
        let producer = Producer::new(Arc::clone(&channel), PathBuf::from("imgs"), testing::entries(5));

        let (report, tasks) = tokio::join!(producer.run(), drain(&channel));

        assert_eq!(report.enqueued, 5);
        assert!(report.completed);
        assert_eq!(channel.expected(), 5);

        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks.iter().filter(|task| task.is_terminal()).count(), 1);
        assert!(tasks[5].is_terminal());

        for (i, task) in tasks[..5].iter().enumerate() {
            let entry = testing::entry(i);
            assert_eq!(
                *task,
                Task::Download(Download::new(entry.url, PathBuf::from("imgs").join(entry.name)))
            );
        }

        assert!(channel.is_empty());
        assert!(logs_contain("Elapsed time"));
    }

    #[tokio::test]
    async fn test_skip() {
        let channel = channel(8);
        let producer = Producer::new(Arc::clone(&channel), PathBuf::from("imgs"), testing::entries(5)).skip(3);

        let report = producer.run().await;

        assert_eq!(report.enqueued, 2);
        assert_eq!(channel.expected(), 5);

        let tasks = drain(&channel).await;
        assert_eq!(tasks.len(), 3);
        assert!(matches!(&tasks[0], Task::Download(download) if download.path().ends_with("3.jpg")));
    }

    #[tokio::test]
    async fn test_stop_while_blocked() {
        let channel = channel(1);
        let producer = Producer::new(Arc::clone(&channel), PathBuf::from("imgs"), testing::entries(5));

        let stop = async {
            while channel.len() < channel.capacity() {
                tokio::task::yield_now().await;
            }
            channel.request_stop();
        };

        let (report, ()) = tokio::join!(producer.run(), stop);

        assert_eq!(report.enqueued, 1);
        assert!(!report.completed);

        // no terminal task has been enqueued
        assert!(!channel.take().await.unwrap().is_terminal());
        assert!(channel.take().await.is_none());
    }
}
