//! A simple crate fetching large lists of images concurrently.
//!
//! A work list of `(destination, url)` pairs is turned by a single [`Producer`](producer::Producer) into download
//! tasks, handed over through a bounded [`Channel`](channel::Channel) to a fixed-size [`Pool`](worker::Pool) of
//! workers storing each image into a target directory:
//!
//! ```text
//!     work list -> producer -> channel (capacity C) -> N workers -> target directory
//! ```
//!
//! The channel is the only synchronization point between the producer and the workers:
//! - the producer waits while the channel is full, so at most `C` tasks are ever outstanding whatever the list size;
//! - workers wait while the channel is empty;
//! - once the list is exhausted, the producer enqueues a single terminal task. The worker dequeuing it stops the
//!   channel, waking up every other worker waiting on it, and requests every worker to stop.
//!
//! An interrupt follows the same path without waiting for the terminal task: workers complete their in-flight
//! task, queued ones are left behind. See [`Supervisor`](supervisor::Supervisor).
//!
//! Downloads are best effort: a failed download is neither retried nor re-enqueued, it is logged and accounted for
//! in the worker [`Report`](worker::Report). An existing destination file is never fetched again, which makes
//! restarting an interrupted run cheap.

use std::path::PathBuf;

use thiserror::Error;

pub mod channel;
pub mod config;
pub mod download;
pub mod list;
pub mod producer;
pub mod progress;
pub mod supervisor;
pub mod sweep;
pub mod task;
pub mod worker;

#[cfg(test)]
mod testing;

/// Startup and tooling errors, fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no such URL list: `{}`", .0.display())]
    MissingUrlList(PathBuf),
    #[error("cannot create target directory `{}`: {source}", .path.display())]
    TargetDir { path: PathBuf, source: std::io::Error },
    #[error("cannot read URL list: {0}")]
    List(#[from] list::Error),
    #[error("cannot build HTTP client: {0}")]
    Client(#[from] download::Error),
    #[error(transparent)]
    Sweep(#[from] sweep::Error),
}
