//! Operator-facing progress reporting.

/// A sink receiving `(processed, expected)` observations after every dequeued download task.
///
/// Observations never affect control flow. They are emitted while the channel's receiving side is locked, so an
/// implementor must return quickly and must not call back into the channel.
pub trait Progress: Send + Sync {
    fn report(&self, processed: u64, expected: u64);
}

impl<F> Progress for F
where
    F: Fn(u64, u64) + Send + Sync,
{
    #[inline]
    fn report(&self, processed: u64, expected: u64) {
        self(processed, expected)
    }
}

/// Default sink, logging every observation at `info` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn report(&self, processed: u64, expected: u64) {
        tracing::info!("Processing: {processed} / {expected}");
    }
}

/// Sink discarding every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    #[inline]
    fn report(&self, _: u64, _: u64) {}
}
