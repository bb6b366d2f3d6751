/// Listener for operator-facing progress. Every method defaults to a no-op so
/// implementors only override what they display.
pub trait Reporter: Send + Sync {
    fn message(&self, _message: &str) {}

    /// Called during downloads with bytes copied so far and the total.
    fn progress(&self, _transferred: u64, _total: u64) {}
}

pub struct NoopReporter;

impl Reporter for NoopReporter {}
