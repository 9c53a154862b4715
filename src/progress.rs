//! Progress reporting capability.
//!
//! The loaders and the locator emit a linear sequence of human-readable
//! status strings through a caller-supplied sink, invoked synchronously.
//! This is a side channel for the embedding tool's UI, not a control input.

use tracing::info;

/// A sink for human-readable progress strings.
pub trait ProgressSink {
    fn report(&mut self, message: &str);
}

impl<F: FnMut(&str)> ProgressSink for F {
    fn report(&mut self, message: &str) {
        self(message)
    }
}

/// Discards every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report(&mut self, _message: &str) {}
}

/// Forwards every message to `tracing::info!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report(&mut self, message: &str) {
        info!("{}", message);
    }
}
