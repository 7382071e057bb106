//! Logging interface for the SDK
//!
//! Components that callers construct directly (cache, resolver, REST client)
//! take an `Arc<dyn Logger>`. `TracingLogger` forwards into `tracing` so an
//! application that already installed a subscriber sees SDK output there.

/// Logger trait that can be implemented for custom logging behavior
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Logger that emits `tracing` events under the `duel_sdk` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "duel_sdk", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "duel_sdk", "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "duel_sdk", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "duel_sdk", "{}", message);
    }
}

/// No-op logger that discards all log messages
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
