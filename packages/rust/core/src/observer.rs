//! Progress and log sink for a running workflow.

use crate::control::RunState;

/// Receives everything a front end needs to render a run.
///
/// Calls arrive from the execution context's tokio task, so implementations
/// must be cheap and must not block.
pub trait WorkflowObserver: Send + Sync {
    /// One chronological, human-readable log line.
    fn log(&self, message: &str);

    /// Short status text plus an optional overall percentage (0–100).
    fn progress(&self, message: &str, percent: Option<f64>);

    /// The run entered a new state.
    fn state_changed(&self, _state: RunState) {}
}

/// No-op observer for headless and test usage.
pub struct SilentObserver;

impl WorkflowObserver for SilentObserver {
    fn log(&self, _message: &str) {}
    fn progress(&self, _message: &str, _percent: Option<f64>) {}
}
