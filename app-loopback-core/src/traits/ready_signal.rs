use std::time::Duration;

/// Notification primitive fired by the capture endpoint when a buffer is ready.
///
/// Auto-reset semantics: a successful wait consumes the signal.
pub trait ReadySignal: Send + Sync {
    /// Block for at most `timeout`. Returns `true` if the signal fired.
    fn wait_timeout(&self, timeout: Duration) -> bool;
}
