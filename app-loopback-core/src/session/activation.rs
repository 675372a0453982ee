use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use crate::models::config::{CaptureConfiguration, LoopbackMode};
use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::traits::loopback_backend::LoopbackBackend;
use crate::traits::ready_signal::ReadySignal;

/// Parameters of a process loopback activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationRequest {
    pub process_id: u32,
    pub mode: LoopbackMode,
    /// Shared-mode buffer requested for the capture endpoint.
    pub buffer_duration: Duration,
}

impl ActivationRequest {
    pub fn from_config(config: &CaptureConfiguration) -> Self {
        Self {
            process_id: config.process_id,
            mode: config.loopback_mode,
            buffer_duration: config.capture_buffer_duration,
        }
    }
}

/// An initialized capture endpoint plus the signal it fires when a buffer
/// is ready.
pub struct ActivatedCapture<E> {
    pub format: CaptureFormat,
    pub endpoint: E,
    pub ready_signal: Arc<dyn ReadySignal>,
}

/// What a backend reports when activation finishes.
pub type ActivationResult<E> = Result<ActivatedCapture<E>, CaptureError>;

/// Single-fire handle through which a backend reports the outcome of an
/// asynchronous activation. Can be completed from any thread.
pub struct ActivationCompletion<E> {
    sender: SyncSender<ActivationResult<E>>,
}

impl<E> ActivationCompletion<E> {
    fn channel() -> (Self, mpsc::Receiver<ActivationResult<E>>) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (Self { sender }, receiver)
    }

    /// Deliver the result to the waiting caller.
    ///
    /// If the caller already gave up (timeout), the result is dropped and
    /// the endpoint released.
    pub fn complete(self, result: ActivationResult<E>) {
        if self.sender.try_send(result).is_err() {
            log::debug!("Activation completed after the caller stopped waiting");
        }
    }
}

/// Activate a process loopback stream and block until the backend reports
/// back.
///
/// A completion dropped without a result, or a `timeout` that elapses, is
/// reported as [`CaptureError::ActivationFailed`].
pub fn activate<B: LoopbackBackend>(
    backend: &B,
    request: ActivationRequest,
    timeout: Option<Duration>,
) -> Result<ActivatedCapture<B::Capture>, CaptureError> {
    let (completion, receiver) = ActivationCompletion::channel();

    log::debug!(
        "Activating loopback for process {} ({:?})",
        request.process_id,
        request.mode
    );
    backend.begin_activation(request, completion)?;

    let outcome = match timeout {
        Some(timeout) => receiver.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => {
                CaptureError::ActivationFailed(format!("no completion within {:?}", timeout))
            }
            RecvTimeoutError::Disconnected => dropped_completion(),
        }),
        None => receiver.recv().map_err(|_| dropped_completion()),
    };

    let activated = outcome??;
    log::info!(
        "Loopback activated for process {} ({})",
        request.process_id,
        activated.format
    );
    Ok(activated)
}

fn dropped_completion() -> CaptureError {
    CaptureError::ActivationFailed("completion dropped without a result".into())
}
