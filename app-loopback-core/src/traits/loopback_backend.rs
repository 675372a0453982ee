use std::any::Any;

use crate::models::error::CaptureError;
use crate::session::activation::{ActivationCompletion, ActivationRequest};
use crate::traits::capture_endpoint::CaptureEndpoint;
use crate::traits::render_device::RenderDevice;

/// Per-thread state a backend needs on every worker thread (e.g. a COM
/// apartment). Dropped when the worker exits.
pub type ThreadGuard = Box<dyn Any>;

/// Interface for platform-specific process loopback backends.
///
/// Implemented by:
/// - `ProcessLoopbackBackend` (Windows, WASAPI)
pub trait LoopbackBackend: Send + Sync + 'static {
    type Capture: CaptureEndpoint;
    type Render: RenderDevice;

    /// Begin asynchronous activation of a process loopback capture stream.
    ///
    /// The backend must eventually call `completion.complete(..)` from any
    /// thread, or drop it, which the waiting caller observes as a failure.
    fn begin_activation(
        &self,
        request: ActivationRequest,
        completion: ActivationCompletion<Self::Capture>,
    ) -> Result<(), CaptureError>;

    /// Open the default render endpoint (not yet initialized).
    fn open_render_device(&self) -> Result<Self::Render, CaptureError>;

    /// Called once at the start of every work-queue thread.
    fn enter_worker_thread(&self) -> Option<ThreadGuard> {
        None
    }
}
