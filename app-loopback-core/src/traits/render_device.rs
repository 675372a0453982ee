use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;

/// Hardware output endpoint used for monitoring.
///
/// Only the raw device operations live here; the headroom policy is
/// implemented once by [`RenderSink`](crate::processing::render_sink::RenderSink).
pub trait RenderDevice: Send + 'static {
    /// Initialize in shared mode. Returns the buffer capacity in frames.
    fn initialize(&mut self, format: &CaptureFormat, buffer_duration: Duration) -> Result<u32, CaptureError>;

    fn start(&mut self) -> Result<(), CaptureError>;

    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Frames queued in the device buffer that have not been played yet.
    fn current_padding(&mut self) -> Result<u32, CaptureError>;

    /// Copy `frames` frames from `data` into the device buffer and commit them.
    ///
    /// Callers never ask for more frames than the current headroom.
    fn write_frames(&mut self, data: &[u8], frames: u32) -> Result<(), CaptureError>;
}
