use std::time::Duration;

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::traits::render_device::RenderDevice;

/// Monitoring output with a drop-on-full policy.
///
/// `push` writes at most the device's current headroom and silently drops
/// the rest of the packet: monitoring favors latency over completeness, so
/// nothing is ever queued between calls.
pub struct RenderSink<D: RenderDevice> {
    device: D,
    format: CaptureFormat,
    buffer_frames: u32,
    started: bool,
}

impl<D: RenderDevice> RenderSink<D> {
    /// Initialize `device` in shared mode with the capture format.
    pub fn initialize(mut device: D, format: CaptureFormat, buffer_duration: Duration) -> Result<Self, CaptureError> {
        let buffer_frames = device.initialize(&format, buffer_duration)?;
        log::debug!("Render endpoint initialized: {} frames of buffer ({})", buffer_frames, format);
        Ok(Self {
            device,
            format,
            buffer_frames,
            started: false,
        })
    }

    pub fn start(&mut self) -> Result<(), CaptureError> {
        self.device.start()?;
        self.started = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        self.device.stop()
    }

    /// Copy up to `frames` frames of `data` into the device buffer.
    ///
    /// Returns the number of frames actually written:
    /// `min(frames, capacity - padding)`.
    pub fn push(&mut self, data: &[u8], frames: u32) -> Result<u32, CaptureError> {
        let frames = frames.min(self.format.frames_for_bytes(data.len()));
        if frames == 0 {
            return Ok(0);
        }

        let padding = self.device.current_padding()?;
        let headroom = self.buffer_frames.saturating_sub(padding);
        let to_write = frames.min(headroom);
        if to_write == 0 {
            return Ok(0);
        }

        let bytes = self.format.bytes_for_frames(to_write);
        self.device.write_frames(&data[..bytes], to_write)?;
        Ok(to_write)
    }

    /// Capacity of the device buffer in frames.
    pub fn buffer_frames(&self) -> u32 {
        self.buffer_frames
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}
