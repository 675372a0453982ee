use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

use app_loopback_core::models::error::CaptureError;
use app_loopback_core::traits::ready_signal::ReadySignal;

use crate::com::PlatformResultExt;

/// Auto-reset Win32 event, signaled by the audio engine when a capture
/// buffer is ready.
pub struct Win32Event {
    handle: HANDLE,
}

// SAFETY: an event handle is a kernel object usable from any thread; it is
// only closed in Drop.
unsafe impl Send for Win32Event {}
unsafe impl Sync for Win32Event {}

impl Win32Event {
    pub fn new() -> Result<Self, CaptureError> {
        let handle = unsafe { CreateEventW(None, false, false, PCWSTR::null()) }.platform("CreateEventW")?;
        Ok(Self { handle })
    }

    pub fn handle(&self) -> HANDLE {
        self.handle
    }
}

impl ReadySignal for Win32Event {
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        unsafe { WaitForSingleObject(self.handle, millis) == WAIT_OBJECT_0 }
    }
}

impl Drop for Win32Event {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = CloseHandle(self.handle) {
                log::warn!("CloseHandle failed: {}", e);
            }
        }
    }
}
