//! COM apartment handling and HRESULT conversion.

use windows::Win32::System::Com::{CoInitializeEx, CoUninitialize, COINIT_MULTITHREADED};

use app_loopback_core::models::error::CaptureError;

/// Membership of the calling thread in the multithreaded apartment.
///
/// `CoUninitialize` runs when the guard drops, so the guard must stay on
/// the thread that created it.
pub struct ComApartment {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ComApartment {
    /// Join the MTA. Succeeds if the thread is already in it.
    pub fn enter_mta() -> Result<Self, CaptureError> {
        unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
            .ok()
            .platform("CoInitializeEx")?;
        Ok(Self {
            _not_send: std::marker::PhantomData,
        })
    }
}

impl Drop for ComApartment {
    fn drop(&mut self) {
        unsafe {
            CoUninitialize();
        }
    }
}

/// Attach the failing operation's name to a Windows error.
pub trait PlatformResultExt<T> {
    fn platform(self, operation: &str) -> Result<T, CaptureError>;
}

impl<T> PlatformResultExt<T> for windows::core::Result<T> {
    fn platform(self, operation: &str) -> Result<T, CaptureError> {
        self.map_err(|e| {
            log::debug!("{} failed: {}", operation, e.message());
            CaptureError::platform(operation, e.code().0)
        })
    }
}
