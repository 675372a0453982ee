use thiserror::Error;

use super::state::DeviceState;

/// Errors that can occur during loopback capture.
///
/// Platform failures keep their raw status code (an HRESULT on Windows) so
/// callers can inspect it; any error is terminal for the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("operation not valid in the {0} state")]
    InvalidState(DeviceState),

    #[error("activation failed: {0}")]
    ActivationFailed(String),

    #[error("{operation} failed (0x{code:08X})")]
    Platform { operation: String, code: i32 },

    #[error("device not available")]
    DeviceNotAvailable,

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("scheduling failed: {0}")]
    Scheduling(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl CaptureError {
    pub fn platform(operation: impl Into<String>, code: i32) -> Self {
        Self::Platform {
            operation: operation.into(),
            code,
        }
    }

    /// Raw platform status code, when the failure carried one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Platform { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}
