/// Device state machine for one loopback capture session.
///
/// State transitions:
/// ```text
/// uninitialized → initialized → starting → capturing → stopping → stopped
///        └──────────────┴────────────┴──────────┴──────────→ error
/// ```
///
/// `error` behaves like `capturing` for the purpose of stopping: the stop
/// sequence still runs and finalizes whatever was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Uninitialized,
    Error,
    Initialized,
    Starting,
    Capturing,
    Stopping,
    Stopped,
}

impl DeviceState {
    /// Whether a stop request is honored from this state.
    pub fn can_stop(&self) -> bool {
        matches!(self, Self::Capturing | Self::Error)
    }

    /// Whether a new session may be started from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Stopped)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Error => "error",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Capturing => "capturing",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
