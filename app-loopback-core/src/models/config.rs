use std::path::PathBuf;
use std::time::Duration;

/// Which part of the process tree the loopback stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopbackMode {
    /// Audio rendered by the target process and its descendants.
    IncludeTargetProcessTree,
    /// Audio rendered by every process except the target tree.
    ExcludeTargetProcessTree,
}

impl LoopbackMode {
    pub fn from_include_tree(include_process_tree: bool) -> Self {
        if include_process_tree {
            Self::IncludeTargetProcessTree
        } else {
            Self::ExcludeTargetProcessTree
        }
    }

    pub fn includes_tree(&self) -> bool {
        matches!(self, Self::IncludeTargetProcessTree)
    }
}

/// Configuration for a loopback capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfiguration {
    /// Process whose tree is included in (or excluded from) the capture.
    pub process_id: u32,

    pub loopback_mode: LoopbackMode,

    /// WAV file receiving the captured stream.
    pub output_path: PathBuf,

    /// Shared-mode buffer requested for the capture endpoint (default: 200ms).
    pub capture_buffer_duration: Duration,

    /// Shared-mode buffer requested for the render endpoint (default: 200ms).
    pub render_buffer_duration: Duration,

    /// Pipe captured audio to the default output device (default: true).
    pub enable_monitoring: bool,

    /// Stop automatically before the data chunk exceeds this many bytes
    /// (None = the 32-bit limit of the WAV size fields).
    pub max_data_bytes: Option<u32>,

    /// Upper bound on the activation handshake (None = wait for the OS).
    pub activation_timeout: Option<Duration>,

    /// Worker threads in the session's work queue (default: 2).
    pub worker_threads: usize,
}

impl CaptureConfiguration {
    pub fn new(process_id: u32, include_process_tree: bool, output_path: impl Into<PathBuf>) -> Self {
        Self {
            process_id,
            loopback_mode: LoopbackMode::from_include_tree(include_process_tree),
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.output_path.as_os_str().is_empty() {
            return Err("output path must not be empty".into());
        }
        if self.capture_buffer_duration.is_zero() {
            return Err("capture buffer duration must be positive".into());
        }
        if self.enable_monitoring && self.render_buffer_duration.is_zero() {
            return Err("render buffer duration must be positive".into());
        }
        if self.worker_threads == 0 {
            return Err("at least one worker thread is required".into());
        }
        if self.max_data_bytes == Some(0) {
            return Err("max data bytes must be positive".into());
        }
        Ok(())
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            process_id: 0,
            loopback_mode: LoopbackMode::ExcludeTargetProcessTree,
            output_path: PathBuf::from("capture.wav"),
            capture_buffer_duration: Duration::from_millis(200),
            render_buffer_duration: Duration::from_millis(200),
            enable_monitoring: true,
            max_data_bytes: None,
            activation_timeout: None,
            worker_threads: 2,
        }
    }
}
