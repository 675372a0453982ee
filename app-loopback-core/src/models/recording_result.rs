use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Summary of a finalized recording.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    /// Bytes in the WAV data chunk.
    pub data_bytes: u32,
    pub duration_secs: f64,
    /// SHA-256 hex digest of the complete file.
    pub checksum: String,
    pub started_at: DateTime<Utc>,
}

/// Counters accumulated by the capture pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub packets_drained: u64,
    pub frames_captured: u64,
    pub frames_monitored: u64,
    /// Frames the render sink had no headroom for.
    pub frames_dropped: u64,
    pub silent_packets: u64,
    pub discontinuities: u64,
    /// Packets whose device timestamp the endpoint flagged as unreliable.
    pub timestamp_errors: u64,
}
