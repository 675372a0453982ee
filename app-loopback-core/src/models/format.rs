use std::time::Duration;

/// `WAVE_FORMAT_PCM` format tag.
pub const WAVE_FORMAT_PCM: u16 = 1;

/// PCM stream descriptor shared by capture, render, and the WAV header.
///
/// Process loopback always negotiates the canonical format returned by
/// [`CaptureFormat::canonical`]; the fields stay public so backends can
/// copy them into their native descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureFormat {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    pub block_align: u16,
    pub avg_bytes_per_sec: u32,
}

impl CaptureFormat {
    /// 16-bit stereo PCM at 44.1 kHz.
    pub const fn canonical() -> Self {
        Self::pcm(2, 44_100, 16)
    }

    /// Integer PCM with derived block align and byte rate.
    pub const fn pcm(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        let block_align = channels * bits_per_sample / 8;
        Self {
            format_tag: WAVE_FORMAT_PCM,
            channels,
            sample_rate,
            bits_per_sample,
            block_align,
            avg_bytes_per_sec: sample_rate * block_align as u32,
        }
    }

    pub fn bytes_for_frames(&self, frames: u32) -> usize {
        frames as usize * self.block_align as usize
    }

    pub fn frames_for_bytes(&self, bytes: usize) -> u32 {
        if self.block_align == 0 {
            return 0;
        }
        (bytes / self.block_align as usize) as u32
    }

    /// Playback duration of `bytes` of audio in this format.
    pub fn duration_of_bytes(&self, bytes: u64) -> Duration {
        if self.avg_bytes_per_sec == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / self.avg_bytes_per_sec as f64)
    }

    /// Number of whole frames that fit in `duration`.
    pub fn frames_in(&self, duration: Duration) -> u32 {
        (duration.as_secs_f64() * self.sample_rate as f64) as u32
    }
}

impl Default for CaptureFormat {
    fn default() -> Self {
        Self::canonical()
    }
}

impl std::fmt::Display for CaptureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz, {} ch, {}-bit PCM",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}
