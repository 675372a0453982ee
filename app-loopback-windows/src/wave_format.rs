use std::time::Duration;

use windows::Win32::Media::Audio::WAVEFORMATEX;

use app_loopback_core::models::format::CaptureFormat;

/// Describe `format` as a `WAVEFORMATEX` with no extension bytes.
pub fn to_wave_format(format: &CaptureFormat) -> WAVEFORMATEX {
    WAVEFORMATEX {
        wFormatTag: format.format_tag,
        nChannels: format.channels,
        nSamplesPerSec: format.sample_rate,
        nAvgBytesPerSec: format.avg_bytes_per_sec,
        nBlockAlign: format.block_align,
        wBitsPerSample: format.bits_per_sample,
        cbSize: 0,
    }
}

/// Convert to a REFERENCE_TIME (100ns units).
pub fn reference_time(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}
