//! WAV container layout.
//!
//! A plain 44-byte RIFF header: no `fmt ` extension bytes, no extra
//! chunks. Size fields are written as zero placeholders and patched once
//! the data length is known.

use crate::models::format::CaptureFormat;

/// Size of the RIFF/WAVE header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

/// Size of the PCM `fmt ` chunk payload.
pub const FMT_CHUNK_SIZE: u32 = 16;

/// Offset of the RIFF chunk size (file size − 8).
pub const RIFF_SIZE_OFFSET: u64 = 4;

/// Offset of the `data` chunk size.
pub const DATA_SIZE_OFFSET: u64 = 40;

/// Bytes preceding the RIFF size count ("RIFF" tag + the size field itself).
pub const RIFF_PREAMBLE: u32 = 8;

/// Largest data chunk whose RIFF size (`data_size + 36`) still fits in 32 bits.
pub const MAX_DATA_SIZE: u32 = u32::MAX - (WAV_HEADER_SIZE as u32 - RIFF_PREAMBLE);

/// Build the header for `format` with explicit size fields.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    riff_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16
/// [20-21]  format tag (1 = PCM)
/// [22-23]  channels
/// [24-27]  sample rate
/// [28-31]  average bytes per second
/// [32-33]  block align
/// [34-35]  bits per sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_wav_header(format: &CaptureFormat, riff_size: u32, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];

    // RIFF chunk descriptor
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&riff_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    // fmt sub-chunk
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&FMT_CHUNK_SIZE.to_le_bytes());
    header[20..22].copy_from_slice(&format.format_tag.to_le_bytes());
    header[22..24].copy_from_slice(&format.channels.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&format.avg_bytes_per_sec.to_le_bytes());
    header[32..34].copy_from_slice(&format.block_align.to_le_bytes());
    header[34..36].copy_from_slice(&format.bits_per_sample.to_le_bytes());

    // data sub-chunk
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Header written when a recording starts: both size fields are zero
/// until the recording is finalized.
pub fn placeholder_header(format: &CaptureFormat) -> [u8; WAV_HEADER_SIZE] {
    generate_wav_header(format, 0, 0)
}

/// RIFF size field for a file whose data chunk holds `data_size` bytes, or
/// `None` past [`MAX_DATA_SIZE`].
pub fn riff_size(data_size: u32) -> Option<u32> {
    data_size.checked_add(WAV_HEADER_SIZE as u32 - RIFF_PREAMBLE)
}

/// Decoded header fields, used to inspect finished files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub riff_size: u32,
    pub fmt_size: u32,
    pub format: CaptureFormat,
    pub data_size: u32,
}

impl WavHeader {
    /// Parse the fixed 44-byte layout written by [`generate_wav_header`].
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < WAV_HEADER_SIZE
            || &bytes[0..4] != b"RIFF"
            || &bytes[8..12] != b"WAVE"
            || &bytes[12..16] != b"fmt "
            || &bytes[36..40] != b"data"
        {
            return None;
        }
        let u16_at = |i: usize| u16::from_le_bytes([bytes[i], bytes[i + 1]]);
        let u32_at = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);

        Some(Self {
            riff_size: u32_at(4),
            fmt_size: u32_at(16),
            format: CaptureFormat {
                format_tag: u16_at(20),
                channels: u16_at(22),
                sample_rate: u32_at(24),
                avg_bytes_per_sec: u32_at(28),
                block_align: u16_at(32),
                bits_per_sample: u16_at(34),
            },
            data_size: u32_at(40),
        })
    }
}
