use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::CaptureError;
use crate::models::format::CaptureFormat;
use crate::processing::wav_format::{self, DATA_SIZE_OFFSET, MAX_DATA_SIZE, RIFF_SIZE_OFFSET};

/// Streaming PCM WAV writer.
///
/// Writes a placeholder header on creation, appends raw PCM as it arrives,
/// and patches both size fields in [`finalize`](Self::finalize). Not
/// internally synchronized: the capture pump keeps it behind its lock.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, size fields zero until finalized]
/// [raw PCM data, byte-exact copy of every appended chunk...]
/// ```
#[derive(Debug)]
pub struct WavWriter {
    file_path: PathBuf,
    file: File,
    format: CaptureFormat,
    header_bytes: u32,
    data_bytes: u32,
    data_limit: u32,
}

/// What a finalized recording looks like on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedWav {
    pub file_path: PathBuf,
    pub header_bytes: u32,
    pub data_bytes: u32,
    /// SHA-256 hex digest of the complete file.
    pub checksum: String,
}

impl WavWriter {
    /// Create (or truncate) `file_path` and write the placeholder header.
    pub fn create(file_path: impl Into<PathBuf>, format: CaptureFormat) -> Result<Self, CaptureError> {
        let file_path = file_path.into();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let mut file = File::create(&file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;

        let header = wav_format::placeholder_header(&format);
        file.write_all(&header)
            .map_err(|e| CaptureError::StorageError(format!("failed to write header: {}", e)))?;

        log::debug!("Created {} ({})", file_path.display(), format);

        Ok(Self {
            file_path,
            file,
            format,
            header_bytes: header.len() as u32,
            data_bytes: 0,
            data_limit: MAX_DATA_SIZE,
        })
    }

    /// Cap the data chunk below [`MAX_DATA_SIZE`]. Larger limits are clamped.
    pub fn with_data_limit(mut self, limit: u32) -> Self {
        self.data_limit = limit.min(MAX_DATA_SIZE);
        self
    }

    /// Whether appending `len` more bytes would overflow either size field
    /// (or the configured limit).
    pub fn would_overflow(&self, len: usize) -> bool {
        let Ok(len) = u32::try_from(len) else {
            return true;
        };
        match self.data_bytes.checked_add(len) {
            Some(total) => total > self.data_limit,
            None => true,
        }
    }

    /// Append raw PCM. Returns the accumulated data size.
    pub fn append(&mut self, data: &[u8]) -> Result<u32, CaptureError> {
        if self.would_overflow(data.len()) {
            return Err(CaptureError::StorageError(format!(
                "appending {} bytes would overflow the data chunk ({} bytes written)",
                data.len(),
                self.data_bytes
            )));
        }
        self.file
            .write_all(data)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.data_bytes += data.len() as u32;
        Ok(self.data_bytes)
    }

    /// Patch the size fields, flush to disk, and checksum the result.
    ///
    /// Consumes the writer, so a recording is finalized at most once.
    pub fn finalize(mut self) -> Result<FinalizedWav, CaptureError> {
        let riff_size = wav_format::riff_size(self.data_bytes).ok_or_else(|| {
            CaptureError::StorageError(format!("{} data bytes overflow the RIFF size field", self.data_bytes))
        })?;
        self.patch_u32(DATA_SIZE_OFFSET, self.data_bytes)?;
        self.patch_u32(RIFF_SIZE_OFFSET, riff_size)?;

        self.file.flush().map_err(|e| CaptureError::StorageError(e.to_string()))?;
        self.file
            .sync_all()
            .map_err(|e| CaptureError::StorageError(format!("failed to flush file: {}", e)))?;

        let checksum = sha256_file(&self.file_path)?;
        log::debug!(
            "Finalized {}: {} data bytes, riff size {}",
            self.file_path.display(),
            self.data_bytes,
            riff_size
        );

        Ok(FinalizedWav {
            file_path: self.file_path,
            header_bytes: self.header_bytes,
            data_bytes: self.data_bytes,
            checksum,
        })
    }

    pub fn data_bytes(&self) -> u32 {
        self.data_bytes
    }

    pub fn header_bytes(&self) -> u32 {
        self.header_bytes
    }

    pub fn format(&self) -> &CaptureFormat {
        &self.format
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn patch_u32(&mut self, offset: u64, value: u32) -> Result<(), CaptureError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        self.file
            .write_all(&value.to_le_bytes())
            .map_err(|e| CaptureError::StorageError(e.to_string()))
    }
}

/// Compute the SHA-256 hex digest of a file without loading it whole.
fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let mut file = File::open(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
