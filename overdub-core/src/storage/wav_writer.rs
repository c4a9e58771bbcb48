use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::config::{Container, OutputFileSettings};
use crate::models::error::{EngineError, RecordingFailure};
use crate::processing::mixdown;
use crate::processing::wav_format;
use crate::traits::recording_sink::{FinalizedFile, RecordingSink, SinkFactory};

const BYTES_PER_SAMPLE: u64 = 2;

/// Byte store behind a [`WavFileWriter`].
pub trait WavTarget: Read + Write + Seek + Send {
    /// Cut the store to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl WavTarget for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Streaming mono 16-bit PCM WAV writer.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header, sizes patched on finalize]
/// [raw 16-bit little-endian PCM data...]
/// ```
///
/// A failed append leaves the file as it was before the call. A writer
/// that is dropped without `finalize` leaves a readable file whose header
/// still claims zero data bytes.
pub struct WavFileWriter<T: WavTarget = File> {
    file_path: PathBuf,
    target: T,
    sample_rate: f64,
    data_bytes: u64,
}

impl WavFileWriter {
    /// Create the file and write the placeholder header.
    pub fn create(file_path: PathBuf, sample_rate: f64) -> Result<Self, EngineError> {
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    RecordingFailure::FileCreation(format!("failed to create directory: {}", e))
                })?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&file_path)
            .map_err(|e| RecordingFailure::FileCreation(format!("{}: {}", file_path.display(), e)))?;
        Self::with_target(file_path, file, sample_rate)
    }
}

impl<T: WavTarget> WavFileWriter<T> {
    /// Writer over an already-open, empty target.
    pub fn with_target(file_path: PathBuf, mut target: T, sample_rate: f64) -> Result<Self, EngineError> {
        let header = wav_format::generate_wav_header(sample_rate.round() as u32, 16, 1, 0);
        target
            .write_all(&header)
            .map_err(|e| RecordingFailure::FileCreation(format!("failed to write header: {}", e)))?;

        Ok(Self {
            file_path,
            target,
            sample_rate,
            data_bytes: 0,
        })
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn data_end(&self) -> u64 {
        wav_format::WAV_HEADER_SIZE as u64 + self.data_bytes
    }

    /// Drop anything past the last complete append.
    fn rewind_to_data_end(&mut self) -> io::Result<()> {
        let end = self.data_end();
        self.target.truncate(end)?;
        self.target.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn patch_header(&mut self) -> io::Result<()> {
        self.target.seek(SeekFrom::Start(wav_format::RIFF_SIZE_OFFSET))?;
        self.target
            .write_all(&wav_format::riff_chunk_size(self.data_bytes).to_le_bytes())?;
        self.target.seek(SeekFrom::Start(wav_format::DATA_SIZE_OFFSET))?;
        self.target
            .write_all(&wav_format::data_chunk_size(self.data_bytes).to_le_bytes())?;
        self.target.flush()?;
        self.target.sync()
    }

    /// SHA-256 hex digest of everything in the target.
    fn checksum(&mut self) -> io::Result<String> {
        self.target.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        io::copy(&mut self.target, &mut hasher)?;
        Ok(hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect())
    }
}

impl<T: WavTarget> RecordingSink for WavFileWriter<T> {
    fn append(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        if samples.is_empty() {
            return Ok(());
        }
        let pcm = mixdown::convert_to_int16_pcm(samples);
        if let Err(e) = self.target.write_all(&pcm) {
            if let Err(rollback) = self.rewind_to_data_end() {
                log::warn!(
                    "Failed to drop partial buffer in {}: {}",
                    self.file_path.display(),
                    rollback
                );
            }
            return Err(EngineError::StorageError(format!("write failed: {}", e)));
        }
        self.data_bytes += pcm.len() as u64;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<FinalizedFile, EngineError> {
        self.patch_header()
            .map_err(|e| EngineError::StorageError(format!("failed to finalize header: {}", e)))?;

        let checksum = self
            .checksum()
            .map_err(|e| EngineError::StorageError(format!("failed to read file for checksum: {}", e)))?;
        Ok(FinalizedFile {
            path: self.file_path.clone(),
            frames_written: self.data_bytes / BYTES_PER_SAMPLE,
            sample_rate: self.sample_rate,
            checksum,
        })
    }

    fn path(&self) -> &Path {
        &self.file_path
    }

    fn frames_written(&self) -> u64 {
        self.data_bytes / BYTES_PER_SAMPLE
    }
}

/// Sink factory for linear PCM output.
///
/// Compressed containers need a platform encoder and are rejected with
/// [`RecordingFailure::UnsupportedContainer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WavSinkFactory;

impl SinkFactory for WavSinkFactory {
    fn create(&self, path: &Path, settings: &OutputFileSettings) -> Result<Box<dyn RecordingSink>, EngineError> {
        if settings.container != Container::LinearPcm {
            return Err(RecordingFailure::UnsupportedContainer(format!("{:?}", settings.container)).into());
        }
        if settings.bit_depth != Some(16) {
            return Err(RecordingFailure::UnsupportedContainer(format!(
                "{:?}-bit PCM",
                settings.bit_depth
            ))
            .into());
        }
        Ok(Box::new(WavFileWriter::create(path.to_path_buf(), settings.sample_rate)?))
    }
}
