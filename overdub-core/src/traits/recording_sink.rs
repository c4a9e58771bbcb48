use std::path::{Path, PathBuf};

use crate::models::config::OutputFileSettings;
use crate::models::error::EngineError;

/// A finished (possibly partial) recording file.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub frames_written: u64,
    pub sample_rate: f64,
    pub checksum: String,
}

/// Destination for captured mono audio.
///
/// `append` is called from the real-time capture callback.
pub trait RecordingSink: Send {
    fn append(&mut self, samples: &[f32]) -> Result<(), EngineError>;

    /// Flush, patch headers, and close. The file is kept on disk.
    fn finalize(self: Box<Self>) -> Result<FinalizedFile, EngineError>;

    fn path(&self) -> &Path;

    fn frames_written(&self) -> u64;
}

/// Creates sinks for a given output configuration.
///
/// Hosts with platform encoders register a factory that handles compressed
/// containers; the built-in `WavSinkFactory` handles linear PCM.
pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path, settings: &OutputFileSettings) -> Result<Box<dyn RecordingSink>, EngineError>;
}
