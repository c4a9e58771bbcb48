use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::{Container, QualityPreset};

/// Result of one recording pass. Also produced for partial recordings that
/// ended in a write failure or interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingResult {
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub frames_written: u64,
    pub sample_rate: f64,
    pub checksum: String,
    pub metadata: RecordingMetadata,
}

/// Metadata stored alongside a recorded layer.
///
/// Serializable for the calling layer's bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub duration_secs: f64,
    pub file_path: String,
    pub checksum: String,
    pub created_at: String,
    pub quality: QualityPreset,
    pub container: Container,
    pub sample_rate: f64,
    pub base_track: String,
    /// Offset of the new layer relative to the base's start.
    pub offset_secs: f64,
    /// Number of existing layers that were monitored during capture.
    pub monitored_layers: usize,
    /// True when the recording ended early and the file holds partial audio.
    pub partial: bool,
}

/// Inputs for [`RecordingMetadata::new_layer`].
#[derive(Debug, Clone)]
pub struct LayerDescription<'a> {
    pub quality: QualityPreset,
    pub container: Container,
    pub base_track: &'a str,
    pub offset_secs: f64,
    pub monitored_layers: usize,
}

impl RecordingMetadata {
    /// Creates metadata for a freshly captured mono layer.
    pub fn new_layer(
        duration_secs: f64,
        file_path: &str,
        checksum: &str,
        sample_rate: f64,
        partial: bool,
        layer: &LayerDescription<'_>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            duration_secs,
            file_path: file_path.to_string(),
            checksum: checksum.to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
            quality: layer.quality,
            container: layer.container,
            sample_rate,
            base_track: layer.base_track.to_string(),
            offset_secs: layer.offset_secs,
            monitored_layers: layer.monitored_layers,
            partial,
        }
    }
}
