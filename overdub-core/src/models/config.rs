use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::EngineError;

/// Recording quality preset. Fixes the container, bit depth, and bitrate
/// of the captured layer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Standard,
    High,
    Lossless,
    Wav,
}

/// Output container family for a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    CompressedLossy,
    CompressedLossless,
    LinearPcm,
}

impl Container {
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::CompressedLossy => "m4a",
            Self::CompressedLossless => "flac",
            Self::LinearPcm => "wav",
        }
    }
}

/// Concrete file settings derived from a preset and the negotiated input rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputFileSettings {
    pub container: Container,
    pub sample_rate: f64,
    pub channels: u16,
    /// PCM bit depth; `None` for lossy containers.
    pub bit_depth: Option<u16>,
    /// Target bitrate in kbps; `None` for lossless/PCM containers.
    pub bitrate_kbps: Option<u32>,
}

impl QualityPreset {
    /// Upper bound on the output sample rate for this preset.
    pub fn sample_rate_cap(&self) -> f64 {
        match self {
            Self::Standard => 44_100.0,
            Self::High | Self::Lossless | Self::Wav => 48_000.0,
        }
    }

    /// File settings for this preset, with the sample rate capped to the
    /// negotiated input rate.
    pub fn output_settings(&self, input_sample_rate: f64) -> OutputFileSettings {
        let sample_rate = self.sample_rate_cap().min(input_sample_rate);
        let (container, bit_depth, bitrate_kbps) = match self {
            Self::Standard => (Container::CompressedLossy, None, Some(128)),
            Self::High => (Container::CompressedLossy, None, Some(256)),
            Self::Lossless => (Container::CompressedLossless, Some(16), None),
            Self::Wav => (Container::LinearPcm, Some(16), None),
        };
        OutputFileSettings {
            container,
            sample_rate,
            channels: 1,
            bit_depth,
            bitrate_kbps,
        }
    }
}

/// Per-session engine configuration supplied by the caller at `prepare`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub quality: QualityPreset,

    /// Monitor volume of the base track (0.0–1.0).
    pub base_monitor_volume: f32,

    /// Monitor volume applied to every layer (0.0–1.0).
    pub layer_monitor_volume: f32,

    /// Play existing layers back while a new layer is being recorded.
    pub monitor_layers_while_recording: bool,

    /// Preferred microphone port id, or None for the route default.
    pub preferred_input_id: Option<String>,

    /// Linear gain applied to captured input before it is written (0.0–4.0).
    pub input_gain: f32,

    /// Directory where layer recordings are written.
    pub output_directory: PathBuf,
}

impl SessionConfig {
    pub const MAX_INPUT_GAIN: f32 = 4.0;

    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, volume) in [
            ("base monitor volume", self.base_monitor_volume),
            ("layer monitor volume", self.layer_monitor_volume),
        ] {
            if !(0.0..=1.0).contains(&volume) {
                return Err(EngineError::ConfigurationFailed(format!(
                    "{} out of range: {}",
                    name, volume
                )));
            }
        }
        if !self.input_gain.is_finite() || !(0.0..=Self::MAX_INPUT_GAIN).contains(&self.input_gain) {
            return Err(EngineError::ConfigurationFailed(format!(
                "input gain out of range: {}",
                self.input_gain
            )));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            quality: QualityPreset::Wav,
            base_monitor_volume: 1.0,
            layer_monitor_volume: 0.8,
            monitor_layers_while_recording: true,
            preferred_input_id: None,
            input_gain: 1.0,
            output_directory: PathBuf::from("."),
        }
    }
}
