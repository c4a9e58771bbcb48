use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::models::error::EngineError;
use crate::models::track::DecodedAudio;
use crate::processing::mixdown::downmix_to_mono;
use crate::traits::track_decoder::TrackDecoder;

/// WAV decoder backed by `hound`.
///
/// Supports 8/16/24/32-bit integer and 32-bit float PCM; multichannel files
/// are downmixed to mono.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavDecoder;

impl TrackDecoder for WavDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, EngineError> {
        let load_error = |reason: String| EngineError::TrackLoadFailed {
            path: path.display().to_string(),
            reason,
        };

        let mut reader = WavReader::open(path).map_err(|e| load_error(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(load_error("file declares zero channels".into()));
        }

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(|e| load_error(e.to_string()))?,
            (SampleFormat::Int, bits @ 8..=32) => {
                let scale = 1.0 / (1u64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 * scale))
                    .collect::<Result<_, _>>()
                    .map_err(|e| load_error(e.to_string()))?
            }
            (format, bits) => {
                return Err(load_error(format!("unsupported sample format {:?}/{}", format, bits)));
            }
        };

        let mono = downmix_to_mono(&interleaved, spec.channels as usize);
        log::debug!(
            "Decoded {}: {} frames, {} Hz, {} ch",
            path.display(),
            mono.len(),
            spec.sample_rate,
            spec.channels
        );

        Ok(DecodedAudio {
            samples: mono.into(),
            sample_rate: spec.sample_rate as f64,
            source_channels: spec.channels,
        })
    }
}
