use std::path::PathBuf;
use std::sync::Arc;

/// Maximum number of layers recorded on top of one base track.
pub const MAX_LAYERS: usize = 3;

/// Decoded and supplied base durations may drift by up to this much before
/// the decoded value takes over. Any delta over one second is therefore
/// always resolved in favour of the decoded file.
pub const DURATION_TOLERANCE_SECS: f64 = 0.5;

/// Caller-supplied reference to the base track.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTrackRef {
    pub path: PathBuf,
    pub expected_duration_secs: f64,
}

/// Caller-supplied reference to an existing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRef {
    pub path: PathBuf,
    /// Signed start offset relative to the base's start, in seconds.
    pub offset_secs: f64,
}

/// Decoded mono audio. Shared between voice rebuilds without copying.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Arc<[f32]>,
    pub sample_rate: f64,
    /// Channel count of the file before downmixing.
    pub source_channels: u16,
}

impl DecodedAudio {
    pub fn frames(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackKind {
    Base,
    /// `index` is the layer's 0-based position in the caller's list.
    Layer { index: usize, offset_secs: f64 },
}

/// A decoded source participating in playback.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSource {
    pub path: PathBuf,
    pub kind: TrackKind,
    pub audio: DecodedAudio,
}

impl TrackSource {
    pub fn sample_rate(&self) -> f64 {
        self.audio.sample_rate
    }

    pub fn length_frames(&self) -> u64 {
        self.audio.frames()
    }

    pub fn offset_secs(&self) -> f64 {
        match self.kind {
            TrackKind::Base => 0.0,
            TrackKind::Layer { offset_secs, .. } => offset_secs,
        }
    }

    pub fn layer_index(&self) -> Option<usize> {
        match self.kind {
            TrackKind::Base => None,
            TrackKind::Layer { index, .. } => Some(index),
        }
    }
}

/// Reconcile the caller's expected base duration with the decoded one.
///
/// A delta within [`DURATION_TOLERANCE_SECS`] keeps the supplied value;
/// anything larger means the caller's bookkeeping is stale.
pub fn reconcile_duration(expected_secs: f64, decoded_secs: f64) -> f64 {
    if !expected_secs.is_finite() || expected_secs <= 0.0 {
        return decoded_secs;
    }
    if (decoded_secs - expected_secs).abs() > DURATION_TOLERANCE_SECS {
        decoded_secs
    } else {
        expected_secs
    }
}
