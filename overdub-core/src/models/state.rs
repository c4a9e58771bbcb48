use super::error::EngineError;

/// Transport state machine.
///
/// State transitions:
/// ```text
/// idle → playing ↔ paused
///  ↓        ↓        ↓
/// recording ← ─ ─ ─ ─┘   (from idle or paused)
///  ↓
/// idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Idle,
    Playing,
    Recording,
    Paused,
}

impl TransportState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing)
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Recording => "recording",
            Self::Paused => "paused",
        }
    }
}

/// Everything a caller may observe about the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineSnapshot {
    pub state: TransportState,
    pub position_secs: f64,
    pub duration_secs: f64,
    pub recording_duration_secs: f64,
    /// Normalized input loudness, 0.0–1.0.
    pub meter_level: f32,
    /// A recording start is waiting on a wireless route.
    pub negotiating_route: bool,
    /// 1-based positions of layers that could not be loaded.
    pub failed_layer_indices: Vec<usize>,
    /// Terminal error of the last recording pass, if it failed.
    pub recording_error: Option<EngineError>,
}
