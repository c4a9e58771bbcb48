use crate::models::error::EngineError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::TransportState;

/// Push-based listener for engine notifications.
///
/// Methods are called on the thread that drives the engine (the thread
/// calling its operations and `poll`), never on the audio thread.
pub trait EngineObserver: Send + Sync {
    /// Called when the transport state changes.
    fn on_state_changed(&self, state: TransportState);

    /// Called on every poll tick with the playback position and meter level.
    fn on_tick(&self, position_secs: f64, meter_level: f32);

    /// Called when a recording pass ends in a terminal error.
    fn on_error(&self, error: &EngineError);

    /// Called when a recording file is finalized, including partial files.
    fn on_recording_finished(&self, result: &RecordingResult);
}
