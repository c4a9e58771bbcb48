use thiserror::Error;

/// Terminal reasons a recording pass can end in failure.
///
/// Carried by [`EngineError::RecordingFailed`] and surfaced as the engine's
/// `recording_error` once a recording has been torn down.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordingFailure {
    #[error("insufficient storage: {available_bytes} bytes free, {required_bytes} required")]
    InsufficientStorage { available_bytes: u64, required_bytes: u64 },

    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("could not create recording file: {0}")]
    FileCreation(String),

    #[error("audio engine failed to start: {0}")]
    EngineStart(String),

    #[error("{consecutive_failures} consecutive writes failed, storage may be full")]
    PersistentWriteFailure { consecutive_failures: u32 },

    #[error("recording interrupted")]
    Interrupted,

    #[error("no encoder available for {0}")]
    UnsupportedContainer(String),
}

/// Errors that can occur while preparing, playing, or recording an overdub.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine not prepared")]
    EngineNotPrepared,

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("headphones required: recording through the speaker would feed back into the microphone")]
    HeadphonesRequired,

    #[error("no audio input available")]
    NoInputAvailable,

    #[error(
        "wireless route did not stabilize after {attempts} attempts; \
         reconnect the device or use wired headphones"
    )]
    WirelessRouteUnstable { attempts: u32 },

    #[error("wireless output has no microphone; use wired headphones or the built-in microphone")]
    WirelessDeviceWithoutMicrophone,

    #[error("invalid input format: {sample_rate} Hz, {channels} channels")]
    InvalidInputFormat { sample_rate: f64, channels: u16 },

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("failed to load track {path}: {reason}")]
    TrackLoadFailed { path: String, reason: String },

    #[error("too many layers: {count} (maximum {max})")]
    TooManyLayers { count: usize, max: usize },

    #[error("recording failed: {0}")]
    RecordingFailed(RecordingFailure),

    #[error("audio graph error: {0}")]
    GraphError(String),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<RecordingFailure> for EngineError {
    fn from(failure: RecordingFailure) -> Self {
        Self::RecordingFailed(failure)
    }
}
