use std::path::Path;
use std::sync::Arc;

use crate::models::error::EngineError;
use crate::models::route::{AudioRoute, Interruption, RecordPermission, SessionOptions, StreamFormat};

/// Callback invoked by the platform when an interruption begins or ends.
pub type InterruptionHandler = Arc<dyn Fn(Interruption) + Send + Sync + 'static>;

/// Platform audio session: hardware route, permissions, and storage queries.
///
/// Implemented by the embedding application for its platform. All methods
/// are called from the engine's owning thread.
pub trait AudioSession: Send {
    /// Select a category/mode suitable for simultaneous playback and capture.
    fn configure_for_overdub(&mut self, options: &SessionOptions) -> Result<(), EngineError>;

    /// Activate or deactivate the hardware route.
    fn set_active(&mut self, active: bool) -> Result<(), EngineError>;

    /// Currently active input and output ports.
    fn current_route(&self) -> AudioRoute;

    /// Prefer a specific input port for capture.
    fn set_preferred_input(&mut self, port_id: &str) -> Result<(), EngineError>;

    /// Format of the active input, as seen after the last route change.
    fn input_format(&self) -> StreamFormat;

    fn record_permission(&self) -> RecordPermission;

    /// Prompt for microphone access. Blocks until the user answers.
    fn request_record_permission(&mut self) -> bool;

    /// Free space on the volume holding `directory`.
    fn available_storage_bytes(&self, directory: &Path) -> Result<u64, EngineError>;

    /// Register the engine's interruption callback, replacing any previous one.
    fn set_interruption_handler(&mut self, handler: InterruptionHandler);
}
