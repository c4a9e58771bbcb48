use std::path::Path;

use crate::models::error::EngineError;
use crate::models::track::DecodedAudio;

/// Decodes a track file into mono samples for playback.
pub trait TrackDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, EngineError>;
}
