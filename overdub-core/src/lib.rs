//! # overdub-core
//!
//! Overdub engine: plays a base track and up to three layers phase-locked to
//! one transport position while capturing a new microphone layer.
//!
//! Platform specifics (audio session, hardware graph, compressed encoders)
//! plug in through traits. `SoftwareGraph` is a complete in-process graph
//! driven by the platform's output and input callbacks.
//!
//! ## Architecture
//!
//! ```text
//! overdub-core (this crate)
//! ├── traits/       ← AudioSession, AudioGraph, RecordingSink, EngineObserver, Clock, TrackDecoder
//! ├── models/       ← EngineError, TransportState, SessionConfig, TrackSource, AudioRoute, RecordingResult
//! ├── processing/   ← downmix/resample/gain, meter math, WAV header generation
//! ├── graph/        ← GraphHost (voices + headroom), PlaybackScheduler, SoftwareGraph
//! ├── capture/      ← CapturePipeline, write-failure counter
//! ├── session/      ← OverdubEngine, SessionNegotiator, pre-flight and interruption guard
//! └── storage/      ← WAV writer, WAV decoder, metadata sidecar
//! ```

pub mod capture;
pub mod graph;
pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types at crate root for convenience.
pub use capture::pipeline::{CaptureFault, CapturePipeline};
pub use graph::software::{RenderHandle, SoftwareGraph};
pub use models::config::{Container, OutputFileSettings, QualityPreset, SessionConfig};
pub use models::error::{EngineError, RecordingFailure};
pub use models::recording_result::{RecordingMetadata, RecordingResult};
pub use models::route::{AudioRoute, Interruption, PortKind, RecordPermission, RoutePort, StreamFormat};
pub use models::state::{EngineSnapshot, TransportState};
pub use models::track::{BaseTrackRef, LayerRef, MAX_LAYERS};
pub use session::engine::{OverdubEngine, POLL_INTERVAL};
pub use storage::decoder::WavDecoder;
pub use storage::wav_writer::{WavFileWriter, WavSinkFactory};
pub use traits::audio_graph::{AudioBufferCallback, AudioGraph};
pub use traits::audio_session::{AudioSession, InterruptionHandler};
pub use traits::clock::{Clock, SystemClock};
pub use traits::engine_observer::EngineObserver;
pub use traits::recording_sink::{FinalizedFile, RecordingSink, SinkFactory};
pub use traits::track_decoder::TrackDecoder;
