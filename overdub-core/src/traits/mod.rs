pub mod audio_graph;
pub mod audio_session;
pub mod clock;
pub mod engine_observer;
pub mod recording_sink;
pub mod track_decoder;
