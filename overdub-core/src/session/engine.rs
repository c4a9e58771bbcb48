use std::sync::Arc;
use std::time::Duration;

use crate::capture::pipeline::{CaptureFault, CapturePipeline};
use crate::graph::host::GraphHost;
use crate::graph::scheduler::PlaybackScheduler;
use crate::models::config::{OutputFileSettings, SessionConfig};
use crate::models::error::{EngineError, RecordingFailure};
use crate::models::recording_result::{LayerDescription, RecordingMetadata, RecordingResult};
use crate::models::route::Interruption;
use crate::models::state::{EngineSnapshot, TransportState};
use crate::models::track::{reconcile_duration, BaseTrackRef, LayerRef, TrackKind, TrackSource, MAX_LAYERS};
use crate::storage::decoder::WavDecoder;
use crate::storage::metadata;
use crate::storage::wav_writer::WavSinkFactory;
use crate::traits::audio_graph::{AudioGraph, HostTime};
use crate::traits::audio_session::AudioSession;
use crate::traits::clock::{Clock, SystemClock};
use crate::traits::engine_observer::EngineObserver;
use crate::traits::recording_sink::SinkFactory;
use crate::traits::track_decoder::TrackDecoder;

use super::guard::{self, InterruptionGuard};
use super::negotiator::{RouteStabilizer, SessionNegotiator, Stabilization};

/// Cadence at which the owning thread should call [`OverdubEngine::poll`].
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Sources, graph voices, and settings supplied at `prepare`.
struct PreparedSession {
    host: GraphHost,
    config: SessionConfig,
    duration_secs: f64,
}

/// Lives for exactly one recording pass.
struct ActiveRecording {
    started_at: HostTime,
    settings: OutputFileSettings,
    monitored_layers: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Transport {
    state: TransportState,
    /// Position at the start of the current run, or the held position.
    anchor_secs: f64,
    /// Graph clock reading when the current run started.
    started_at: Option<HostTime>,
}

/// Overdub engine: plays a base track and its layers phase-locked while
/// capturing a new microphone layer.
///
/// All operations run on one owning thread. The only state shared with the
/// audio thread lives inside [`CapturePipeline`].
///
/// ```text
///            prepare
///               ↓
///   ┌──────► Idle ◄──────────────┐
///   │  play ↓   ↑ stop/end       │ stop_recording / fault / interruption
///   │    Playing ⇄ Paused        │
///   │               ↓ start_recording (also from Idle)
///   └─────────── Recording ──────┘
/// ```
pub struct OverdubEngine<S: AudioSession, G: AudioGraph> {
    session: S,
    graph: G,
    decoder: Box<dyn TrackDecoder>,
    sink_factory: Box<dyn SinkFactory>,
    negotiator: SessionNegotiator,
    scheduler: PlaybackScheduler,
    capture: CapturePipeline,
    interruptions: InterruptionGuard,
    observer: Option<Arc<dyn EngineObserver>>,

    prepared: Option<PreparedSession>,
    /// Recording requested while a wireless route settles.
    pending_capture: Option<RouteStabilizer>,
    recording: Option<ActiveRecording>,
    transport: Transport,
    failed_layers: Vec<usize>,
    recording_error: Option<EngineError>,
    last_recording: Option<RecordingResult>,
    paused_by_interruption: bool,
}

impl<S: AudioSession, G: AudioGraph> OverdubEngine<S, G> {
    /// Engine with WAV decoding and WAV output, registering its interruption
    /// handler with `session`.
    pub fn new(mut session: S, graph: G) -> Self {
        let interruptions = InterruptionGuard::new();
        session.set_interruption_handler(interruptions.handler());
        Self {
            session,
            graph,
            decoder: Box::new(WavDecoder),
            sink_factory: Box::new(WavSinkFactory),
            negotiator: SessionNegotiator::new(Arc::new(SystemClock)),
            scheduler: PlaybackScheduler,
            capture: CapturePipeline::new(),
            interruptions,
            observer: None,
            prepared: None,
            pending_capture: None,
            recording: None,
            transport: Transport::default(),
            failed_layers: Vec::new(),
            recording_error: None,
            last_recording: None,
            paused_by_interruption: false,
        }
    }

    pub fn with_decoder(mut self, decoder: impl TrackDecoder + 'static) -> Self {
        self.decoder = Box::new(decoder);
        self
    }

    /// Replace the output sink factory, e.g. with one backed by a platform
    /// encoder for compressed presets.
    pub fn with_sink_factory(mut self, factory: impl SinkFactory + 'static) -> Self {
        self.sink_factory = Box::new(factory);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.negotiator.set_clock(clock);
        self
    }

    pub fn set_observer(&mut self, observer: Arc<dyn EngineObserver>) {
        self.observer = Some(observer);
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn graph(&self) -> &G {
        &self.graph
    }

    // --- Operations ---

    /// Load sources and build the graph. Any prior session is torn down
    /// without deactivating the hardware route.
    ///
    /// Layers that fail to decode are skipped and listed in
    /// [`failed_layer_indices`](Self::failed_layer_indices). A base that
    /// fails to decode aborts preparation.
    pub fn prepare(&mut self, base: BaseTrackRef, layers: Vec<LayerRef>, config: SessionConfig) -> Result<(), EngineError> {
        config.validate()?;
        if layers.len() > MAX_LAYERS {
            return Err(EngineError::TooManyLayers {
                count: layers.len(),
                max: MAX_LAYERS,
            });
        }

        self.teardown(true);
        self.failed_layers.clear();
        self.recording_error = None;
        self.last_recording = None;

        self.negotiator.configure(&mut self.session, &config)?;

        let base_audio = self.decoder.decode(&base.path)?;
        if base_audio.sample_rate <= 0.0 {
            return Err(EngineError::TrackLoadFailed {
                path: base.path.display().to_string(),
                reason: format!("invalid sample rate {}", base_audio.sample_rate),
            });
        }
        let decoded_secs = base_audio.duration_secs();
        let duration_secs = reconcile_duration(base.expected_duration_secs, decoded_secs);
        if duration_secs != base.expected_duration_secs {
            log::info!(
                "Base duration {:.3}s replaces supplied {:.3}s",
                duration_secs,
                base.expected_duration_secs
            );
        }
        let base_source = TrackSource {
            path: base.path,
            kind: TrackKind::Base,
            audio: base_audio,
        };

        let mut sources = Vec::with_capacity(layers.len());
        for (index, layer) in layers.into_iter().enumerate() {
            match self.decoder.decode(&layer.path) {
                Ok(audio) if audio.sample_rate > 0.0 => sources.push(TrackSource {
                    path: layer.path,
                    kind: TrackKind::Layer {
                        index,
                        offset_secs: layer.offset_secs,
                    },
                    audio,
                }),
                Ok(audio) => {
                    log::warn!("Layer {} skipped: sample rate {}", index + 1, audio.sample_rate);
                    self.failed_layers.push(index + 1);
                }
                Err(e) => {
                    log::warn!("Layer {} skipped: {}", index + 1, e);
                    self.failed_layers.push(index + 1);
                }
            }
        }

        let host = GraphHost::build(&mut self.graph, base_source, sources, &config)?;
        log::info!(
            "Prepared {:.2}s base with {} layer(s), {} failed",
            duration_secs,
            host.layers().len(),
            self.failed_layers.len()
        );
        self.prepared = Some(PreparedSession {
            host,
            config,
            duration_secs,
        });
        self.reset_transport();
        Ok(())
    }

    /// Start (or restart) playback of base and layers from the current position.
    pub fn play(&mut self) -> Result<(), EngineError> {
        self.require_prepared()?;
        if self.transport.state.is_recording() {
            return Err(self.invalid("play"));
        }
        self.cancel_pending_capture("playback requested");
        let position = self.current_playback_time();
        self.start_playback_at(position)
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(EngineError::EngineNotPrepared);
        };
        if !self.transport.state.is_playing() {
            return Err(self.invalid("pause"));
        }
        let position = self.current_playback_time();
        prepared.host.pause_all(&mut self.graph);
        self.graph.pause();
        self.transport.anchor_secs = position;
        self.transport.started_at = None;
        self.set_state(TransportState::Paused);
        Ok(())
    }

    /// Move the transport, clamped to the base duration. Playback continues
    /// from the new position if it was running.
    pub fn seek(&mut self, time_secs: f64) -> Result<(), EngineError> {
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(EngineError::EngineNotPrepared);
        };
        if self.transport.state.is_recording() {
            return Err(self.invalid("seek"));
        }
        let target = if time_secs.is_nan() {
            0.0
        } else {
            time_secs.clamp(0.0, prepared.duration_secs)
        };
        log::debug!("Seek to {:.3}s", target);

        if self.transport.state.is_playing() {
            return self.start_playback_at(target);
        }
        self.transport.anchor_secs = target;
        Ok(())
    }

    /// Run the capture gates, negotiate the route, and begin recording a new
    /// layer from transport position 0 with base (and layers) monitored.
    ///
    /// On error the engine is left exactly as it was before the call. A
    /// wireless route that is still settling returns `Ok` at once; recording
    /// then begins from a later [`poll`](Self::poll), or the failure is
    /// reported through [`recording_error`](Self::recording_error) and the
    /// observer.
    pub fn start_recording(&mut self) -> Result<(), EngineError> {
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(EngineError::EngineNotPrepared);
        };
        if self.pending_capture.is_some() {
            return Err(EngineError::InvalidState {
                operation: "start recording",
                state: "negotiating route",
            });
        }
        if !(self.transport.state.is_idle() || self.transport.state.is_paused()) {
            return Err(self.invalid("start recording"));
        }
        let output_directory = prepared.config.output_directory.clone();

        guard::preflight(&mut self.session, &output_directory)?;
        match self.negotiator.negotiate_for_capture(&mut self.session)? {
            Stabilization::Settled => self.begin_recording_or_restore(),
            Stabilization::Pending(stabilizer) => {
                self.pending_capture = Some(stabilizer);
                Ok(())
            }
        }
    }

    /// Finalize the layer file and return to `Idle`.
    pub fn stop_recording(&mut self) -> Result<RecordingResult, EngineError> {
        if !self.transport.state.is_recording() {
            return Err(self.invalid("stop recording"));
        }
        let fault = self.capture.take_fault();
        self.finish_recording(fault)
    }

    /// Tear down voices, capture, and polling from any state. With
    /// `deactivate`, also release the prepared session and the hardware route.
    ///
    /// A recording in progress is finalized and kept.
    pub fn stop(&mut self, deactivate: bool) {
        self.teardown(deactivate);
        if deactivate {
            self.failed_layers.clear();
            if let Err(e) = self.session.set_active(false) {
                log::warn!("Failed to deactivate audio session: {}", e);
            }
        }
    }

    /// Periodic tick for the owning thread, nominally every [`POLL_INTERVAL`].
    ///
    /// Applies queued interruptions, completes a recording start waiting on
    /// a wireless route, turns a capture fault into a terminal error, ends
    /// playback that ran past the base, and reports position.
    pub fn poll(&mut self) -> EngineSnapshot {
        for interruption in self.interruptions.drain() {
            self.handle_interruption(interruption);
        }

        if let Some(stabilizer) = self.pending_capture.as_mut() {
            if let Some(settled) = stabilizer.poll(&self.session) {
                self.pending_capture = None;
                if let Err(e) = settled.and_then(|_| self.begin_recording_or_restore()) {
                    self.fail_recording(e);
                }
            }
        }

        if self.transport.state.is_recording() {
            if let Some(fault) = self.capture.take_fault() {
                if let Err(e) = self.finish_recording(Some(fault)) {
                    log::debug!("Recording ended with {}", e);
                }
            }
        }

        if self.transport.state.is_playing() {
            let duration = self.duration_secs();
            if self.current_playback_time() >= duration {
                log::info!("Playback reached end of base ({:.2}s)", duration);
                self.stop_playback();
                self.reset_transport();
            }
        }

        let snapshot = self.snapshot();
        if let Some(observer) = &self.observer {
            observer.on_tick(snapshot.position_secs, snapshot.meter_level);
        }
        snapshot
    }

    /// React to an audio-session interruption.
    ///
    /// Called from [`poll`](Self::poll) for notifications delivered through
    /// the session's handler; may also be called directly.
    pub fn handle_interruption(&mut self, interruption: Interruption) {
        match interruption {
            Interruption::Began => {
                log::warn!("Interruption began while {}", self.transport.state.name());
                self.cancel_pending_capture("interrupted");
                match self.transport.state {
                    TransportState::Recording => {
                        let fault = self.capture.take_fault().unwrap_or(CaptureFault {
                            error: RecordingFailure::Interrupted.into(),
                            partial: None,
                        });
                        if let Err(e) = self.finish_recording(Some(fault)) {
                            log::debug!("Recording ended with {}", e);
                        }
                    }
                    TransportState::Playing => {
                        if self.pause().is_ok() {
                            self.paused_by_interruption = true;
                        }
                    }
                    TransportState::Idle | TransportState::Paused => {}
                }
            }
            Interruption::Ended { should_resume } => {
                log::info!("Interruption ended (resume: {})", should_resume);
                let resume = should_resume && self.paused_by_interruption && self.transport.state.is_paused();
                self.paused_by_interruption = false;
                if resume {
                    if let Err(e) = self.session.set_active(true) {
                        log::warn!("Failed to reactivate audio session: {}", e);
                        return;
                    }
                    if let Err(e) = self.play() {
                        log::warn!("Failed to resume playback: {}", e);
                    }
                }
            }
        }
    }

    // --- Observation ---

    pub fn state(&self) -> TransportState {
        self.transport.state
    }

    /// Transport position in seconds.
    pub fn current_playback_time(&self) -> f64 {
        match self.transport.started_at {
            Some(start) if self.transport.state.is_playing() || self.transport.state.is_recording() => {
                self.transport.anchor_secs + self.graph.now().seconds_since(start)
            }
            _ => self.transport.anchor_secs,
        }
    }

    /// Elapsed time of the recording in progress, 0.0 otherwise.
    pub fn recording_duration(&self) -> f64 {
        self.recording
            .as_ref()
            .map(|r| self.graph.now().seconds_since(r.started_at))
            .unwrap_or(0.0)
    }

    pub fn meter_level(&self) -> f32 {
        self.capture.meter_level()
    }

    /// A recording start is waiting for a wireless route to settle.
    pub fn is_negotiating_route(&self) -> bool {
        self.pending_capture.is_some()
    }

    /// Authoritative base duration, 0.0 when nothing is prepared.
    pub fn duration_secs(&self) -> f64 {
        self.prepared.as_ref().map(|p| p.duration_secs).unwrap_or(0.0)
    }

    /// 1-based positions of layers that could not be loaded.
    pub fn failed_layer_indices(&self) -> &[usize] {
        &self.failed_layers
    }

    /// Terminal error of the last recording pass; `None` on success.
    pub fn recording_error(&self) -> Option<&EngineError> {
        self.recording_error.as_ref()
    }

    /// Result of the last recording pass, including partial ones.
    pub fn last_recording(&self) -> Option<&RecordingResult> {
        self.last_recording.as_ref()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            state: self.transport.state,
            position_secs: self.current_playback_time(),
            duration_secs: self.duration_secs(),
            recording_duration_secs: self.recording_duration(),
            meter_level: self.meter_level(),
            negotiating_route: self.is_negotiating_route(),
            failed_layer_indices: self.failed_layers.clone(),
            recording_error: self.recording_error.clone(),
        }
    }

    // --- Internal helpers ---

    fn require_prepared(&self) -> Result<&PreparedSession, EngineError> {
        self.prepared.as_ref().ok_or(EngineError::EngineNotPrepared)
    }

    fn invalid(&self, operation: &'static str) -> EngineError {
        EngineError::InvalidState {
            operation,
            state: self.transport.state.name(),
        }
    }

    fn set_state(&mut self, state: TransportState) {
        if self.transport.state == state {
            return;
        }
        log::debug!("Transport {} → {}", self.transport.state.name(), state.name());
        self.transport.state = state;
        if let Some(observer) = &self.observer {
            observer.on_state_changed(state);
        }
    }

    fn start_playback_at(&mut self, position: f64) -> Result<(), EngineError> {
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(EngineError::EngineNotPrepared);
        };
        if !self.graph.is_running() {
            self.graph.start()?;
        }
        let summary = self
            .scheduler
            .start_all(&mut self.graph, &prepared.host, position, true)?;
        log::debug!(
            "Playback from {:.3}s: {} started, {} delayed, {} skipped",
            position,
            summary.started,
            summary.delayed,
            summary.skipped
        );
        self.transport.anchor_secs = position;
        self.transport.started_at = Some(self.graph.now());
        self.paused_by_interruption = false;
        self.set_state(TransportState::Playing);
        Ok(())
    }

    /// Start capture on a settled route, restoring the prior transport if
    /// any step fails.
    fn begin_recording_or_restore(&mut self) -> Result<(), EngineError> {
        let previous = self.transport;
        if let Err(e) = self.begin_recording() {
            log::error!("Recording did not start: {}", e);
            self.capture.discard(&mut self.graph);
            if let Some(prepared) = self.prepared.as_ref() {
                prepared.host.stop_all(&mut self.graph);
            }
            self.graph.stop();
            self.transport = Transport {
                started_at: None,
                ..previous
            };
            return Err(e);
        }
        Ok(())
    }

    fn cancel_pending_capture(&mut self, reason: &str) {
        if self.pending_capture.take().is_some() {
            log::info!("Recording start cancelled: {}", reason);
        }
    }

    fn begin_recording(&mut self) -> Result<(), EngineError> {
        let Some(prepared) = self.prepared.as_mut() else {
            return Err(EngineError::EngineNotPrepared);
        };
        let config = prepared.config.clone();

        prepared.host.stop_all(&mut self.graph);
        self.graph.stop();
        prepared.host.rebuild_voices(&mut self.graph)?;

        let format = self.negotiator.validate_input_format(&self.session)?;
        let settings = config.quality.output_settings(format.sample_rate);
        let file_name = format!(
            "layer_{}.{}",
            uuid::Uuid::new_v4(),
            settings.container.file_extension()
        );
        let path = config.output_directory.join(file_name);

        let sink = self.sink_factory.create(&path, &settings)?;
        self.capture
            .start(&mut self.graph, sink, &settings, config.input_gain)?;

        self.graph
            .start()
            .map_err(|e| RecordingFailure::EngineStart(e.to_string()))?;

        let monitor_layers = config.monitor_layers_while_recording;
        self.scheduler
            .start_all(&mut self.graph, &prepared.host, 0.0, monitor_layers)?;

        let started_at = self.graph.now();
        self.recording = Some(ActiveRecording {
            started_at,
            settings,
            monitored_layers: if monitor_layers { prepared.host.layers().len() } else { 0 },
        });
        self.transport.anchor_secs = 0.0;
        self.transport.started_at = Some(started_at);
        self.recording_error = None;
        self.paused_by_interruption = false;
        log::info!("Recording to {}", path.display());
        self.set_state(TransportState::Recording);
        Ok(())
    }

    /// Single exit for a recording pass: normal stop, capture fault, or
    /// interruption. The file is finalized and kept either way.
    fn finish_recording(&mut self, failure: Option<CaptureFault>) -> Result<RecordingResult, EngineError> {
        let Some(active) = self.recording.take() else {
            return Err(self.invalid("finish recording"));
        };
        let elapsed = self.graph.now().seconds_since(active.started_at);
        let stopped = self.capture.stop(&mut self.graph);
        self.stop_playback();
        self.reset_transport();

        let (failure_error, partial) = match failure {
            Some(fault) => (Some(fault.error), fault.partial),
            None => (None, None),
        };

        let file = match stopped {
            Ok(file) => file.or(partial),
            Err(e) => {
                log::error!("Failed to finalize recording: {}", e);
                return Err(self.fail_recording(failure_error.unwrap_or(e)));
            }
        };
        let Some(file) = file else {
            let error = failure_error.unwrap_or_else(|| EngineError::StorageError("recording produced no file".into()));
            return Err(self.fail_recording(error));
        };

        let duration_secs = if file.sample_rate > 0.0 {
            file.frames_written as f64 / file.sample_rate
        } else {
            elapsed
        };
        let (quality, base_track) = match self.prepared.as_ref() {
            Some(p) => (p.config.quality, p.host.base().path.display().to_string()),
            None => (SessionConfig::default().quality, String::new()),
        };
        let metadata = RecordingMetadata::new_layer(
            duration_secs,
            &file.path.to_string_lossy(),
            &file.checksum,
            file.sample_rate,
            failure_error.is_some(),
            &LayerDescription {
                quality,
                container: active.settings.container,
                base_track: &base_track,
                offset_secs: 0.0,
                monitored_layers: active.monitored_layers,
            },
        );
        if let Err(e) = metadata::write_metadata(&metadata, &file.path) {
            log::warn!("Recording kept without sidecar: {}", e);
        }

        let result = RecordingResult {
            file_path: file.path,
            duration_secs,
            frames_written: file.frames_written,
            sample_rate: file.sample_rate,
            checksum: file.checksum,
            metadata,
        };
        log::info!(
            "Recording finished: {:.2}s in {}{}",
            result.duration_secs,
            result.file_path.display(),
            if failure_error.is_some() { " (partial)" } else { "" }
        );
        if let Some(observer) = &self.observer {
            observer.on_recording_finished(&result);
        }
        self.last_recording = Some(result.clone());

        match failure_error {
            Some(error) => Err(self.fail_recording(error)),
            None => Ok(result),
        }
    }

    fn fail_recording(&mut self, error: EngineError) -> EngineError {
        log::error!("Recording failed: {}", error);
        if let Some(observer) = &self.observer {
            observer.on_error(&error);
        }
        self.recording_error = Some(error.clone());
        error
    }

    fn stop_playback(&mut self) {
        if let Some(prepared) = self.prepared.as_ref() {
            prepared.host.stop_all(&mut self.graph);
        }
        self.graph.stop();
    }

    /// Stop everything and return to `Idle` at position 0. With
    /// `release_sources`, voices and decoded sources are dropped too.
    fn teardown(&mut self, release_sources: bool) {
        self.cancel_pending_capture("engine stopped");
        if self.recording.is_some() {
            let fault = self.capture.take_fault();
            if let Err(e) = self.finish_recording(fault) {
                log::debug!("Recording ended with {}", e);
            }
        }
        self.capture.discard(&mut self.graph);
        self.stop_playback();
        self.paused_by_interruption = false;

        if release_sources {
            if let Some(mut prepared) = self.prepared.take() {
                prepared.host.detach_all(&mut self.graph);
            }
            self.graph.reset();
        }
        self.reset_transport();
    }

    fn reset_transport(&mut self) {
        self.transport.anchor_secs = 0.0;
        self.transport.started_at = None;
        self.set_state(TransportState::Idle);
    }
}
