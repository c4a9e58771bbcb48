//! Fakes for the host traits, shared by unit tests across the crate.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::graph::software::SoftwareGraph;
use crate::models::config::OutputFileSettings;
use crate::models::error::{EngineError, RecordingFailure};
use crate::models::recording_result::RecordingResult;
use crate::models::route::{
    AudioRoute, Interruption, PortKind, RecordPermission, RoutePort, SessionOptions, StreamFormat,
};
use crate::models::state::TransportState;
use crate::models::track::DecodedAudio;
use crate::traits::audio_graph::{AudioBufferCallback, AudioGraph, HostTime, ScheduledSegment, VoiceId};
use crate::traits::audio_session::{AudioSession, InterruptionHandler};
use crate::traits::clock::Clock;
use crate::traits::engine_observer::EngineObserver;
use crate::traits::recording_sink::{FinalizedFile, RecordingSink, SinkFactory};
use crate::traits::track_decoder::TrackDecoder;

pub fn port(kind: PortKind) -> RoutePort {
    RoutePort {
        id: format!("{:?}", kind).to_lowercase(),
        name: format!("{:?}", kind),
        kind,
    }
}

pub fn route(inputs: &[PortKind], outputs: &[PortKind]) -> AudioRoute {
    AudioRoute {
        inputs: inputs.iter().copied().map(port).collect(),
        outputs: outputs.iter().copied().map(port).collect(),
    }
}

pub fn wired_route() -> AudioRoute {
    route(&[PortKind::BuiltInMic], &[PortKind::WiredHeadphones])
}

pub fn speaker_route() -> AudioRoute {
    route(&[PortKind::BuiltInMic], &[PortKind::BuiltInSpeaker])
}

pub fn mono(sample_rate: f64) -> StreamFormat {
    StreamFormat {
        sample_rate,
        channels: 1,
    }
}

/// Constant-level mono audio.
pub fn tone(duration_secs: f64, sample_rate: f64) -> DecodedAudio {
    let frames = (duration_secs * sample_rate).round() as usize;
    DecodedAudio {
        samples: vec![0.25; frames].into(),
        sample_rate,
        source_channels: 1,
    }
}

struct SessionState {
    route: AudioRoute,
    scripted_routes: VecDeque<AudioRoute>,
    input_format: StreamFormat,
    permission: RecordPermission,
    permission_answer: bool,
    permission_requests: u32,
    storage: Result<u64, EngineError>,
    configure_error: Option<String>,
    active: bool,
    activations: u32,
    route_queries: u32,
    preferred_input: Option<String>,
    handler: Option<InterruptionHandler>,
}

/// Scriptable [`AudioSession`]. Clones share state, so a test keeps one
/// handle while the engine owns another.
#[derive(Clone)]
pub struct FakeSession {
    state: Arc<Mutex<SessionState>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SessionState {
                route: wired_route(),
                scripted_routes: VecDeque::new(),
                input_format: mono(48_000.0),
                permission: RecordPermission::Granted,
                permission_answer: true,
                permission_requests: 0,
                storage: Ok(10 * 1024 * 1024 * 1024),
                configure_error: None,
                active: false,
                activations: 0,
                route_queries: 0,
                preferred_input: None,
                handler: None,
            })),
        }
    }

    pub fn set_route(&self, route: AudioRoute) {
        self.state.lock().route = route;
    }

    /// Routes returned by successive `current_route` calls. The last one sticks.
    pub fn script_routes(&self, routes: Vec<AudioRoute>) {
        self.state.lock().scripted_routes = routes.into();
    }

    pub fn set_input_format(&self, format: StreamFormat) {
        self.state.lock().input_format = format;
    }

    pub fn set_permission(&self, permission: RecordPermission, answer: bool) {
        let mut state = self.state.lock();
        state.permission = permission;
        state.permission_answer = answer;
    }

    pub fn set_storage(&self, storage: Result<u64, EngineError>) {
        self.state.lock().storage = storage;
    }

    pub fn fail_configure(&self, reason: &str) {
        self.state.lock().configure_error = Some(reason.to_string());
    }

    pub fn fire_interruption(&self, interruption: Interruption) {
        let handler = self.state.lock().handler.clone();
        if let Some(handler) = handler {
            handler(interruption);
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn activations(&self) -> u32 {
        self.state.lock().activations
    }

    pub fn route_queries(&self) -> u32 {
        self.state.lock().route_queries
    }

    pub fn permission_requests(&self) -> u32 {
        self.state.lock().permission_requests
    }

    pub fn preferred_input(&self) -> Option<String> {
        self.state.lock().preferred_input.clone()
    }
}

impl AudioSession for FakeSession {
    fn configure_for_overdub(&mut self, _options: &SessionOptions) -> Result<(), EngineError> {
        match &self.state.lock().configure_error {
            Some(reason) => Err(EngineError::ConfigurationFailed(reason.clone())),
            None => Ok(()),
        }
    }

    fn set_active(&mut self, active: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        state.active = active;
        if active {
            state.activations += 1;
        }
        Ok(())
    }

    fn current_route(&self) -> AudioRoute {
        let mut state = self.state.lock();
        state.route_queries += 1;
        if let Some(next) = state.scripted_routes.pop_front() {
            state.route = next;
        }
        state.route.clone()
    }

    fn set_preferred_input(&mut self, port_id: &str) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.route.inputs.iter().any(|p| p.id == port_id) {
            return Err(EngineError::ConfigurationFailed(format!("unknown input {}", port_id)));
        }
        state.preferred_input = Some(port_id.to_string());
        Ok(())
    }

    fn input_format(&self) -> StreamFormat {
        self.state.lock().input_format
    }

    fn record_permission(&self) -> RecordPermission {
        self.state.lock().permission
    }

    fn request_record_permission(&mut self) -> bool {
        let mut state = self.state.lock();
        state.permission_requests += 1;
        state.permission = if state.permission_answer {
            RecordPermission::Granted
        } else {
            RecordPermission::Denied
        };
        state.permission_answer
    }

    fn available_storage_bytes(&self, _directory: &Path) -> Result<u64, EngineError> {
        self.state.lock().storage.clone()
    }

    fn set_interruption_handler(&mut self, handler: InterruptionHandler) {
        self.state.lock().handler = Some(handler);
    }
}

/// [`Clock`] that records requested sleeps instead of waiting.
#[derive(Default)]
pub struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl FakeClock {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// [`Clock`] whose sleeps return only as the test releases them.
pub struct GatedClock {
    permits: Receiver<()>,
    gate: Sender<()>,
}

impl Default for GatedClock {
    fn default() -> Self {
        let (gate, permits) = unbounded();
        Self { permits, gate }
    }
}

impl GatedClock {
    pub fn release(&self, sleeps: usize) {
        for _ in 0..sleeps {
            let _ = self.gate.send(());
        }
    }
}

impl Clock for GatedClock {
    fn sleep(&self, _duration: Duration) {
        let _ = self.permits.recv();
    }
}

/// [`TrackDecoder`] serving in-memory audio by path.
#[derive(Default)]
pub struct FakeDecoder {
    tracks: HashMap<PathBuf, Result<DecodedAudio, String>>,
}

impl FakeDecoder {
    pub fn with_track(mut self, path: &str, audio: DecodedAudio) -> Self {
        self.tracks.insert(PathBuf::from(path), Ok(audio));
        self
    }

    pub fn with_failure(mut self, path: &str, reason: &str) -> Self {
        self.tracks.insert(PathBuf::from(path), Err(reason.to_string()));
        self
    }
}

impl TrackDecoder for FakeDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedAudio, EngineError> {
        let load_error = |reason: &str| EngineError::TrackLoadFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        match self.tracks.get(path) {
            Some(Ok(audio)) => Ok(audio.clone()),
            Some(Err(reason)) => Err(load_error(reason)),
            None => Err(load_error("no such file")),
        }
    }
}

#[derive(Default)]
struct SinkState {
    script: VecDeque<bool>,
    written: Vec<f32>,
    created: Vec<PathBuf>,
    finalized: bool,
    create_error: Option<RecordingFailure>,
}

/// In-memory sink factory whose appends fail on a script.
#[derive(Clone, Default)]
pub struct FlakySinkFactory {
    state: Arc<Mutex<SinkState>>,
}

impl FlakySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcome of the next appends, `true` meaning the write fails.
    /// Appends past the end of the script succeed.
    pub fn script_failures(&self, failures: &[bool]) {
        self.state.lock().script = failures.iter().copied().collect();
    }

    pub fn fail_create(&self, failure: RecordingFailure) {
        self.state.lock().create_error = Some(failure);
    }

    pub fn written(&self) -> Vec<f32> {
        self.state.lock().written.clone()
    }

    pub fn created(&self) -> Vec<PathBuf> {
        self.state.lock().created.clone()
    }

    pub fn finalized(&self) -> bool {
        self.state.lock().finalized
    }
}

impl SinkFactory for FlakySinkFactory {
    fn create(&self, path: &Path, settings: &OutputFileSettings) -> Result<Box<dyn RecordingSink>, EngineError> {
        let mut state = self.state.lock();
        if let Some(failure) = state.create_error.clone() {
            return Err(failure.into());
        }
        state.created.push(path.to_path_buf());
        state.written.clear();
        state.finalized = false;
        Ok(Box::new(FlakySink {
            path: path.to_path_buf(),
            sample_rate: settings.sample_rate,
            frames: 0,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FlakySink {
    path: PathBuf,
    sample_rate: f64,
    frames: u64,
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink for FlakySink {
    fn append(&mut self, samples: &[f32]) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.script.pop_front().unwrap_or(false) {
            return Err(EngineError::StorageError("no space left on device".into()));
        }
        state.written.extend_from_slice(samples);
        self.frames += samples.len() as u64;
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<FinalizedFile, EngineError> {
        self.state.lock().finalized = true;
        Ok(FinalizedFile {
            path: self.path,
            frames_written: self.frames,
            sample_rate: self.sample_rate,
            checksum: "0".repeat(64),
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn frames_written(&self) -> u64 {
        self.frames
    }
}

/// [`EngineObserver`] that keeps every notification.
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<TransportState>>,
    pub ticks: Mutex<Vec<(f64, f32)>>,
    pub errors: Mutex<Vec<EngineError>>,
    pub finished: Mutex<Vec<RecordingResult>>,
}

impl EngineObserver for RecordingObserver {
    fn on_state_changed(&self, state: TransportState) {
        self.states.lock().push(state);
    }

    fn on_tick(&self, position_secs: f64, meter_level: f32) {
        self.ticks.lock().push((position_secs, meter_level));
    }

    fn on_error(&self, error: &EngineError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}

/// [`SoftwareGraph`] whose `start` can be made to fail.
pub struct FaultyGraph {
    inner: SoftwareGraph,
    fail_start: Arc<AtomicBool>,
}

impl FaultyGraph {
    pub fn new(inner: SoftwareGraph) -> (Self, Arc<AtomicBool>) {
        let fail_start = Arc::new(AtomicBool::new(false));
        (
            Self {
                inner,
                fail_start: Arc::clone(&fail_start),
            },
            fail_start,
        )
    }
}

impl AudioGraph for FaultyGraph {
    fn attach_voice(&mut self, audio: &DecodedAudio) -> Result<VoiceId, EngineError> {
        self.inner.attach_voice(audio)
    }

    fn detach_voice(&mut self, voice: VoiceId) {
        self.inner.detach_voice(voice)
    }

    fn voice_count(&self) -> usize {
        self.inner.voice_count()
    }

    fn set_voice_volume(&mut self, voice: VoiceId, volume: f32) {
        self.inner.set_voice_volume(voice, volume)
    }

    fn set_mixer_gain(&mut self, gain: f32) {
        self.inner.set_mixer_gain(gain)
    }

    fn mixer_gain(&self) -> f32 {
        self.inner.mixer_gain()
    }

    fn schedule_segment(&mut self, voice: VoiceId, segment: ScheduledSegment) -> Result<(), EngineError> {
        self.inner.schedule_segment(voice, segment)
    }

    fn play_voice(&mut self, voice: VoiceId, at: Option<HostTime>) {
        self.inner.play_voice(voice, at)
    }

    fn pause_voice(&mut self, voice: VoiceId) {
        self.inner.pause_voice(voice)
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        self.inner.stop_voice(voice)
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(EngineError::GraphError("output device unavailable".into()));
        }
        self.inner.start()
    }

    fn pause(&mut self) {
        self.inner.pause()
    }

    fn stop(&mut self) {
        self.inner.stop()
    }

    fn reset(&mut self) {
        self.inner.reset()
    }

    fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    fn now(&self) -> HostTime {
        self.inner.now()
    }

    fn install_input_tap(&mut self, buffer_frames: u32, callback: AudioBufferCallback) -> Result<(), EngineError> {
        self.inner.install_input_tap(buffer_frames, callback)
    }

    fn remove_input_tap(&mut self) {
        self.inner.remove_input_tap()
    }
}
