use std::ops::Add;
use std::sync::Arc;

use crate::models::error::EngineError;
use crate::models::track::DecodedAudio;

/// Callback invoked when a captured input buffer is available.
///
/// Parameters:
/// - `samples`: Interleaved f32 samples.
/// - `sample_rate`: The actual sample rate of the delivered audio.
/// - `channels`: Number of channels (1 = mono, 2 = stereo interleaved).
///
/// Runs on the real-time audio thread: it must not block.
pub type AudioBufferCallback = Arc<dyn Fn(&[f32], f64, u16) + Send + Sync + 'static>;

/// Point on the graph's monotonic hardware clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct HostTime(pub f64);

impl HostTime {
    pub fn secs(&self) -> f64 {
        self.0
    }

    /// Seconds elapsed since `earlier`, never negative.
    pub fn seconds_since(&self, earlier: HostTime) -> f64 {
        (self.0 - earlier.0).max(0.0)
    }
}

impl Add<f64> for HostTime {
    type Output = HostTime;

    fn add(self, secs: f64) -> HostTime {
        HostTime(self.0 + secs)
    }
}

/// Handle to a playback voice attached to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u32);

/// Range of source frames a voice plays once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledSegment {
    pub start_frame: u64,
    pub frame_count: u64,
}

/// Processing graph: playback voices feeding one mixing stage, plus the
/// hardware input tap.
pub trait AudioGraph: Send {
    /// Attach a new voice for `audio`, connected to the mixing stage.
    fn attach_voice(&mut self, audio: &DecodedAudio) -> Result<VoiceId, EngineError>;

    /// Detach a voice. Unknown ids are ignored.
    fn detach_voice(&mut self, voice: VoiceId);

    fn voice_count(&self) -> usize;

    fn set_voice_volume(&mut self, voice: VoiceId, volume: f32);

    /// Gain applied at the mixing stage after all voices are summed.
    fn set_mixer_gain(&mut self, gain: f32);

    fn mixer_gain(&self) -> f32;

    /// Replace the voice's pending schedule with `segment`.
    fn schedule_segment(&mut self, voice: VoiceId, segment: ScheduledSegment) -> Result<(), EngineError>;

    /// Start the scheduled segment now, or at host time `at`.
    fn play_voice(&mut self, voice: VoiceId, at: Option<HostTime>);

    /// Halt the voice, keeping its read position.
    fn pause_voice(&mut self, voice: VoiceId);

    /// Halt the voice and discard its schedule.
    fn stop_voice(&mut self, voice: VoiceId);

    fn start(&mut self) -> Result<(), EngineError>;

    fn pause(&mut self);

    fn stop(&mut self);

    /// Stop and drop all pending schedules and the input tap.
    fn reset(&mut self);

    fn is_running(&self) -> bool;

    fn now(&self) -> HostTime;

    /// Install the single input tap. Fails if one is already installed.
    fn install_input_tap(&mut self, buffer_frames: u32, callback: AudioBufferCallback) -> Result<(), EngineError>;

    fn remove_input_tap(&mut self);
}
