//! In-process implementation of [`AudioGraph`].
//!
//! Voices and the mixing stage live behind one `parking_lot::Mutex`. The
//! platform's output callback pulls mixed audio through
//! [`RenderHandle::render`] and its input callback feeds captured buffers
//! through [`RenderHandle::push_input`]. The graph clock advances only while
//! the graph is running, one frame per rendered output frame.
//!
//! ```text
//! [voice 0] ─┐
//! [voice 1] ─┼→ Σ × mixer gain → render()
//! [voice N] ─┘
//! push_input() → [input tap]
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::EngineError;
use crate::models::route::StreamFormat;
use crate::models::track::DecodedAudio;
use crate::traits::audio_graph::{AudioBufferCallback, AudioGraph, HostTime, ScheduledSegment, VoiceId};

/// Playback status of one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Stopped,
    /// Scheduled to begin when the graph clock reaches `start_clock`.
    Waiting { start_clock: u64 },
    Playing,
    Paused,
}

/// Diagnostic view of a voice.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceInfo {
    pub id: VoiceId,
    pub status: VoiceStatus,
    pub segment: Option<ScheduledSegment>,
    pub volume: f32,
    /// Source frames consumed from the segment so far.
    pub frames_played: u64,
}

struct Voice {
    audio: DecodedAudio,
    volume: f32,
    segment: Option<ScheduledSegment>,
    cursor: f64,
    status: VoiceStatus,
}

impl Voice {
    fn next_sample(&mut self, step: f64) -> Option<f32> {
        let segment = self.segment?;
        if self.cursor >= segment.frame_count as f64 {
            self.status = VoiceStatus::Stopped;
            self.segment = None;
            return None;
        }
        let position = segment.start_frame as f64 + self.cursor;
        let index = position as usize;
        let samples = &self.audio.samples;
        let current = *samples.get(index)?;
        let next = samples.get(index + 1).copied().unwrap_or(current);
        let fraction = (position - index as f64) as f32;
        self.cursor += step;
        Some(current + (next - current) * fraction)
    }
}

struct GraphState {
    input: StreamFormat,
    voices: BTreeMap<VoiceId, Voice>,
    next_voice: u32,
    mixer_gain: f32,
    running: bool,
    clock_frames: u64,
    tap: Option<AudioBufferCallback>,
}

/// Software mixing graph.
pub struct SoftwareGraph {
    output: StreamFormat,
    state: Arc<Mutex<GraphState>>,
}

/// Cloneable handle used by platform audio callbacks.
#[derive(Clone)]
pub struct RenderHandle {
    output: StreamFormat,
    state: Arc<Mutex<GraphState>>,
}

impl SoftwareGraph {
    pub fn new(output: StreamFormat, input: StreamFormat) -> Self {
        Self {
            output,
            state: Arc::new(Mutex::new(GraphState {
                input,
                voices: BTreeMap::new(),
                next_voice: 0,
                mixer_gain: 1.0,
                running: false,
                clock_frames: 0,
                tap: None,
            })),
        }
    }

    pub fn input_format(&self) -> StreamFormat {
        self.state.lock().input
    }

    pub fn render_handle(&self) -> RenderHandle {
        RenderHandle {
            output: self.output,
            state: Arc::clone(&self.state),
        }
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        snapshot_voices(&self.state.lock())
    }
}

fn snapshot_voices(state: &GraphState) -> Vec<VoiceInfo> {
    state
        .voices
        .iter()
        .map(|(id, voice)| VoiceInfo {
            id: *id,
            status: voice.status,
            segment: voice.segment,
            volume: voice.volume,
            frames_played: voice.cursor as u64,
        })
        .collect()
}

impl RenderHandle {
    /// Mix one interleaved output buffer. Writes silence while stopped.
    pub fn render(&self, out: &mut [f32]) {
        let channels = self.output.channels.max(1) as usize;
        let frames = out.len() / channels;
        let mut state = self.state.lock();
        if !state.running {
            out.fill(0.0);
            return;
        }

        let output_rate = self.output.sample_rate;
        let gain = state.mixer_gain;
        let base_clock = state.clock_frames;
        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let clock = base_clock + i as u64;
            let mut sum = 0.0f32;
            for voice in state.voices.values_mut() {
                if let VoiceStatus::Waiting { start_clock } = voice.status {
                    if clock >= start_clock {
                        voice.status = VoiceStatus::Playing;
                    }
                }
                if voice.status != VoiceStatus::Playing {
                    continue;
                }
                let step = voice.audio.sample_rate / output_rate;
                if let Some(sample) = voice.next_sample(step) {
                    sum += sample * voice.volume;
                }
            }
            frame.fill(sum * gain);
        }
        state.clock_frames += frames as u64;
    }

    /// Deliver one interleaved input buffer to the installed tap.
    ///
    /// Returns false if the graph is stopped or no tap is installed.
    pub fn push_input(&self, samples: &[f32]) -> bool {
        let (tap, format) = {
            let state = self.state.lock();
            if !state.running {
                return false;
            }
            match &state.tap {
                Some(tap) => (Arc::clone(tap), state.input),
                None => return false,
            }
        };
        tap(samples, format.sample_rate, format.channels);
        true
    }

    /// Simulate the hardware switching the input format (e.g. a hands-free
    /// route at a lower rate).
    pub fn set_input_format(&self, format: StreamFormat) {
        self.state.lock().input = format;
    }

    pub fn clock_frames(&self) -> u64 {
        self.state.lock().clock_frames
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        snapshot_voices(&self.state.lock())
    }

    pub fn has_tap(&self) -> bool {
        self.state.lock().tap.is_some()
    }
}

impl AudioGraph for SoftwareGraph {
    fn attach_voice(&mut self, audio: &DecodedAudio) -> Result<VoiceId, EngineError> {
        if audio.sample_rate <= 0.0 {
            return Err(EngineError::GraphError(format!(
                "cannot attach voice at {} Hz",
                audio.sample_rate
            )));
        }
        let mut state = self.state.lock();
        let id = VoiceId(state.next_voice);
        state.next_voice += 1;
        state.voices.insert(
            id,
            Voice {
                audio: audio.clone(),
                volume: 1.0,
                segment: None,
                cursor: 0.0,
                status: VoiceStatus::Stopped,
            },
        );
        Ok(id)
    }

    fn detach_voice(&mut self, voice: VoiceId) {
        self.state.lock().voices.remove(&voice);
    }

    fn voice_count(&self) -> usize {
        self.state.lock().voices.len()
    }

    fn set_voice_volume(&mut self, voice: VoiceId, volume: f32) {
        if let Some(v) = self.state.lock().voices.get_mut(&voice) {
            v.volume = volume.clamp(0.0, 1.0);
        }
    }

    fn set_mixer_gain(&mut self, gain: f32) {
        self.state.lock().mixer_gain = gain.max(0.0);
    }

    fn mixer_gain(&self) -> f32 {
        self.state.lock().mixer_gain
    }

    fn schedule_segment(&mut self, voice: VoiceId, segment: ScheduledSegment) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        let v = state
            .voices
            .get_mut(&voice)
            .ok_or_else(|| EngineError::GraphError(format!("unknown voice {:?}", voice)))?;
        if segment.start_frame.saturating_add(segment.frame_count) > v.audio.frames() {
            return Err(EngineError::GraphError(format!(
                "segment {}+{} exceeds {} frames",
                segment.start_frame,
                segment.frame_count,
                v.audio.frames()
            )));
        }
        v.segment = Some(segment);
        v.cursor = 0.0;
        v.status = VoiceStatus::Stopped;
        Ok(())
    }

    fn play_voice(&mut self, voice: VoiceId, at: Option<HostTime>) {
        let output_rate = self.output.sample_rate;
        let mut state = self.state.lock();
        let clock = state.clock_frames;
        let Some(v) = state.voices.get_mut(&voice) else {
            return;
        };
        if v.segment.is_none() {
            return;
        }
        v.status = match at {
            Some(time) => {
                let start_clock = (time.secs() * output_rate).round().max(0.0) as u64;
                if start_clock > clock {
                    VoiceStatus::Waiting { start_clock }
                } else {
                    VoiceStatus::Playing
                }
            }
            None => VoiceStatus::Playing,
        };
    }

    fn pause_voice(&mut self, voice: VoiceId) {
        if let Some(v) = self.state.lock().voices.get_mut(&voice) {
            if matches!(v.status, VoiceStatus::Playing | VoiceStatus::Waiting { .. }) {
                v.status = VoiceStatus::Paused;
            }
        }
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        if let Some(v) = self.state.lock().voices.get_mut(&voice) {
            v.status = VoiceStatus::Stopped;
            v.segment = None;
            v.cursor = 0.0;
        }
    }

    fn start(&mut self) -> Result<(), EngineError> {
        if !self.output.is_valid() {
            return Err(EngineError::GraphError(format!(
                "invalid output format: {} Hz, {} channels",
                self.output.sample_rate, self.output.channels
            )));
        }
        self.state.lock().running = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().running = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.running = false;
        for v in state.voices.values_mut() {
            v.status = VoiceStatus::Stopped;
            v.segment = None;
            v.cursor = 0.0;
        }
    }

    fn reset(&mut self) {
        self.stop();
        self.state.lock().tap = None;
    }

    fn is_running(&self) -> bool {
        self.state.lock().running
    }

    fn now(&self) -> HostTime {
        HostTime(self.state.lock().clock_frames as f64 / self.output.sample_rate)
    }

    fn install_input_tap(&mut self, _buffer_frames: u32, callback: AudioBufferCallback) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.tap.is_some() {
            return Err(EngineError::GraphError("input tap already installed".into()));
        }
        state.tap = Some(callback);
        Ok(())
    }

    fn remove_input_tap(&mut self) {
        self.state.lock().tap = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn mono(rate: f64) -> StreamFormat {
        StreamFormat {
            sample_rate: rate,
            channels: 1,
        }
    }

    fn audio(samples: Vec<f32>, rate: f64) -> DecodedAudio {
        DecodedAudio {
            samples: samples.into(),
            sample_rate: rate,
            source_channels: 1,
        }
    }

    #[test]
    fn renders_scheduled_segment_with_gain() {
        let mut graph = SoftwareGraph::new(mono(100.0), mono(100.0));
        let handle = graph.render_handle();
        let voice = graph.attach_voice(&audio(vec![0.1, 0.2, 0.3, 0.4], 100.0)).unwrap();
        graph.set_mixer_gain(0.5);
        graph
            .schedule_segment(
                voice,
                ScheduledSegment {
                    start_frame: 1,
                    frame_count: 2,
                },
            )
            .unwrap();
        graph.start().unwrap();
        graph.play_voice(voice, None);

        let mut out = [0.0f32; 4];
        handle.render(&mut out);
        assert_abs_diff_eq!(out[0], 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(out[1], 0.15, epsilon = 1e-6);
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
        assert_eq!(graph.voices()[0].status, VoiceStatus::Stopped);
    }

    #[test]
    fn delayed_voice_waits_for_clock() {
        let mut graph = SoftwareGraph::new(mono(10.0), mono(10.0));
        let handle = graph.render_handle();
        let voice = graph.attach_voice(&audio(vec![1.0; 10], 10.0)).unwrap();
        graph
            .schedule_segment(
                voice,
                ScheduledSegment {
                    start_frame: 0,
                    frame_count: 10,
                },
            )
            .unwrap();
        graph.start().unwrap();
        let start = graph.now() + 0.3;
        graph.play_voice(voice, Some(start));

        let mut out = [0.0f32; 5];
        handle.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 0.0, 1.0, 1.0]);
        assert_abs_diff_eq!(graph.now().secs(), 0.5);
    }

    #[test]
    fn stopped_graph_renders_silence_and_holds_clock() {
        let mut graph = SoftwareGraph::new(mono(48_000.0), mono(48_000.0));
        let handle = graph.render_handle();
        let voice = graph.attach_voice(&audio(vec![1.0; 64], 48_000.0)).unwrap();
        graph
            .schedule_segment(
                voice,
                ScheduledSegment {
                    start_frame: 0,
                    frame_count: 64,
                },
            )
            .unwrap();
        graph.play_voice(voice, None);

        let mut out = [1.0f32; 16];
        handle.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(handle.clock_frames(), 0);
    }

    #[test]
    fn stereo_output_duplicates_mono_voice() {
        let output = StreamFormat {
            sample_rate: 100.0,
            channels: 2,
        };
        let mut graph = SoftwareGraph::new(output, mono(100.0));
        let handle = graph.render_handle();
        let voice = graph.attach_voice(&audio(vec![0.5; 4], 100.0)).unwrap();
        graph
            .schedule_segment(
                voice,
                ScheduledSegment {
                    start_frame: 0,
                    frame_count: 4,
                },
            )
            .unwrap();
        graph.start().unwrap();
        graph.play_voice(voice, None);

        let mut out = [0.0f32; 4];
        handle.render(&mut out);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5]);
        assert_eq!(handle.clock_frames(), 2);
    }

    #[test]
    fn voice_at_half_rate_advances_half_step() {
        let mut graph = SoftwareGraph::new(mono(200.0), mono(200.0));
        let handle = graph.render_handle();
        let voice = graph.attach_voice(&audio(vec![0.0, 1.0, 0.0], 100.0)).unwrap();
        graph
            .schedule_segment(
                voice,
                ScheduledSegment {
                    start_frame: 0,
                    frame_count: 3,
                },
            )
            .unwrap();
        graph.start().unwrap();
        graph.play_voice(voice, None);

        let mut out = [0.0f32; 4];
        handle.render(&mut out);
        assert_abs_diff_eq!(out[1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(out[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn segment_out_of_range_is_rejected() {
        let mut graph = SoftwareGraph::new(mono(100.0), mono(100.0));
        let voice = graph.attach_voice(&audio(vec![0.0; 4], 100.0)).unwrap();
        let result = graph.schedule_segment(
            voice,
            ScheduledSegment {
                start_frame: 3,
                frame_count: 2,
            },
        );
        assert!(matches!(result, Err(EngineError::GraphError(_))));
    }

    #[test]
    fn input_tap_receives_buffers_while_running() {
        let mut graph = SoftwareGraph::new(mono(48_000.0), mono(44_100.0));
        let handle = graph.render_handle();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        graph
            .install_input_tap(
                1024,
                Arc::new(move |samples: &[f32], rate: f64, channels: u16| {
                    assert_eq!(samples.len(), 3);
                    assert_eq!(rate, 44_100.0);
                    assert_eq!(channels, 1);
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(!handle.push_input(&[0.0; 3]));
        graph.start().unwrap();
        assert!(handle.push_input(&[0.0; 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second = graph.install_input_tap(1024, Arc::new(|_: &[f32], _: f64, _: u16| {}));
        assert!(second.is_err());

        graph.remove_input_tap();
        assert!(!handle.push_input(&[0.0; 3]));
    }
}
