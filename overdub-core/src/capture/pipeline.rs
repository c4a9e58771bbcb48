use std::fs;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use parking_lot::Mutex;

use crate::models::config::OutputFileSettings;
use crate::models::error::{EngineError, RecordingFailure};
use crate::processing::meter;
use crate::processing::mixdown::{self, Resampler};
use crate::traits::audio_graph::AudioGraph;
use crate::traits::recording_sink::{FinalizedFile, RecordingSink};

use super::failure_counter::WriteFailureCounter;

/// Consecutive failed writes that abort a recording.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

/// Requested input tap buffer size, in frames.
pub const TAP_BUFFER_FRAMES: u32 = 4096;

/// Terminal capture failure raised on the audio thread, with the partial
/// file finalized on the owning thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureFault {
    pub error: EngineError,
    /// What was written before the abort. The file is kept on disk.
    pub partial: Option<FinalizedFile>,
}

/// State touched by the real-time input callback.
struct CaptureShared {
    sink: Mutex<Option<Box<dyn RecordingSink>>>,
    failures: WriteFailureCounter,
    meter: AtomicF32,
    aborted: AtomicBool,
    fault: Mutex<Option<EngineError>>,
    buffers_seen: AtomicU64,
    resampler: Resampler,
    input_gain: f32,
}

impl CaptureShared {
    fn process_buffer(&self, samples: &[f32], sample_rate: f64, channels: u16) {
        if self.aborted.load(Ordering::Acquire) {
            return;
        }
        self.buffers_seen.fetch_add(1, Ordering::Relaxed);

        let mono = mixdown::downmix_to_mono(samples, channels.max(1) as usize);
        // Published before the write so metering survives a failure streak.
        self.meter.store(meter::normalized_level(&mono), Ordering::Relaxed);

        let mut output = self.resampler.process(&mono, sample_rate);
        mixdown::apply_gain_limited(&mut output, self.input_gain);

        let mut sink_guard = self.sink.lock();
        let Some(sink) = sink_guard.as_mut() else {
            return;
        };

        match sink.append(&output) {
            Ok(()) => {
                if self.failures.count() > 0 {
                    log::info!("Capture writes recovered");
                }
                self.failures.reset();
            }
            Err(e) => {
                let streak = self.failures.record_failure();
                log::warn!(
                    "Capture write failed ({}/{}), buffer dropped: {}",
                    streak,
                    MAX_CONSECUTIVE_WRITE_FAILURES,
                    e
                );
                if streak < MAX_CONSECUTIVE_WRITE_FAILURES {
                    return;
                }

                // The sink stays in place; it is finalized off the audio thread.
                self.aborted.store(true, Ordering::Release);
                drop(sink_guard);

                log::error!("Capture aborted after {} consecutive write failures", streak);
                *self.fault.lock() = Some(
                    RecordingFailure::PersistentWriteFailure {
                        consecutive_failures: streak,
                    }
                    .into(),
                );
            }
        }
    }

    /// Close the sink of an aborted capture, keeping its file.
    fn finalize_partial(&self) -> Option<FinalizedFile> {
        let sink = self.sink.lock().take()?;
        match sink.finalize() {
            Ok(file) => Some(file),
            Err(e) => {
                log::error!("Failed to finalize partial recording: {}", e);
                None
            }
        }
    }
}

/// Streams microphone buffers into a [`RecordingSink`] through the graph's
/// input tap, with metering and write-failure containment.
///
/// ```text
/// [input tap] → downmix → meter ─→ level
///                  ↓
///              resample → gain/limit → sink.append()
///                                         ↓ (3 consecutive failures)
///                                     abort → fault; take_fault() finalizes
/// ```
#[derive(Default)]
pub struct CapturePipeline {
    shared: Option<Arc<CaptureShared>>,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the input tap and start streaming into `sink`.
    ///
    /// On failure the sink is finalized and its file removed.
    pub fn start<G: AudioGraph>(
        &mut self,
        graph: &mut G,
        sink: Box<dyn RecordingSink>,
        settings: &OutputFileSettings,
        input_gain: f32,
    ) -> Result<(), EngineError> {
        if self.shared.is_some() {
            discard_sink(sink);
            return Err(EngineError::GraphError("capture already active".into()));
        }

        let shared = Arc::new(CaptureShared {
            sink: Mutex::new(Some(sink)),
            failures: WriteFailureCounter::new(),
            meter: AtomicF32::new(0.0),
            aborted: AtomicBool::new(false),
            fault: Mutex::new(None),
            buffers_seen: AtomicU64::new(0),
            resampler: Resampler::new(settings.sample_rate),
            input_gain,
        });

        let callback_state = Arc::clone(&shared);
        let callback = Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
            callback_state.process_buffer(samples, sample_rate, channels);
        });

        if let Err(e) = graph.install_input_tap(TAP_BUFFER_FRAMES, callback) {
            if let Some(sink) = shared.sink.lock().take() {
                discard_sink(sink);
            }
            return Err(e);
        }

        log::info!(
            "Capture started: {:?} at {} Hz, gain {:.2}",
            settings.container,
            settings.sample_rate,
            input_gain
        );
        self.shared = Some(shared);
        Ok(())
    }

    /// Remove the tap and finalize the sink, keeping the file.
    ///
    /// Returns the finalized file, or `None` once a fault has claimed it.
    pub fn stop<G: AudioGraph>(&mut self, graph: &mut G) -> Result<Option<FinalizedFile>, EngineError> {
        graph.remove_input_tap();
        let Some(shared) = self.shared.take() else {
            return Ok(None);
        };
        shared.aborted.store(true, Ordering::Release);

        let Some(sink) = shared.sink.lock().take() else {
            return Ok(None);
        };
        let file = sink.finalize()?;
        log::info!(
            "Capture stopped: {} frames written to {}",
            file.frames_written,
            file.path.display()
        );
        Ok(Some(file))
    }

    /// Remove the tap and delete whatever was written.
    pub fn discard<G: AudioGraph>(&mut self, graph: &mut G) {
        graph.remove_input_tap();
        if let Some(shared) = self.shared.take() {
            shared.aborted.store(true, Ordering::Release);
            if let Some(sink) = shared.sink.lock().take() {
                discard_sink(sink);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_some()
    }

    /// Normalized level of the most recent buffer, 0.0 when not capturing.
    pub fn meter_level(&self) -> f32 {
        self.shared
            .as_ref()
            .map(|s| s.meter.load(Ordering::Relaxed))
            .unwrap_or(0.0)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.shared.as_ref().map(|s| s.failures.count()).unwrap_or(0)
    }

    pub fn buffers_seen(&self) -> u64 {
        self.shared
            .as_ref()
            .map(|s| s.buffers_seen.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Take the fault raised by the audio thread, if any, finalizing what
    /// was written before the abort.
    pub fn take_fault(&self) -> Option<CaptureFault> {
        let shared = self.shared.as_ref()?;
        let error = shared.fault.lock().take()?;
        Some(CaptureFault {
            error,
            partial: shared.finalize_partial(),
        })
    }
}

fn discard_sink(sink: Box<dyn RecordingSink>) {
    let path = sink.path().to_path_buf();
    if let Err(e) = sink.finalize() {
        log::warn!("Failed to close discarded recording: {}", e);
    }
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove discarded recording {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::software::{RenderHandle, SoftwareGraph};
    use crate::models::config::QualityPreset;
    use crate::models::route::StreamFormat;
    use crate::testing::FlakySinkFactory;
    use crate::traits::recording_sink::SinkFactory;
    use approx::assert_abs_diff_eq;
    use std::path::Path;

    fn running_graph(input_rate: f64) -> (SoftwareGraph, RenderHandle) {
        let mut graph = SoftwareGraph::new(
            StreamFormat {
                sample_rate: 48_000.0,
                channels: 2,
            },
            StreamFormat {
                sample_rate: input_rate,
                channels: 1,
            },
        );
        graph.start().unwrap();
        let handle = graph.render_handle();
        (graph, handle)
    }

    fn start(
        pipeline: &mut CapturePipeline,
        graph: &mut SoftwareGraph,
        factory: &FlakySinkFactory,
        input_rate: f64,
        gain: f32,
    ) {
        let settings = QualityPreset::Wav.output_settings(input_rate);
        let sink = factory.create(Path::new("take.wav"), &settings).unwrap();
        pipeline.start(graph, sink, &settings, gain).unwrap();
    }

    #[test]
    fn three_consecutive_failures_abort() {
        let (mut graph, handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        factory.script_failures(&[false, true, true, true, false]);
        for _ in 0..5 {
            handle.push_input(&[0.5; 32]);
        }
        // The audio thread only flags the abort.
        assert!(!factory.finalized());

        let fault = pipeline.take_fault().expect("fault after third failure");
        assert_eq!(
            fault.error,
            EngineError::RecordingFailed(RecordingFailure::PersistentWriteFailure {
                consecutive_failures: 3
            })
        );
        let partial = fault.partial.expect("partial file kept");
        assert_eq!(partial.frames_written, 32);
        assert!(factory.finalized());
        // Buffers after the abort are ignored.
        assert_eq!(pipeline.buffers_seen(), 4);
    }

    #[test]
    fn interleaved_success_resets_streak() {
        let (mut graph, handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        factory.script_failures(&[true, true, false, true, true]);
        for _ in 0..5 {
            handle.push_input(&[0.1; 16]);
        }

        assert!(pipeline.take_fault().is_none());
        assert_eq!(pipeline.consecutive_failures(), 2);
        assert_eq!(factory.written().len(), 16);

        handle.push_input(&[0.1; 16]);
        assert_eq!(pipeline.consecutive_failures(), 0);
    }

    #[test]
    fn meter_updates_during_failure_streak() {
        let (mut graph, handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        factory.script_failures(&[true]);
        handle.push_input(&[1.0, -1.0, 1.0, -1.0]);
        assert_abs_diff_eq!(pipeline.meter_level(), 1.0, epsilon = 1e-6);
        assert_eq!(pipeline.consecutive_failures(), 1);

        handle.push_input(&[0.0; 4]);
        assert_eq!(pipeline.meter_level(), 0.0);
    }

    #[test]
    fn input_is_resampled_and_gain_limited() {
        let (mut graph, handle) = running_graph(96_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        // Wav caps at 48 kHz, so 96 kHz input is halved.
        start(&mut pipeline, &mut graph, &factory, 96_000.0, 3.0);

        handle.push_input(&[0.5; 64]);
        let written = factory.written();
        assert_eq!(written.len(), 32);
        assert!(written.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn stop_finalizes_and_removes_tap() {
        let (mut graph, handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        handle.push_input(&[0.2; 100]);
        let file = pipeline.stop(&mut graph).unwrap().unwrap();
        assert_eq!(file.frames_written, 100);
        assert!(!handle.has_tap());
        assert!(!pipeline.is_active());
        assert_eq!(pipeline.meter_level(), 0.0);
        assert!(pipeline.stop(&mut graph).unwrap().is_none());
    }

    #[test]
    fn second_start_is_rejected() {
        let (mut graph, _handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        let settings = QualityPreset::Wav.output_settings(48_000.0);
        let sink = factory.create(Path::new("again.wav"), &settings).unwrap();
        assert!(pipeline.start(&mut graph, sink, &settings, 1.0).is_err());
        assert!(pipeline.is_active());
    }

    #[test]
    fn concurrent_feed_and_inspection() {
        let (mut graph, handle) = running_graph(48_000.0);
        let factory = FlakySinkFactory::new();
        let mut pipeline = CapturePipeline::new();
        start(&mut pipeline, &mut graph, &factory, 48_000.0, 1.0);

        let feeder = std::thread::spawn(move || {
            for _ in 0..200 {
                handle.push_input(&[0.25; 64]);
            }
        });
        while !feeder.is_finished() {
            assert!(pipeline.consecutive_failures() < MAX_CONSECUTIVE_WRITE_FAILURES);
            let _ = pipeline.meter_level();
        }
        feeder.join().unwrap();

        assert_eq!(pipeline.buffers_seen(), 200);
        assert_eq!(factory.written().len(), 200 * 64);
    }
}
