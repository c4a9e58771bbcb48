//! Start-parameter computation that phase-locks every source to one
//! transport position.
//!
//! A layer with offset `o` seen from transport time `t`:
//! ```text
//!  t < o   →  Delayed   (start at frame 0 after o − t seconds)
//!  t ≥ o   →  Immediate (skip (t − o) × rate frames), or Skip past the end
//! ```

use crate::models::error::EngineError;
use crate::models::track::TrackSource;
use crate::traits::audio_graph::{AudioGraph, ScheduledSegment, VoiceId};

use super::host::GraphHost;

/// How one source joins the transport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourcePlan {
    /// Start now, from `segment.start_frame`.
    Immediate { segment: ScheduledSegment },
    /// Start from frame 0 once `delay_secs` have elapsed.
    Delayed { delay_secs: f64, segment: ScheduledSegment },
    /// Transport is past this source's end.
    Skip,
}

fn frames_at(seconds: f64, sample_rate: f64) -> u64 {
    (seconds * sample_rate).round().max(0.0) as u64
}

fn remaining_from(start_frame: u64, length: u64) -> SourcePlan {
    if start_frame >= length {
        return SourcePlan::Skip;
    }
    SourcePlan::Immediate {
        segment: ScheduledSegment {
            start_frame,
            frame_count: length - start_frame,
        },
    }
}

/// Plan for the base track at transport time `t`.
pub fn plan_base(t: f64, sample_rate: f64, length_frames: u64) -> SourcePlan {
    if sample_rate <= 0.0 {
        return SourcePlan::Skip;
    }
    remaining_from(frames_at(t.max(0.0), sample_rate), length_frames)
}

/// Plan for a layer with signed `offset_secs` at transport time `t`.
pub fn plan_layer(t: f64, offset_secs: f64, sample_rate: f64, length_frames: u64) -> SourcePlan {
    if sample_rate <= 0.0 || length_frames == 0 {
        return SourcePlan::Skip;
    }
    if t < offset_secs {
        return SourcePlan::Delayed {
            delay_secs: offset_secs - t,
            segment: ScheduledSegment {
                start_frame: 0,
                frame_count: length_frames,
            },
        };
    }
    remaining_from(frames_at(t - offset_secs, sample_rate), length_frames)
}

/// Plan for any source.
pub fn plan_source(t: f64, source: &TrackSource) -> SourcePlan {
    match source.layer_index() {
        None => plan_base(t, source.sample_rate(), source.length_frames()),
        Some(_) => plan_layer(t, source.offset_secs(), source.sample_rate(), source.length_frames()),
    }
}

/// Counts of what one scheduling pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub started: usize,
    pub delayed: usize,
    pub skipped: usize,
}

/// Applies source plans to the graph's voices.
#[derive(Debug, Default)]
pub struct PlaybackScheduler;

impl PlaybackScheduler {
    /// Stop every voice, then schedule the base and (optionally) all layers
    /// from transport time `t`. Mixer headroom is set for the sources
    /// scheduled.
    ///
    /// Delays are measured from a single clock reading taken after the
    /// voices are stopped, so all delayed layers share one reference.
    pub fn start_all<G: AudioGraph>(
        &self,
        graph: &mut G,
        host: &GraphHost,
        t: f64,
        include_layers: bool,
    ) -> Result<ScheduleSummary, EngineError> {
        host.stop_all(graph);
        host.apply_headroom(graph, include_layers);

        let now = graph.now();
        let mut summary = ScheduleSummary::default();
        for (voice, source) in host.bindings() {
            if source.layer_index().is_some() && !include_layers {
                continue;
            }
            match plan_source(t, source) {
                SourcePlan::Immediate { segment } => {
                    Self::schedule(graph, voice, source, segment)?;
                    graph.play_voice(voice, None);
                    summary.started += 1;
                }
                SourcePlan::Delayed { delay_secs, segment } => {
                    Self::schedule(graph, voice, source, segment)?;
                    graph.play_voice(voice, Some(now + delay_secs));
                    summary.delayed += 1;
                }
                SourcePlan::Skip => {
                    log::debug!("{} skipped at t={:.3}s: past end", describe(source), t);
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    fn schedule<G: AudioGraph>(
        graph: &mut G,
        voice: VoiceId,
        source: &TrackSource,
        segment: ScheduledSegment,
    ) -> Result<(), EngineError> {
        log::debug!(
            "{} scheduled from frame {} ({} frames)",
            describe(source),
            segment.start_frame,
            segment.frame_count
        );
        graph.schedule_segment(voice, segment)
    }
}

fn describe(source: &TrackSource) -> String {
    match source.layer_index() {
        None => "base".to_string(),
        Some(index) => format!("layer {}", index + 1),
    }
}
