use crate::models::config::SessionConfig;
use crate::models::error::EngineError;
use crate::models::track::TrackSource;
use crate::traits::audio_graph::{AudioGraph, VoiceId};

/// Mixing attenuation for `active_sources` summed correlated sources.
pub fn headroom_gain(active_sources: usize) -> f32 {
    if active_sources <= 1 {
        return 1.0;
    }
    1.0 / (active_sources as f32).sqrt()
}

/// Owns the decoded sources and the playback voice bound to each.
///
/// Voices are disposable: [`GraphHost::rebuild_voices`] detaches and
/// re-attaches them while the decoded sources stay untouched.
pub struct GraphHost {
    base: TrackSource,
    layers: Vec<TrackSource>,
    base_voice: Option<VoiceId>,
    layer_voices: Vec<VoiceId>,
    base_volume: f32,
    layer_volume: f32,
    gain: f32,
}

impl GraphHost {
    /// Attach one voice per source and set the mixing-stage headroom.
    pub fn build<G: AudioGraph>(
        graph: &mut G,
        base: TrackSource,
        layers: Vec<TrackSource>,
        config: &SessionConfig,
    ) -> Result<Self, EngineError> {
        let mut host = Self {
            gain: headroom_gain(1 + layers.len()),
            base,
            layers,
            base_voice: None,
            layer_voices: Vec::new(),
            base_volume: config.base_monitor_volume,
            layer_volume: config.layer_monitor_volume,
        };
        if let Err(e) = host.attach_all(graph) {
            host.detach_all(graph);
            return Err(e);
        }
        log::info!(
            "Graph built: base + {} layers, headroom gain {:.3}",
            host.layers.len(),
            host.gain
        );
        Ok(host)
    }

    /// Detach every voice and attach fresh ones to the same mixing stage.
    pub fn rebuild_voices<G: AudioGraph>(&mut self, graph: &mut G) -> Result<(), EngineError> {
        self.detach_all(graph);
        self.attach_all(graph)?;
        log::debug!("Voices rebuilt ({} attached)", self.voice_count());
        Ok(())
    }

    /// Detach every voice. Decoded sources are kept.
    pub fn detach_all<G: AudioGraph>(&mut self, graph: &mut G) {
        for voice in self.base_voice.take().into_iter().chain(self.layer_voices.drain(..)) {
            graph.stop_voice(voice);
            graph.detach_voice(voice);
        }
    }

    pub fn stop_all<G: AudioGraph>(&self, graph: &mut G) {
        for (voice, _) in self.bindings() {
            graph.stop_voice(voice);
        }
    }

    pub fn pause_all<G: AudioGraph>(&self, graph: &mut G) {
        for (voice, _) in self.bindings() {
            graph.pause_voice(voice);
        }
    }

    /// Voices paired with the source they play, base first.
    pub fn bindings(&self) -> impl Iterator<Item = (VoiceId, &TrackSource)> + '_ {
        self.base_voice
            .map(|voice| (voice, &self.base))
            .into_iter()
            .chain(self.layer_voices.iter().copied().zip(self.layers.iter()))
    }

    pub fn base(&self) -> &TrackSource {
        &self.base
    }

    pub fn layers(&self) -> &[TrackSource] {
        &self.layers
    }

    /// Headroom for the full mix of base and layers.
    pub fn headroom_gain(&self) -> f32 {
        self.gain
    }

    /// Set the mixing-stage gain for the sources that will actually sound:
    /// the base alone, or the base with every layer.
    pub fn apply_headroom<G: AudioGraph>(&self, graph: &mut G, include_layers: bool) -> f32 {
        let gain = if include_layers { self.gain } else { headroom_gain(1) };
        graph.set_mixer_gain(gain);
        gain
    }

    pub fn voice_count(&self) -> usize {
        self.base_voice.iter().count() + self.layer_voices.len()
    }

    fn attach_all<G: AudioGraph>(&mut self, graph: &mut G) -> Result<(), EngineError> {
        let base_voice = graph.attach_voice(&self.base.audio)?;
        graph.set_voice_volume(base_voice, self.base_volume);
        self.base_voice = Some(base_voice);

        for layer in &self.layers {
            let voice = graph.attach_voice(&layer.audio)?;
            graph.set_voice_volume(voice, self.layer_volume);
            self.layer_voices.push(voice);
        }
        self.apply_headroom(graph, true);
        Ok(())
    }
}
