//! Sample-level conversions on the capture path: downmix, resample, gain,
//! and PCM packing. Pure functions over `&[f32]`, safe to call from the
//! real-time callback.

/// Linear-interpolation resampler targeting a fixed output rate.
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    pub target_sample_rate: f64,
}

impl Resampler {
    pub fn new(target_sample_rate: f64) -> Self {
        Self { target_sample_rate }
    }

    /// Resample mono `samples` from `source_sample_rate` to the target rate.
    ///
    /// Returns input unchanged if rates match.
    pub fn process(&self, samples: &[f32], source_sample_rate: f64) -> Vec<f32> {
        if (source_sample_rate - self.target_sample_rate).abs() < 0.01 || samples.is_empty() {
            return samples.to_vec();
        }

        let ratio = self.target_sample_rate / source_sample_rate;
        let output_count = (samples.len() as f64 * ratio) as usize;
        let mut output = Vec::with_capacity(output_count);
        for i in 0..output_count {
            let position = i as f64 / ratio;
            let index = position as usize;
            let fraction = (position - index as f64) as f32;
            let current = samples[index.min(samples.len() - 1)];
            let next = samples.get(index + 1).copied().unwrap_or(current);
            output.push(current + (next - current) * fraction);
        }
        output
    }
}

/// Average interleaved channels into one mono stream.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Apply linear gain and hard-limit the result to [-1.0, 1.0] in place.
pub fn apply_gain_limited(samples: &mut [f32], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        for s in samples.iter_mut() {
            *s = s.clamp(-1.0, 1.0);
        }
        return;
    }
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

/// Convert f32 samples `[-1.0, 1.0]` to 16-bit PCM (little-endian bytes).
///
/// Clamps out-of-range values. Output length = `samples.len() * 2` bytes.
pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        data.extend_from_slice(&value.to_le_bytes());
    }
    data
}

/// Root-mean-square amplitude of `samples` (0.0 for an empty buffer).
pub fn rms_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}
