//! Loudness metering for the capture path.

use super::mixdown::rms_level;

/// Lower edge of the meter window; anything quieter reads as 0.
pub const METER_FLOOR_DB: f32 = -50.0;

/// Upper edge of the meter window; full scale reads as 1.
pub const METER_CEILING_DB: f32 = 0.0;

const MIN_RMS: f32 = 1e-6;

/// Convert an RMS amplitude to dBFS, with silence floored at -120 dB.
pub fn rms_to_db(rms: f32) -> f32 {
    20.0 * rms.max(MIN_RMS).log10()
}

/// Map an RMS amplitude onto the [0, 1] meter scale.
pub fn normalized_level_from_rms(rms: f32) -> f32 {
    let db = rms_to_db(rms).clamp(METER_FLOOR_DB, METER_CEILING_DB);
    (db - METER_FLOOR_DB) / (METER_CEILING_DB - METER_FLOOR_DB)
}

/// Normalized level of one captured buffer.
pub fn normalized_level(samples: &[f32]) -> f32 {
    normalized_level_from_rms(rms_level(samples))
}
