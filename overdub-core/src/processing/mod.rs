pub mod meter;
pub mod mixdown;
pub mod wav_format;
