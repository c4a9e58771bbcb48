pub mod decoder;
pub mod metadata;
pub mod wav_writer;
