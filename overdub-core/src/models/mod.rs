pub mod config;
pub mod error;
pub mod recording_result;
pub mod route;
pub mod state;
pub mod track;
