pub mod host;
pub mod scheduler;
pub mod software;
