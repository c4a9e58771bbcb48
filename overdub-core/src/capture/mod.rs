pub mod failure_counter;
pub mod pipeline;
