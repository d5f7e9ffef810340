pub mod processor;
pub mod queue;
pub mod scheduler;
pub mod stats;
