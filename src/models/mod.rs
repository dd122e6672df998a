pub mod batch;
pub mod queue;
pub mod recognition;
