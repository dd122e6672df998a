pub mod aggregator;
pub mod api;
pub mod backend;
pub mod batch;
pub mod fallback;
pub mod poller;
pub mod prepare;
