pub mod config;
pub mod errors;
pub mod events;
pub mod execution;
pub mod orchestrator;
pub mod pipeline;
