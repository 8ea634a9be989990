//! The shared agent registry and its update protocol.

pub mod merge;
pub mod orchestrator;
pub mod store;
pub mod transforms;

#[cfg(test)]
pub mod testing;

pub use orchestrator::{OrchestratorConfig, UpdateOrchestrator, UpdateOutcome};
