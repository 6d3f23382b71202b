//! Orchestration substrate for Amelia: the event bus, the pipeline engine,
//! and the orchestrator service that owns the workflow lifecycle.
//!
//! Agents, LLM drivers, trackers, and tools are external collaborators;
//! this crate only depends on the narrow contracts in [`contracts`].

pub mod contracts;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod pipeline;

pub use errors::OrchestratorError;
pub use orchestrator::{NewWorkflowRequest, Orchestrator, OrchestratorConfig};
