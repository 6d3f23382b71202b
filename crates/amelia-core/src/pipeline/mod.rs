//! The pipeline engine: a directed, possibly-cyclic graph of async *nodes*
//! operating on [`PipelineState`](amelia_db::models::PipelineState), with
//! interrupt points and per-transition checkpoints (spec §4.3).
//!
//! `node` defines the `Node` trait and `StepResult` (the typed answer to
//! Design Note "Coroutine control flow and interrupts" — interrupts are a
//! normal return variant, not an exception). `graph` defines the registry of
//! nodes and the edges between them. `engine` drives a graph to completion
//! or to the next interrupt, checkpointing after every transition.
//! `agent_hooks` is the seam between the engine and the (out-of-scope)
//! architect/developer/reviewer agents. `implementation_graph` wires the
//! concrete graph from spec §4.3.

pub mod agent_hooks;
pub mod engine;
pub mod graph;
pub mod implementation_graph;
pub mod node;
pub mod state;

pub use agent_hooks::{AgentHooks, AgentOutcome};
pub use engine::{Engine, EngineError, RunOutcome};
pub use graph::{Edge, Graph};
pub use node::{InterruptKind, Node, ResumePayload, StepResult};
pub use state::StateDelta;
