//! Graph-based workflow engine for the amber-relay assistant.
//!
//! This crate validates and executes workflow definitions, including:
//!
//! - **Definitions**: JSON documents of nodes, connections, and event filters
//! - **Node Kinds**: builtin behaviors plus capability-backed nodes with
//!   manifest-derived port contracts
//! - **Validation**: exhaustive error collection and deterministic
//!   topological ordering
//! - **Execution**: one-shot passes and an event-driven consumer fed by a
//!   bounded queue on the event bus
//! - **Stage Control**: scene/source operations behind a pluggable trait

pub mod definition;
pub mod engine;
pub mod error;
pub mod execution;
mod graph;
pub mod node;
pub mod stage;
pub mod validation;

pub use definition::{
    ConnectionDefinition, Endpoint, EventFilterSpec, NodeDefinition, WorkflowDefinition,
};
pub use engine::{
    DEFAULT_INVOKE_TIMEOUT, DEFAULT_LISTEN_PATTERNS, DEFAULT_QUEUE_CAPACITY, EngineStatus,
    WorkflowEngine,
};
pub use error::EngineError;
pub use execution::{ExecutionReport, NodeOutputs};
pub use node::{NodeKind, PortContract, TEXT_INPUT_SYNONYMS};
pub use stage::{StageController, StageError, UnavailableStage};
pub use validation::ValidationReport;
