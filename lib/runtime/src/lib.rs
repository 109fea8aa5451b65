//! Workflow runtime facade for the amber-relay assistant.
//!
//! Ties the capability registry, event bus, and workflow engine together
//! behind one entry point that manages a directory of workflow documents:
//! list them, load one by id or path, validate it, run it once, or start
//! it as the engine's event-driven workflow.

pub mod error;
pub mod runtime;

pub use error::RuntimeError;
pub use runtime::{
    AutostartConfig, AutostartOutcome, LoadedWorkflowMeta, RuntimeStatus, WorkflowListing,
    WorkflowRuntime, WorkflowSource,
};
