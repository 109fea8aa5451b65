//! Error types for the workflow crate.
//!
//! Validation problems are reported as data in a [`ValidationReport`];
//! `EngineError` covers the failures that must reach a caller: a rejected
//! definition on an execution request, and capability failures at a node.
//!
//! [`ValidationReport`]: crate::validation::ValidationReport

use amber_relay_capability::CapabilityError;
use std::fmt;
use std::time::Duration;

/// Errors from engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// The definition failed validation; the full error list is attached.
    ValidationFailed { errors: Vec<String> },
    /// A capability invocation returned an error.
    CapabilityFailed {
        node_id: String,
        capability_id: String,
        source: CapabilityError,
    },
    /// A capability invocation exceeded the configured timeout.
    InvocationTimedOut {
        node_id: String,
        capability_id: String,
        timeout: Duration,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationFailed { errors } => {
                write!(f, "workflow validation failed: {}", errors.join("; "))
            }
            Self::CapabilityFailed {
                node_id,
                capability_id,
                source,
            } => {
                write!(
                    f,
                    "capability '{capability_id}' failed at node '{node_id}': {source}"
                )
            }
            Self::InvocationTimedOut {
                node_id,
                capability_id,
                timeout,
            } => {
                write!(
                    f,
                    "capability '{capability_id}' at node '{node_id}' timed out after {timeout:?}"
                )
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CapabilityFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}
