//! Error types for the capability crate.

use std::fmt;

/// Errors raised by capability construction and invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Building the capability instance failed.
    Instantiation { id: String, reason: String },
    /// The capability rejected or failed a command.
    Invocation { id: String, reason: String },
    /// The post-load initialization hook failed.
    Initialization { id: String, reason: String },
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instantiation { id, reason } => {
                write!(f, "failed to instantiate capability '{id}': {reason}")
            }
            Self::Invocation { id, reason } => {
                write!(f, "capability '{id}' failed: {reason}")
            }
            Self::Initialization { id, reason } => {
                write!(f, "capability '{id}' failed to initialize: {reason}")
            }
        }
    }
}

impl std::error::Error for CapabilityError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instantiation_error_display() {
        let err = CapabilityError::Instantiation {
            id: "weather".to_string(),
            reason: "missing api key".to_string(),
        };
        assert!(err.to_string().contains("instantiate capability 'weather'"));
        assert!(err.to_string().contains("missing api key"));
    }

    #[test]
    fn invocation_error_display() {
        let err = CapabilityError::Invocation {
            id: "weather".to_string(),
            reason: "upstream timeout".to_string(),
        };
        assert!(err.to_string().contains("capability 'weather' failed"));
    }
}
