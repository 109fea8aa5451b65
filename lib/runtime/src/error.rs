//! Error types for the workflow runtime facade.

use std::fmt;

/// Errors from runtime operations.
///
/// Document-level problems (bad path, unreadable file, malformed JSON) are
/// reported here; validation findings inside a parsed workflow are data in a
/// `ValidationReport` instead.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// An empty path or id was given as a workflow reference.
    EmptyReference,
    /// The referenced path is not a `.json` document.
    NotJson {
        /// The offending path.
        path: String,
    },
    /// The resolved path escapes the configured workflow directory.
    OutsideWorkflowDir {
        /// The offending path.
        path: String,
    },
    /// No workflow document matched the given path or id.
    NotFound {
        /// The path or id that was looked up.
        reference: String,
    },
    /// Creating the workflow directory failed.
    CreateDir {
        /// The directory path.
        path: String,
        /// Error details.
        details: String,
    },
    /// Reading a workflow document failed.
    Read {
        /// The document path.
        path: String,
        /// Error details.
        details: String,
    },
    /// A workflow document was not a valid JSON workflow object.
    Parse {
        /// The document path.
        path: String,
        /// Error details.
        details: String,
    },
    /// An operation on the loaded workflow was requested with none loaded.
    NothingLoaded,
    /// The workflow engine rejected or failed the request.
    Engine {
        /// Error details.
        details: String,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyReference => write!(f, "workflow reference is empty"),
            Self::NotJson { path } => {
                write!(f, "workflow document '{path}' is not a .json file")
            }
            Self::OutsideWorkflowDir { path } => {
                write!(f, "workflow path '{path}' escapes the workflow directory")
            }
            Self::NotFound { reference } => write!(f, "workflow not found: {reference}"),
            Self::CreateDir { path, details } => {
                write!(f, "failed to create workflow directory '{path}': {details}")
            }
            Self::Read { path, details } => {
                write!(f, "failed to read workflow document '{path}': {details}")
            }
            Self::Parse { path, details } => {
                write!(f, "workflow document '{path}' is malformed: {details}")
            }
            Self::NothingLoaded => write!(f, "no workflow is loaded"),
            Self::Engine { details } => write!(f, "workflow engine error: {details}"),
        }
    }
}

impl std::error::Error for RuntimeError {}
