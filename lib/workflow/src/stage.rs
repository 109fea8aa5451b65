//! Stage-control boundary.
//!
//! Scene-switch and source-toggle nodes delegate to an external stage
//! backend (a streaming or presentation tool). The engine only needs the
//! two operations below; connection management stays behind the trait.

use async_trait::async_trait;
use std::fmt;

/// Errors from stage-control operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// No stage backend is configured or reachable.
    Unavailable { reason: String },
    /// The backend rejected or failed the command.
    Command { reason: String },
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => {
                write!(f, "stage backend unavailable: {reason}")
            }
            Self::Command { reason } => {
                write!(f, "stage command failed: {reason}")
            }
        }
    }
}

impl std::error::Error for StageError {}

/// Scene and source control exposed to workflow nodes.
#[async_trait]
pub trait StageController: Send + Sync {
    /// Switches the active scene.
    async fn switch_scene(&self, scene: &str) -> Result<(), StageError>;

    /// Enables or disables a source, optionally scoped to a scene.
    async fn set_source_enabled(
        &self,
        source: &str,
        enabled: bool,
        scene: Option<&str>,
    ) -> Result<(), StageError>;
}

/// Controller used when no stage integration is configured. Every
/// operation reports the backend as unavailable, which stage nodes
/// surface as a failed (but non-fatal) command.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStage;

#[async_trait]
impl StageController for UnavailableStage {
    async fn switch_scene(&self, _scene: &str) -> Result<(), StageError> {
        Err(StageError::Unavailable {
            reason: "no stage controller configured".to_string(),
        })
    }

    async fn set_source_enabled(
        &self,
        _source: &str,
        _enabled: bool,
        _scene: Option<&str>,
    ) -> Result<(), StageError> {
        Err(StageError::Unavailable {
            reason: "no stage controller configured".to_string(),
        })
    }
}
