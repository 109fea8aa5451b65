//! Centralized assistant configuration.
//!
//! This module provides strongly-typed configuration for the assistant
//! daemon, loaded via the `config` crate from environment variables with
//! the `AMBER_RELAY` prefix (e.g. `AMBER_RELAY_WORKFLOW_DIR`,
//! `AMBER_RELAY_ENGINE__QUEUE_CAPACITY`).

use amber_relay_events::bus::DEFAULT_HISTORY_CAPACITY;
use amber_relay_runtime::AutostartConfig;
use amber_relay_workflow::{DEFAULT_INVOKE_TIMEOUT, DEFAULT_LISTEN_PATTERNS, DEFAULT_QUEUE_CAPACITY};
use serde::Deserialize;

/// Assistant configuration composed from library defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// Directory scanned for workflow `.json` documents.
    #[serde(default = "default_workflow_dir")]
    pub workflow_dir: String,

    /// Directory scanned for capability manifest documents.
    #[serde(default = "default_capability_dir")]
    pub capability_dir: String,

    /// Comma-separated topic patterns used when a start request carries
    /// none of its own.
    #[serde(default = "default_listen_patterns")]
    pub listen_patterns: String,

    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineSettings,

    /// Boot-time workflow autostart.
    #[serde(default)]
    pub autostart: AutostartSettings,
}

/// Engine-level tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Capacity of the pending-event queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of events retained in the bus history ring.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Upper bound on a single capability invocation, in seconds.
    #[serde(default = "default_invoke_timeout_seconds")]
    pub invoke_timeout_seconds: u64,
}

/// Boot-time autostart settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AutostartSettings {
    pub enabled: bool,
    pub workflow_id: String,
    pub workflow_path: String,
    pub start_node_id: String,
    /// Comma-separated topic patterns; falls back to `listen_patterns`.
    pub listen_patterns: String,
}

fn default_workflow_dir() -> String {
    "workflows".to_string()
}

fn default_capability_dir() -> String {
    "capabilities".to_string()
}

fn default_listen_patterns() -> String {
    DEFAULT_LISTEN_PATTERNS.join(",")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_invoke_timeout_seconds() -> u64 {
    DEFAULT_INVOKE_TIMEOUT.as_secs()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            workflow_dir: default_workflow_dir(),
            capability_dir: default_capability_dir(),
            listen_patterns: default_listen_patterns(),
            engine: EngineSettings::default(),
            autostart: AutostartSettings::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            history_capacity: default_history_capacity(),
            invoke_timeout_seconds: default_invoke_timeout_seconds(),
        }
    }
}

impl AssistantConfig {
    /// Loads configuration from `AMBER_RELAY`-prefixed environment
    /// variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a provided value fails to parse.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("AMBER_RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Resolves the autostart settings into the runtime's shape, applying
    /// the top-level pattern default.
    #[must_use]
    pub fn autostart_config(&self) -> AutostartConfig {
        let raw = if self.autostart.listen_patterns.trim().is_empty() {
            &self.listen_patterns
        } else {
            &self.autostart.listen_patterns
        };
        AutostartConfig {
            enabled: self.autostart.enabled,
            workflow_id: self.autostart.workflow_id.clone(),
            workflow_path: self.autostart.workflow_path.clone(),
            start_node_id: self.autostart.start_node_id.clone(),
            listen_patterns: split_patterns(raw),
        }
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|pattern| !pattern.is_empty())
        .map(str::to_string)
        .collect()
}
