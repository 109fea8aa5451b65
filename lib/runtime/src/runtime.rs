//! Workflow runtime facade.
//!
//! [`WorkflowRuntime`] owns a [`WorkflowEngine`] plus the document catalog
//! backing it: a directory of `.json` workflow definitions that can be
//! listed, loaded by id or path, validated, run once, or started as the
//! engine's event-driven workflow. One document at a time is "loaded";
//! execution requests without an explicit source run against it.

use crate::error::RuntimeError;
use amber_relay_capability::CapabilityRegistry;
use amber_relay_events::{EventBus, EventRecord};
use amber_relay_workflow::{
    EngineStatus, ExecutionReport, NodeOutputs, StageController, ValidationReport,
    WorkflowDefinition, WorkflowEngine,
};
use rootcause::prelude::Report;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

/// How a workflow document is referenced by a runtime request.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowSource {
    /// An in-memory definition, not backed by a document on disk.
    Inline(WorkflowDefinition),
    /// A document path, absolute or relative to the workflow directory.
    Path(String),
    /// A workflow id (or document file stem) under the workflow directory.
    Id(String),
}

/// A catalog entry produced by scanning the workflow directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowListing {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub nodes: usize,
    pub connections: usize,
}

/// Summary of the currently loaded workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadedWorkflowMeta {
    pub loaded: bool,
    pub id: String,
    pub name: String,
    pub path: String,
    pub nodes: usize,
    pub connections: usize,
}

/// Combined engine and loaded-document snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStatus {
    #[serde(flatten)]
    pub engine: EngineStatus,
    pub loaded_workflow: LoadedWorkflowMeta,
}

/// Autostart settings, typically sourced from the application config.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutostartConfig {
    pub enabled: bool,
    pub workflow_id: String,
    pub workflow_path: String,
    pub start_node_id: String,
    pub listen_patterns: Vec<String>,
}

/// What happened when autostart was attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutostartOutcome {
    pub enabled: bool,
    pub started: bool,
    pub workflow_id: String,
    pub workflow_path: String,
    pub error: Option<String>,
    pub status: Option<RuntimeStatus>,
}

#[derive(Debug, Clone)]
struct LoadedWorkflow {
    definition: WorkflowDefinition,
    path: Option<PathBuf>,
}

/// Facade over the workflow engine and its document directory.
pub struct WorkflowRuntime {
    workflow_dir: PathBuf,
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    engine: WorkflowEngine,
    loaded: Mutex<Option<LoadedWorkflow>>,
}

impl WorkflowRuntime {
    /// Creates a runtime serving workflow documents from `workflow_dir`.
    pub fn new(
        workflow_dir: impl Into<PathBuf>,
        registry: Arc<CapabilityRegistry>,
        bus: Arc<EventBus>,
    ) -> Self {
        let engine = WorkflowEngine::new(Arc::clone(&registry), Arc::clone(&bus));
        Self {
            workflow_dir: workflow_dir.into(),
            registry,
            bus,
            engine,
            loaded: Mutex::new(None),
        }
    }

    /// Replaces the engine's stage controller.
    #[must_use]
    pub fn with_stage_controller(mut self, stage: Arc<dyn StageController>) -> Self {
        self.engine = self.engine.with_stage_controller(stage);
        self
    }

    /// Overrides the engine's event queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.engine = self.engine.with_queue_capacity(capacity);
        self
    }

    /// Overrides the engine's capability invocation timeout.
    #[must_use]
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.engine = self.engine.with_invoke_timeout(timeout);
        self
    }

    /// The directory serving workflow documents.
    #[must_use]
    pub fn workflow_dir(&self) -> &Path {
        &self.workflow_dir
    }

    /// The capability registry backing workflow nodes.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The event bus feeding event-driven execution.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Creates the workflow directory if it does not exist yet.
    pub fn ensure_workflow_dir(&self) -> Result<(), Report<RuntimeError>> {
        fs::create_dir_all(&self.workflow_dir).map_err(|e| RuntimeError::CreateDir {
            path: self.workflow_dir.display().to_string(),
            details: e.to_string(),
        })?;
        Ok(())
    }

    /// Scans the workflow directory recursively for parseable `.json`
    /// documents, sorted by path. Unreadable or malformed documents are
    /// skipped.
    #[must_use]
    pub fn list_workflows(&self) -> Vec<WorkflowListing> {
        if !self.workflow_dir.is_dir() {
            return Vec::new();
        }
        let mut paths = Vec::new();
        collect_json_documents(&self.workflow_dir, &mut paths);
        paths.sort();

        let mut listings = Vec::new();
        for path in paths {
            if !self.is_inside_workflow_dir(&path) {
                continue;
            }
            let Ok(definition) = parse_document(&path) else {
                continue;
            };
            listings.push(WorkflowListing {
                id: or_stem(&definition.id, Some(&path)),
                name: or_stem(&definition.name, Some(&path)),
                nodes: definition.nodes.len(),
                connections: definition.connections.len(),
                path,
            });
        }
        listings
    }

    /// Loads a workflow document and makes it the current one.
    pub fn load(&self, source: WorkflowSource) -> Result<LoadedWorkflowMeta, Report<RuntimeError>> {
        let loaded = self.resolve_source(source)?;
        Ok(self.store(loaded))
    }

    /// Summary of the currently loaded document, or an empty summary when
    /// nothing is loaded.
    #[must_use]
    pub fn loaded_workflow(&self) -> LoadedWorkflowMeta {
        self.lock_loaded().as_ref().map(meta_for).unwrap_or_default()
    }

    /// Loads `source` and starts event-driven execution on the engine.
    ///
    /// Blank patterns are dropped; an empty list leaves the engine on its
    /// default listen patterns.
    pub async fn start(
        &self,
        source: WorkflowSource,
        listen_patterns: &[String],
        start_node_id: Option<&str>,
    ) -> Result<RuntimeStatus, Report<RuntimeError>> {
        let loaded = self.resolve_source(source)?;
        let definition = loaded.definition.clone();
        let meta = self.store(loaded);

        let patterns: Vec<String> = listen_patterns
            .iter()
            .map(|pattern| pattern.trim().to_string())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        self.engine
            .start_event_driven(&definition, &patterns, start_node_id)
            .await
            .map_err(|e| RuntimeError::Engine {
                details: e.to_string(),
            })?;
        info!(workflow = %meta.id, "workflow runtime started");
        Ok(self.status())
    }

    /// Loads `source` and executes a single pass.
    pub async fn run_once(
        &self,
        source: WorkflowSource,
        start_node_id: Option<&str>,
        initial_inputs: Option<&NodeOutputs>,
    ) -> Result<ExecutionReport, Report<RuntimeError>> {
        let loaded = self.resolve_source(source)?;
        let definition = loaded.definition.clone();
        self.store(loaded);
        let report = self
            .engine
            .run_once(&definition, start_node_id, initial_inputs)
            .await
            .map_err(|e| RuntimeError::Engine {
                details: e.to_string(),
            })?;
        Ok(report)
    }

    /// Executes a single pass of the currently loaded workflow.
    pub async fn run_loaded_once(
        &self,
        start_node_id: Option<&str>,
        initial_inputs: Option<&NodeOutputs>,
    ) -> Result<ExecutionReport, Report<RuntimeError>> {
        let definition = self
            .lock_loaded()
            .as_ref()
            .map(|loaded| loaded.definition.clone())
            .ok_or(RuntimeError::NothingLoaded)?;
        let report = self
            .engine
            .run_once(&definition, start_node_id, initial_inputs)
            .await
            .map_err(|e| RuntimeError::Engine {
                details: e.to_string(),
            })?;
        Ok(report)
    }

    /// Loads `source` and reports its validation result.
    pub async fn validate(
        &self,
        source: WorkflowSource,
        start_node_id: Option<&str>,
    ) -> Result<ValidationReport, Report<RuntimeError>> {
        let loaded = self.resolve_source(source)?;
        let definition = loaded.definition.clone();
        self.store(loaded);
        Ok(self.engine.validate(&definition, start_node_id).await)
    }

    /// Stops event-driven execution and reports the resulting status.
    pub async fn stop(&self) -> RuntimeStatus {
        self.engine.stop_event_driven().await;
        self.status()
    }

    /// Snapshot of the engine status plus the loaded-document summary.
    #[must_use]
    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            engine: self.engine.status(),
            loaded_workflow: self.loaded_workflow(),
        }
    }

    /// Recent bus history, optionally narrowed to one topic.
    #[must_use]
    pub fn recent_events(&self, topic: Option<&str>, limit: usize) -> Vec<EventRecord> {
        self.bus.get_history(topic, limit)
    }

    /// Starts the configured workflow if autostart is enabled.
    ///
    /// Failures are reported in the outcome and logged; they never
    /// propagate, so a bad autostart cannot take the application down.
    pub async fn autostart(&self, config: &AutostartConfig) -> AutostartOutcome {
        if !config.enabled {
            return AutostartOutcome::default();
        }

        let id = config.workflow_id.trim();
        let path = config.workflow_path.trim();
        let source = if !id.is_empty() {
            WorkflowSource::Id(id.to_string())
        } else if !path.is_empty() {
            WorkflowSource::Path(path.to_string())
        } else {
            warn!("workflow autostart enabled without a workflow id or path");
            return AutostartOutcome {
                enabled: true,
                error: Some("autostart requires a workflow id or path".to_string()),
                ..AutostartOutcome::default()
            };
        };

        let start_node = config.start_node_id.trim();
        let start_node = (!start_node.is_empty()).then_some(start_node);
        match self.start(source, &config.listen_patterns, start_node).await {
            Ok(status) => AutostartOutcome {
                enabled: true,
                started: true,
                workflow_id: status.loaded_workflow.id.clone(),
                workflow_path: status.loaded_workflow.path.clone(),
                error: None,
                status: Some(status),
            },
            Err(report) => {
                warn!(error = %report, "workflow autostart failed");
                AutostartOutcome {
                    enabled: true,
                    error: Some(report.to_string()),
                    ..AutostartOutcome::default()
                }
            }
        }
    }

    fn lock_loaded(&self) -> MutexGuard<'_, Option<LoadedWorkflow>> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self, loaded: LoadedWorkflow) -> LoadedWorkflowMeta {
        let meta = meta_for(&loaded);
        *self.lock_loaded() = Some(loaded);
        info!(workflow = %meta.id, path = %meta.path, "workflow loaded");
        meta
    }

    fn resolve_source(&self, source: WorkflowSource) -> Result<LoadedWorkflow, RuntimeError> {
        match source {
            WorkflowSource::Inline(definition) => Ok(LoadedWorkflow {
                definition,
                path: None,
            }),
            WorkflowSource::Path(path) => {
                let resolved = self.resolve_path(&path)?;
                let definition = parse_document(&resolved)?;
                Ok(LoadedWorkflow {
                    definition,
                    path: Some(resolved),
                })
            }
            WorkflowSource::Id(id) => {
                let id = id.trim();
                if id.is_empty() {
                    return Err(RuntimeError::EmptyReference);
                }
                let listing = self
                    .list_workflows()
                    .into_iter()
                    .find(|item| item.id == id || stem_of(&item.path) == id)
                    .ok_or_else(|| RuntimeError::NotFound {
                        reference: id.to_string(),
                    })?;
                let definition = parse_document(&listing.path)?;
                Ok(LoadedWorkflow {
                    definition,
                    path: Some(listing.path),
                })
            }
        }
    }

    /// Resolves a raw path against the workflow directory and rejects
    /// anything that is not an existing `.json` document inside it.
    fn resolve_path(&self, raw: &str) -> Result<PathBuf, RuntimeError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RuntimeError::EmptyReference);
        }
        let candidate = PathBuf::from(raw);
        let candidate = if candidate.is_absolute() {
            candidate
        } else {
            self.workflow_dir.join(candidate)
        };
        if !is_json_path(&candidate) {
            return Err(RuntimeError::NotJson {
                path: raw.to_string(),
            });
        }
        if !candidate.is_file() {
            return Err(RuntimeError::NotFound {
                reference: raw.to_string(),
            });
        }
        if !self.is_inside_workflow_dir(&candidate) {
            return Err(RuntimeError::OutsideWorkflowDir {
                path: raw.to_string(),
            });
        }
        Ok(candidate)
    }

    /// Symlinks and `..` segments are resolved before the containment
    /// check, so a link pointing outside the directory is rejected.
    fn is_inside_workflow_dir(&self, path: &Path) -> bool {
        let Ok(root) = self.workflow_dir.canonicalize() else {
            return false;
        };
        path.canonicalize()
            .is_ok_and(|resolved| resolved.starts_with(&root))
    }
}

fn collect_json_documents(dir: &Path, found: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_json_documents(&path, found);
        } else if is_json_path(&path) {
            found.push(path);
        }
    }
}

fn is_json_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn parse_document(path: &Path) -> Result<WorkflowDefinition, RuntimeError> {
    let text = fs::read_to_string(path).map_err(|e| RuntimeError::Read {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| RuntimeError::Parse {
        path: path.display().to_string(),
        details: e.to_string(),
    })
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn or_stem(value: &str, path: Option<&Path>) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        path.map(stem_of).unwrap_or_default()
    } else {
        trimmed.to_string()
    }
}

fn meta_for(loaded: &LoadedWorkflow) -> LoadedWorkflowMeta {
    let path = loaded.path.as_deref();
    LoadedWorkflowMeta {
        loaded: true,
        id: or_stem(&loaded.definition.id, path),
        name: or_stem(&loaded.definition.name, path),
        path: path.map(|p| p.display().to_string()).unwrap_or_default(),
        nodes: loaded.definition.nodes.len(),
        connections: loaded.definition.connections.len(),
    }
}
