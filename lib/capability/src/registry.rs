//! Capability discovery, loading, and hot-reload.
//!
//! The registry owns one [`RegistryEntry`] per discovered capability and
//! guards the map with a lock so every load, reload, and lookup is a safe
//! read-modify-write. Reloads are transactional: the replacement instance
//! and manifest are built and validated first, and a failed attempt leaves
//! the previous handle serving while the attempt's errors are recorded on
//! the entry.

use crate::manifest::{merge_documents, CapabilityManifest};
use crate::provider::{Capability, CapabilityProvider};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

/// Where a capability's manifest came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    /// No manifest has been resolved for this entry yet.
    None,
    /// External JSON file only.
    File,
    /// Provider-embedded declaration only.
    Embedded,
    /// External file merged with an embedded declaration; embedded keys won.
    #[serde(rename = "file+embedded")]
    FileAndEmbedded,
    /// Minimal fallback built from the provider's legacy trigger list.
    LegacyFallback,
}

impl ManifestSource {
    /// True when an external manifest file contributed.
    #[must_use]
    pub fn includes_file(self) -> bool {
        matches!(self, Self::File | Self::FileAndEmbedded)
    }

    /// True when an embedded declaration contributed.
    #[must_use]
    pub fn includes_embedded(self) -> bool {
        matches!(self, Self::Embedded | Self::FileAndEmbedded)
    }
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::File => "file",
            Self::Embedded => "embedded",
            Self::FileAndEmbedded => "file+embedded",
            Self::LegacyFallback => "legacy_fallback",
        };
        f.write_str(label)
    }
}

/// Per-capability lifecycle record.
///
/// An entry is created on discovery (or on the first load attempt), mutated
/// by load and reload, and removed only when its provider vanishes. While
/// loaded, `manifest_source` and the manifest describe the live handle; a
/// failed reload updates only the error fields.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Registry key.
    pub id: String,
    /// Live capability instance, present only after a successful load.
    pub instance: Option<Arc<dyn Capability>>,
    /// Validated manifest, present only after a successful load.
    pub manifest: Option<CapabilityManifest>,
    /// Raw text of the most recent failure, cleared on success.
    pub last_error: Option<String>,
    /// Provenance of the live manifest (or of the last failed attempt when
    /// nothing is loaded).
    pub manifest_source: ManifestSource,
    /// Whether a manifest file currently exists for this id.
    pub has_external_manifest: bool,
    /// Accumulated manifest violations from the most recent attempt.
    pub validation_errors: Vec<String>,
}

impl RegistryEntry {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            instance: None,
            manifest: None,
            last_error: None,
            manifest_source: ManifestSource::None,
            has_external_manifest: false,
            validation_errors: Vec::new(),
        }
    }

    /// A capability is loaded only when both the instance and a validated
    /// manifest are present.
    #[must_use]
    pub fn loaded(&self) -> bool {
        self.instance.is_some() && self.manifest.is_some()
    }

    /// Records a failed attempt. A previously loaded handle stays live and
    /// keeps its provenance; the external-file flag always reflects disk.
    fn record_failure(
        &mut self,
        last_error: String,
        validation_errors: Vec<String>,
        attempt_source: ManifestSource,
        has_file: bool,
    ) {
        self.last_error = Some(last_error);
        self.validation_errors = validation_errors;
        self.has_external_manifest = has_file;
        if !self.loaded() {
            self.manifest_source = attempt_source;
        }
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("id", &self.id)
            .field("loaded", &self.loaded())
            .field("manifest_source", &self.manifest_source)
            .field("has_external_manifest", &self.has_external_manifest)
            .field("validation_errors", &self.validation_errors)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Serializable per-capability view for observability surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDiagnostics {
    pub id: String,
    pub loaded: bool,
    pub manifest_source: ManifestSource,
    pub has_external_manifest: bool,
    pub validation_errors: Vec<String>,
    pub last_error: Option<String>,
}

impl From<&RegistryEntry> for CapabilityDiagnostics {
    fn from(entry: &RegistryEntry) -> Self {
        Self {
            id: entry.id.clone(),
            loaded: entry.loaded(),
            manifest_source: entry.manifest_source,
            has_external_manifest: entry.has_external_manifest,
            validation_errors: entry.validation_errors.clone(),
            last_error: entry.last_error.clone(),
        }
    }
}

/// Manifest adoption counters across the discovered set.
///
/// Counters reflect load attempts made so far; calling this never forces a
/// load by itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestCoverage {
    pub total: usize,
    pub loaded: usize,
    pub failed: usize,
    pub with_file_manifest: usize,
    pub with_embedded_manifest: usize,
    pub legacy_fallback: usize,
    /// Ids with no external manifest file on disk, sorted.
    pub missing_file_manifests: Vec<String>,
}

#[derive(Default)]
struct RegistryState {
    providers: BTreeMap<String, Arc<dyn CapabilityProvider>>,
    entries: BTreeMap<String, RegistryEntry>,
}

impl RegistryState {
    /// Syncs entries with the provider set: drops entries whose provider is
    /// gone, creates blank entries for new providers, returns sorted ids.
    fn reconcile(&mut self) -> Vec<String> {
        let ids: Vec<String> = self
            .providers
            .keys()
            .filter(|id| !is_reserved(id))
            .cloned()
            .collect();
        self.entries.retain(|id, _| ids.binary_search(id).is_ok());
        for id in &ids {
            self.entries
                .entry(id.clone())
                .or_insert_with(|| RegistryEntry::new(id));
        }
        ids
    }

    /// Sorted ids of everything tracked, discovering first when empty.
    fn known_ids(&mut self) -> Vec<String> {
        if self.entries.is_empty() {
            self.reconcile()
        } else {
            self.entries.keys().cloned().collect()
        }
    }
}

/// Ids with an empty name or a leading underscore are reserved for
/// scaffolding and never surfaced by discovery.
fn is_reserved(id: &str) -> bool {
    id.is_empty() || id.starts_with('_')
}

fn read_manifest_file(path: &Path) -> Result<JsonValue, String> {
    let text = fs::read_to_string(path)
        .map_err(|err| format!("manifest file {} is unreadable: {err}", path.display()))?;
    let doc: JsonValue = serde_json::from_str(&text)
        .map_err(|err| format!("manifest file {} is invalid JSON: {err}", path.display()))?;
    if doc.is_object() {
        Ok(doc)
    } else {
        Err(format!(
            "manifest file {} must be a JSON object",
            path.display()
        ))
    }
}

/// Discovers, lazily loads, validates, and hot-reloads capabilities.
///
/// Providers are registered in process; external manifest declarations are
/// JSON files named `<id>.json` under the manifest directory. All operations
/// take `&self` and serialize through an internal lock.
pub struct CapabilityRegistry {
    manifest_dir: PathBuf,
    state: Mutex<RegistryState>,
}

impl CapabilityRegistry {
    /// Creates an empty registry resolving manifest files under
    /// `manifest_dir`.
    #[must_use]
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            state: Mutex::new(RegistryState::default()),
        }
    }

    /// Adds a provider at construction time.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        let id = provider.id().to_string();
        self.state.get_mut().providers.insert(id, provider);
        self
    }

    /// Registers (or replaces) a provider. A replaced provider takes effect
    /// on the next `reload`.
    pub async fn register(&self, provider: Arc<dyn CapabilityProvider>) {
        let id = provider.id().to_string();
        let mut state = self.state.lock().await;
        if state.providers.insert(id.clone(), provider).is_some() {
            debug!(capability = %id, "capability provider replaced");
        }
    }

    /// Directory external manifest files resolve from.
    #[must_use]
    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.manifest_dir.join(format!("{id}.json"))
    }

    /// Sorted capability ids from the registered providers, excluding
    /// reserved names. Entries for vanished providers are dropped; new
    /// providers get a blank entry.
    pub async fn discover(&self) -> Vec<String> {
        self.state.lock().await.reconcile()
    }

    /// Sorted ids of every tracked capability, discovering first if nothing
    /// is tracked yet.
    pub async fn names(&self) -> Vec<String> {
        self.state.lock().await.known_ids()
    }

    /// Snapshot of one entry without forcing a load.
    pub async fn entry(&self, id: &str) -> Option<RegistryEntry> {
        self.state.lock().await.entries.get(id).cloned()
    }

    /// Loads a capability, returning its entry on success. Idempotent: an
    /// already-loaded entry is returned as-is. A failed attempt records its
    /// errors on the entry and returns `None`; it is not retried until the
    /// next explicit call.
    pub async fn load(&self, id: &str) -> Option<RegistryEntry> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state, id, false).await
    }

    /// Forces re-instantiation and re-validation. On failure the previous
    /// instance and manifest keep serving and the attempt's errors are
    /// recorded.
    pub async fn reload(&self, id: &str) -> Option<RegistryEntry> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state, id, true).await
    }

    /// Re-discovers and reloads everything; returns how many capabilities
    /// ended up loaded.
    pub async fn reload_all(&self) -> usize {
        let mut state = self.state.lock().await;
        let ids = state.reconcile();
        let mut count = 0;
        for id in ids {
            if self.resolve_locked(&mut state, &id, true).await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Ordered ids whose manifest accepts `intent` (exact, case-insensitive).
    pub async fn candidates_by_intent(&self, intent: &str) -> Vec<String> {
        if intent.trim().is_empty() {
            return Vec::new();
        }
        let mut state = self.state.lock().await;
        let ids = state.known_ids();
        let mut selected = Vec::new();
        for id in ids {
            let Some(entry) = self.resolve_locked(&mut state, &id, false).await else {
                continue;
            };
            if let Some(manifest) = entry.manifest {
                if manifest.matches_intent(intent) {
                    selected.push(id);
                }
            }
        }
        selected
    }

    /// Ordered ids with a trigger phrase occurring in `text`
    /// (case-insensitive substring).
    pub async fn candidates_by_trigger(&self, text: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        let ids = state.known_ids();
        let mut selected = Vec::new();
        for id in ids {
            let Some(entry) = self.resolve_locked(&mut state, &id, false).await else {
                continue;
            };
            if let Some(manifest) = entry.manifest {
                if manifest.matches_trigger(text) {
                    selected.push(id);
                }
            }
        }
        selected
    }

    /// Loads (if needed) and returns the validated manifest.
    pub async fn manifest(&self, id: &str) -> Option<CapabilityManifest> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state, id, false)
            .await
            .and_then(|entry| entry.manifest)
    }

    /// Loads (if needed) and returns the invocable instance.
    pub async fn capability(&self, id: &str) -> Option<Arc<dyn Capability>> {
        let mut state = self.state.lock().await;
        self.resolve_locked(&mut state, id, false)
            .await
            .and_then(|entry| entry.instance)
    }

    /// Per-entry diagnostics over the discovered set; with `ensure_loaded`,
    /// attempts a load for each entry first.
    pub async fn diagnostics(&self, ensure_loaded: bool) -> Vec<CapabilityDiagnostics> {
        let mut state = self.state.lock().await;
        let ids = state.reconcile();
        let mut report = Vec::with_capacity(ids.len());
        for id in ids {
            if ensure_loaded {
                self.resolve_locked(&mut state, &id, false).await;
            }
            if let Some(entry) = state.entries.get(&id) {
                report.push(CapabilityDiagnostics::from(entry));
            }
        }
        report
    }

    /// Manifest adoption counters over the discovered set.
    pub async fn manifest_coverage(&self) -> ManifestCoverage {
        let mut state = self.state.lock().await;
        let ids = state.reconcile();
        let mut coverage = ManifestCoverage {
            total: ids.len(),
            ..ManifestCoverage::default()
        };
        for id in &ids {
            let has_file = self.manifest_path(id).is_file();
            if has_file {
                coverage.with_file_manifest += 1;
            } else {
                coverage.missing_file_manifests.push(id.clone());
            }
            let Some(entry) = state.entries.get(id) else {
                continue;
            };
            if entry.loaded() {
                coverage.loaded += 1;
            }
            if entry.last_error.is_some() {
                coverage.failed += 1;
            }
            if entry.manifest_source.includes_embedded() {
                coverage.with_embedded_manifest += 1;
            }
            if entry.manifest_source == ManifestSource::LegacyFallback {
                coverage.legacy_fallback += 1;
            }
        }
        coverage
    }

    /// One load/reload attempt with the state lock held. Builds the new
    /// instance and manifest completely before touching the entry, so a
    /// failure never leaves the entry half-swapped.
    async fn resolve_locked(
        &self,
        state: &mut RegistryState,
        id: &str,
        force: bool,
    ) -> Option<RegistryEntry> {
        if !force {
            if let Some(entry) = state.entries.get(id) {
                if entry.loaded() {
                    return Some(entry.clone());
                }
            }
        }

        let provider = state.providers.get(id).cloned();
        let manifest_path = self.manifest_path(id);
        let has_file = manifest_path.is_file();
        let entry = state
            .entries
            .entry(id.to_string())
            .or_insert_with(|| RegistryEntry::new(id));

        let Some(provider) = provider else {
            let reason = format!("no provider registered for capability '{id}'");
            warn!(capability = %id, "no provider registered");
            entry.record_failure(reason, Vec::new(), ManifestSource::None, has_file);
            return None;
        };

        let instance = match provider.instantiate() {
            Ok(instance) => instance,
            Err(err) => {
                error!(capability = %id, error = %err, "failed to instantiate capability");
                entry.record_failure(err.to_string(), Vec::new(), ManifestSource::None, has_file);
                return None;
            }
        };

        let file_doc = if has_file {
            match read_manifest_file(&manifest_path) {
                Ok(doc) => Some(doc),
                Err(reason) => {
                    error!(capability = %id, error = %reason, "failed to read manifest file");
                    entry.record_failure(reason, Vec::new(), ManifestSource::None, has_file);
                    return None;
                }
            }
        } else {
            None
        };

        let embedded_doc = match provider.embedded_manifest() {
            Some(doc @ JsonValue::Object(_)) => Some(doc),
            Some(_) => {
                warn!(capability = %id, "embedded manifest is not a JSON object; ignoring");
                None
            }
            None => None,
        };

        let source = match (file_doc.is_some(), embedded_doc.is_some()) {
            (true, true) => ManifestSource::FileAndEmbedded,
            (true, false) => ManifestSource::File,
            (false, true) => ManifestSource::Embedded,
            (false, false) => ManifestSource::LegacyFallback,
        };

        let manifest = match merge_documents(file_doc, embedded_doc) {
            Some(doc) => match serde_json::from_value::<CapabilityManifest>(doc) {
                Ok(manifest) => manifest,
                Err(err) => {
                    let problem = format!("manifest does not deserialize: {err}");
                    warn!(capability = %id, error = %problem, "capability manifest rejected");
                    entry.record_failure(problem.clone(), vec![problem], source, has_file);
                    return None;
                }
            },
            None => CapabilityManifest::legacy_fallback(id, provider.legacy_triggers()),
        };

        let problems = manifest.validation_errors(id);
        if !problems.is_empty() {
            warn!(
                capability = %id,
                problems = ?problems,
                "capability manifest failed validation"
            );
            entry.record_failure(problems.join("; "), problems, source, has_file);
            return None;
        }

        if let Err(err) = instance.initialize().await {
            warn!(capability = %id, error = %err, "capability initialize() failed; continuing");
        }

        entry.instance = Some(instance);
        entry.manifest = Some(manifest);
        entry.last_error = None;
        entry.manifest_source = source;
        entry.has_external_manifest = has_file;
        entry.validation_errors = Vec::new();
        debug!(capability = %id, source = %source, "capability loaded");
        Some(entry.clone())
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("manifest_dir", &self.manifest_dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoCapability;

    #[async_trait::async_trait]
    impl Capability for EchoCapability {
        async fn invoke(&self, command: &str) -> Result<Option<String>, CapabilityError> {
            Ok(Some(format!("echo: {command}")))
        }
    }

    struct GrumpyInitCapability;

    #[async_trait::async_trait]
    impl Capability for GrumpyInitCapability {
        async fn invoke(&self, _command: &str) -> Result<Option<String>, CapabilityError> {
            Ok(None)
        }

        async fn initialize(&self) -> Result<(), CapabilityError> {
            Err(CapabilityError::Initialization {
                id: "grumpy".to_string(),
                reason: "no device attached".to_string(),
            })
        }
    }

    struct TestProvider {
        id: &'static str,
        embedded: Option<JsonValue>,
        triggers: Vec<String>,
        fail_instantiate: bool,
        grumpy_init: bool,
        instantiations: Arc<AtomicUsize>,
    }

    impl TestProvider {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                embedded: None,
                triggers: Vec::new(),
                fail_instantiate: false,
                grumpy_init: false,
                instantiations: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn with_embedded(mut self, doc: JsonValue) -> Self {
            self.embedded = Some(doc);
            self
        }

        fn with_triggers(mut self, triggers: &[&str]) -> Self {
            self.triggers = triggers.iter().map(|t| t.to_string()).collect();
            self
        }

        fn failing(mut self) -> Self {
            self.fail_instantiate = true;
            self
        }

        fn grumpy(mut self) -> Self {
            self.grumpy_init = true;
            self
        }
    }

    impl CapabilityProvider for TestProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn embedded_manifest(&self) -> Option<JsonValue> {
            self.embedded.clone()
        }

        fn legacy_triggers(&self) -> Vec<String> {
            self.triggers.clone()
        }

        fn instantiate(&self) -> Result<Arc<dyn Capability>, CapabilityError> {
            self.instantiations.fetch_add(1, Ordering::SeqCst);
            if self.fail_instantiate {
                return Err(CapabilityError::Instantiation {
                    id: self.id.to_string(),
                    reason: "broken wiring".to_string(),
                });
            }
            if self.grumpy_init {
                return Ok(Arc::new(GrumpyInitCapability));
            }
            Ok(Arc::new(EchoCapability))
        }
    }

    fn manifest_doc(id: &str) -> JsonValue {
        json!({
            "id": id,
            "name": id.to_uppercase(),
            "intents": [format!("{id}.run")],
        })
    }

    #[tokio::test]
    async fn discovery_sorts_ids_and_skips_reserved() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path())
            .with_provider(Arc::new(
                TestProvider::new("zeta").with_embedded(manifest_doc("zeta")),
            ))
            .with_provider(Arc::new(
                TestProvider::new("alpha").with_embedded(manifest_doc("alpha")),
            ))
            .with_provider(Arc::new(TestProvider::new("_draft")));

        assert_eq!(registry.discover().await, ["alpha", "zeta"]);
        assert_eq!(registry.names().await, ["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn load_resolves_external_manifest_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("clock.json"),
            manifest_doc("clock").to_string(),
        )
        .expect("write manifest");
        let registry =
            CapabilityRegistry::new(dir.path()).with_provider(Arc::new(TestProvider::new("clock")));

        let entry = registry.load("clock").await.expect("loaded");
        assert!(entry.loaded());
        assert_eq!(entry.manifest_source, ManifestSource::File);
        assert!(entry.has_external_manifest);
        assert_eq!(entry.manifest.expect("manifest").name, "CLOCK");
    }

    #[tokio::test]
    async fn embedded_keys_override_file_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("clock.json"),
            json!({"id": "clock", "name": "From File", "intents": ["clock.run"]}).to_string(),
        )
        .expect("write manifest");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("clock").with_embedded(json!({"name": "From Module"})),
        ));

        let entry = registry.load("clock").await.expect("loaded");
        assert_eq!(entry.manifest_source, ManifestSource::FileAndEmbedded);
        let manifest = entry.manifest.expect("manifest");
        assert_eq!(manifest.name, "From Module");
        assert!(manifest.matches_intent("clock.run"));
    }

    #[tokio::test]
    async fn legacy_fallback_when_nothing_is_declared() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("greeter").with_triggers(&["say hello"]),
        ));

        let entry = registry.load("greeter").await.expect("loaded");
        assert_eq!(entry.manifest_source, ManifestSource::LegacyFallback);
        assert!(!entry.has_external_manifest);
        let manifest = entry.manifest.expect("manifest");
        assert!(manifest.matches_trigger("could you SAY HELLO please"));
    }

    #[tokio::test]
    async fn validation_failure_blocks_load_and_accumulates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("clock").with_embedded(json!({
                "id": "other",
                "name": "",
                "config_fields": {"volume": {"type": "slider"}},
            })),
        ));

        assert!(registry.load("clock").await.is_none());
        let entry = registry.entry("clock").await.expect("entry");
        assert!(!entry.loaded());
        assert_eq!(entry.validation_errors.len(), 4);
        assert_eq!(entry.manifest_source, ManifestSource::Embedded);
        let last_error = entry.last_error.expect("last error");
        assert!(last_error.contains("does not match"));
        assert!(last_error.contains("unsupported type 'slider'"));
    }

    #[tokio::test]
    async fn load_is_idempotent_and_reload_forces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let provider = TestProvider::new("clock").with_embedded(manifest_doc("clock"));
        let instantiations = provider.instantiations.clone();
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(provider));

        registry.load("clock").await.expect("first load");
        registry.load("clock").await.expect("cached load");
        assert_eq!(instantiations.load(Ordering::SeqCst), 1);

        registry.reload("clock").await.expect("reload");
        assert_eq!(instantiations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_reload_keeps_the_previous_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("clock.json");
        std::fs::write(&path, manifest_doc("clock").to_string()).expect("write manifest");
        let registry =
            CapabilityRegistry::new(dir.path()).with_provider(Arc::new(TestProvider::new("clock")));
        registry.load("clock").await.expect("initial load");

        std::fs::write(&path, "{ not json").expect("corrupt manifest");
        assert!(registry.reload("clock").await.is_none());

        let entry = registry.entry("clock").await.expect("entry");
        assert!(entry.loaded());
        assert_eq!(entry.manifest_source, ManifestSource::File);
        assert_eq!(entry.manifest.expect("old manifest").name, "CLOCK");
        assert!(entry.last_error.expect("last error").contains("invalid JSON"));

        let capability = registry.capability("clock").await.expect("old instance");
        let reply = capability.invoke("ping").await.expect("invoke");
        assert_eq!(reply.as_deref(), Some("echo: ping"));
    }

    #[tokio::test]
    async fn instantiation_error_is_recorded_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("clock")
                .with_embedded(manifest_doc("clock"))
                .failing(),
        ));

        assert!(registry.load("clock").await.is_none());
        let entry = registry.entry("clock").await.expect("entry");
        assert!(!entry.loaded());
        assert!(entry.validation_errors.is_empty());
        assert!(entry.last_error.expect("last error").contains("broken wiring"));
    }

    #[tokio::test]
    async fn invalid_manifest_json_is_a_load_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("clock.json"), "[1, 2").expect("write manifest");
        let registry =
            CapabilityRegistry::new(dir.path()).with_provider(Arc::new(TestProvider::new("clock")));

        assert!(registry.load("clock").await.is_none());
        let entry = registry.entry("clock").await.expect("entry");
        assert!(!entry.loaded());
        assert!(entry.has_external_manifest);
        assert!(entry.validation_errors.is_empty());
        assert!(entry.last_error.expect("last error").contains("invalid JSON"));
    }

    #[tokio::test]
    async fn unknown_id_records_error_and_discovery_drops_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path());

        assert!(registry.load("ghost").await.is_none());
        let entry = registry.entry("ghost").await.expect("entry");
        assert!(entry
            .last_error
            .expect("last error")
            .contains("no provider registered"));

        assert!(registry.discover().await.is_empty());
        assert!(registry.entry("ghost").await.is_none());
    }

    #[tokio::test]
    async fn initialize_failure_does_not_block_the_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("grumpy")
                .with_embedded(manifest_doc("grumpy"))
                .grumpy(),
        ));

        let entry = registry.load("grumpy").await.expect("loaded");
        assert!(entry.loaded());
        assert!(entry.last_error.is_none());
    }

    #[tokio::test]
    async fn candidates_follow_manifest_matching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path())
            .with_provider(Arc::new(
                TestProvider::new("clock").with_embedded(json!({
                    "id": "clock",
                    "name": "Clock",
                    "intents": ["time.lookup"],
                })),
            ))
            .with_provider(Arc::new(
                TestProvider::new("weather").with_embedded(json!({
                    "id": "weather",
                    "name": "Weather",
                    "intents": ["weather.lookup"],
                    "triggers": ["forecast"],
                })),
            ));

        assert_eq!(
            registry.candidates_by_intent("weather.lookup").await,
            ["weather"]
        );
        assert!(registry.candidates_by_intent("").await.is_empty());
        assert_eq!(
            registry.candidates_by_trigger("any FORECAST for today?").await,
            ["weather"]
        );
        assert!(registry.candidates_by_trigger("what time is it").await.is_empty());
    }

    #[tokio::test]
    async fn register_replaces_provider_after_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path()).with_provider(Arc::new(
            TestProvider::new("clock").with_embedded(json!({
                "id": "clock",
                "name": "Old",
                "intents": ["time.lookup"],
            })),
        ));
        registry.load("clock").await.expect("initial load");

        registry
            .register(Arc::new(TestProvider::new("clock").with_embedded(json!({
                "id": "clock",
                "name": "New",
                "intents": ["time.lookup"],
            }))))
            .await;

        // Idempotent load still serves the old handle.
        let cached = registry.load("clock").await.expect("cached");
        assert_eq!(cached.manifest.expect("manifest").name, "Old");

        let reloaded = registry.reload("clock").await.expect("reloaded");
        assert_eq!(reloaded.manifest.expect("manifest").name, "New");
    }

    #[tokio::test]
    async fn reload_all_counts_loaded_capabilities() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = CapabilityRegistry::new(dir.path())
            .with_provider(Arc::new(
                TestProvider::new("good").with_embedded(manifest_doc("good")),
            ))
            .with_provider(Arc::new(
                TestProvider::new("bad")
                    .with_embedded(manifest_doc("bad"))
                    .failing(),
            ));

        assert_eq!(registry.reload_all().await, 1);
    }

    #[tokio::test]
    async fn diagnostics_and_coverage_report_entry_states() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("good.json"),
            manifest_doc("good").to_string(),
        )
        .expect("write manifest");
        let registry = CapabilityRegistry::new(dir.path())
            .with_provider(Arc::new(
                TestProvider::new("good").with_embedded(json!({"name": "Good"})),
            ))
            .with_provider(Arc::new(
                TestProvider::new("bad")
                    .with_embedded(manifest_doc("bad"))
                    .failing(),
            ));

        let diagnostics = registry.diagnostics(true).await;
        assert_eq!(diagnostics.len(), 2);
        let good = diagnostics.iter().find(|d| d.id == "good").expect("good");
        assert!(good.loaded);
        assert_eq!(good.manifest_source, ManifestSource::FileAndEmbedded);
        assert_eq!(good.manifest_source.to_string(), "file+embedded");
        let bad = diagnostics.iter().find(|d| d.id == "bad").expect("bad");
        assert!(!bad.loaded);
        assert!(bad.last_error.is_some());

        let coverage = registry.manifest_coverage().await;
        assert_eq!(coverage.total, 2);
        assert_eq!(coverage.loaded, 1);
        assert_eq!(coverage.failed, 1);
        assert_eq!(coverage.with_file_manifest, 1);
        assert_eq!(coverage.with_embedded_manifest, 2);
        assert_eq!(coverage.legacy_fallback, 0);
        assert_eq!(coverage.missing_file_manifests, ["bad"]);
    }
}
