//! Capability manifests.
//!
//! A manifest is the declarative contract for one capability: identity,
//! accepted intents, trigger phrases, input/output ports, and configuration
//! schema. Manifests resolve from an external JSON file merged with an
//! optional embedded declaration (embedded keys override file keys), or from
//! a minimal legacy fallback built from the provider's trigger list.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Configuration field types a manifest may declare.
pub const ALLOWED_CONFIG_TYPES: [&str; 5] = ["string", "number", "boolean", "select", "textarea"];

/// A declared input or output port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port identifier referenced by workflow connections.
    #[serde(default)]
    pub id: String,
    /// Advisory value type.
    #[serde(rename = "type", default = "default_port_type")]
    pub port_type: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
}

fn default_port_type() -> String {
    "string".to_string()
}

/// Schema for one configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFieldSpec {
    /// Field type; must be one of [`ALLOWED_CONFIG_TYPES`].
    #[serde(rename = "type", default = "default_port_type")]
    pub field_type: String,
    /// Label shown in an editor.
    #[serde(default)]
    pub label: String,
    /// Help text.
    #[serde(default)]
    pub description: String,
    /// Whether the field must be set.
    #[serde(default)]
    pub required: bool,
    /// Default value.
    #[serde(default)]
    pub default: Option<JsonValue>,
    /// Choices for `select` fields.
    #[serde(default)]
    pub options: Vec<JsonValue>,
}

/// Declarative contract for one capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityManifest {
    /// Identity; must equal the registry key (case-insensitive).
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Manifest version string.
    #[serde(default = "default_version")]
    pub version: String,
    /// Intents this capability accepts.
    #[serde(default)]
    pub intents: Vec<String>,
    /// Trigger phrases matched as substrings of a query.
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Declared input ports.
    #[serde(default)]
    pub input_ports: Vec<PortSpec>,
    /// Declared output ports.
    #[serde(default)]
    pub output_ports: Vec<PortSpec>,
    /// Configuration schema keyed by field name.
    #[serde(default)]
    pub config_fields: BTreeMap<String, ConfigFieldSpec>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

impl CapabilityManifest {
    /// Builds the minimal legacy fallback for a provider without any
    /// declared manifest.
    #[must_use]
    pub fn legacy_fallback(id: &str, triggers: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            version: default_version(),
            intents: Vec::new(),
            triggers,
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            config_fields: BTreeMap::new(),
        }
    }

    /// Returns true when `intent` matches a declared intent, ignoring case.
    #[must_use]
    pub fn matches_intent(&self, intent: &str) -> bool {
        let wanted = intent.trim().to_lowercase();
        if wanted.is_empty() {
            return false;
        }
        self.intents
            .iter()
            .any(|declared| declared.trim().to_lowercase() == wanted)
    }

    /// Returns true when any trigger phrase occurs in `text`, ignoring case.
    #[must_use]
    pub fn matches_trigger(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.triggers.iter().any(|trigger| {
            let needle = trigger.trim().to_lowercase();
            !needle.is_empty() && haystack.contains(&needle)
        })
    }

    /// Checks the manifest against the contract for `expected_id`.
    ///
    /// Every violation is collected; validation never stops at the first
    /// problem. An empty result means the manifest is acceptable.
    #[must_use]
    pub fn validation_errors(&self, expected_id: &str) -> Vec<String> {
        let mut errors = Vec::new();

        if !self.id.eq_ignore_ascii_case(expected_id) {
            errors.push(format!(
                "manifest id '{}' does not match capability '{expected_id}'",
                self.id
            ));
        }
        if self.name.trim().is_empty() {
            errors.push("manifest is missing a display name".to_string());
        }
        if self.intents.is_empty() && self.triggers.is_empty() {
            errors.push("manifest declares no intents and no trigger phrases".to_string());
        }
        for (field, spec) in &self.config_fields {
            if !ALLOWED_CONFIG_TYPES.contains(&spec.field_type.as_str()) {
                errors.push(format!(
                    "config field '{field}' has unsupported type '{}'",
                    spec.field_type
                ));
            }
        }
        for port in self.input_ports.iter().chain(&self.output_ports) {
            if port.id.trim().is_empty() {
                errors.push("declared port is missing an id".to_string());
            }
        }

        errors
    }

    /// Names of declared input ports.
    #[must_use]
    pub fn input_port_ids(&self) -> Vec<String> {
        self.input_ports.iter().map(|p| p.id.clone()).collect()
    }

    /// Names of declared output ports.
    #[must_use]
    pub fn output_port_ids(&self) -> Vec<String> {
        self.output_ports.iter().map(|p| p.id.clone()).collect()
    }
}

/// Merges manifest documents at the top level; `embedded` keys win.
///
/// Merging happens on raw JSON so that only keys the embedded declaration
/// actually set override the file declaration.
#[must_use]
pub fn merge_documents(file: Option<JsonValue>, embedded: Option<JsonValue>) -> Option<JsonValue> {
    match (file, embedded) {
        (Some(JsonValue::Object(mut base)), Some(JsonValue::Object(overlay))) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Some(JsonValue::Object(base))
        }
        (file, embedded) => embedded.or(file),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest_with(intents: &[&str], triggers: &[&str]) -> CapabilityManifest {
        CapabilityManifest {
            id: "weather".to_string(),
            name: "Weather".to_string(),
            description: String::new(),
            version: default_version(),
            intents: intents.iter().map(|s| s.to_string()).collect(),
            triggers: triggers.iter().map(|s| s.to_string()).collect(),
            input_ports: Vec::new(),
            output_ports: Vec::new(),
            config_fields: BTreeMap::new(),
        }
    }

    #[test]
    fn parse_minimal_manifest() {
        let manifest: CapabilityManifest = serde_json::from_value(json!({
            "id": "weather",
            "name": "Weather",
            "intents": ["weather.lookup"],
        }))
        .expect("parse");

        assert_eq!(manifest.id, "weather");
        assert_eq!(manifest.version, "0.1.0");
        assert!(manifest.triggers.is_empty());
        assert!(manifest.validation_errors("weather").is_empty());
    }

    #[test]
    fn intent_matching_ignores_case() {
        let manifest = manifest_with(&["Weather.Lookup"], &[]);
        assert!(manifest.matches_intent("weather.lookup"));
        assert!(manifest.matches_intent(" WEATHER.LOOKUP "));
        assert!(!manifest.matches_intent("news.lookup"));
        assert!(!manifest.matches_intent(""));
    }

    #[test]
    fn trigger_matching_is_substring() {
        let manifest = manifest_with(&[], &["what's the weather"]);
        assert!(manifest.matches_trigger("Hey, WHAT'S THE WEATHER today?"));
        assert!(!manifest.matches_trigger("what is the forecast"));
    }

    #[test]
    fn validation_accumulates_every_problem() {
        let manifest: CapabilityManifest = serde_json::from_value(json!({
            "id": "other",
            "name": "",
            "input_ports": [{"id": ""}],
            "config_fields": {"volume": {"type": "slider"}},
        }))
        .expect("parse");

        let errors = manifest.validation_errors("weather");
        assert_eq!(errors.len(), 4);
        assert!(errors.iter().any(|e| e.contains("does not match")));
        assert!(errors.iter().any(|e| e.contains("display name")));
        assert!(errors.iter().any(|e| e.contains("no intents and no trigger phrases")));
        assert!(errors.iter().any(|e| e.contains("unsupported type 'slider'")));
    }

    #[test]
    fn port_without_id_is_reported() {
        let manifest: CapabilityManifest = serde_json::from_value(json!({
            "id": "weather",
            "name": "Weather",
            "intents": ["weather.lookup"],
            "output_ports": [{"id": "  "}],
        }))
        .expect("parse");

        let errors = manifest.validation_errors("weather");
        assert_eq!(errors, vec!["declared port is missing an id".to_string()]);
    }

    #[test]
    fn id_match_is_case_insensitive() {
        let manifest = manifest_with(&["x"], &[]);
        assert!(manifest.validation_errors("WEATHER").is_empty());
    }

    #[test]
    fn merge_prefers_embedded_keys() {
        let merged = merge_documents(
            Some(json!({"id": "weather", "name": "From File", "version": "1.0.0"})),
            Some(json!({"name": "From Embedded"})),
        )
        .expect("merged");

        assert_eq!(merged["id"], "weather");
        assert_eq!(merged["name"], "From Embedded");
        assert_eq!(merged["version"], "1.0.0");
    }

    #[test]
    fn merge_with_one_side_missing() {
        let file_only = merge_documents(Some(json!({"id": "a"})), None).expect("file side");
        assert_eq!(file_only["id"], "a");

        let embedded_only = merge_documents(None, Some(json!({"id": "b"}))).expect("embedded");
        assert_eq!(embedded_only["id"], "b");

        assert!(merge_documents(None, None).is_none());
    }

    #[test]
    fn legacy_fallback_is_loadable() {
        let manifest =
            CapabilityManifest::legacy_fallback("greeter", vec!["hello".to_string()]);
        assert!(manifest.validation_errors("greeter").is_empty());
        assert!(manifest.matches_trigger("Hello there"));
    }
}
