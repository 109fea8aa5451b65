//! Node kinds and port contracts.
//!
//! A definition's `type` keyword resolves to a closed set of builtin
//! behaviors plus capability-backed nodes. Each kind carries a port
//! contract; validation checks connections against it, where an empty
//! side of a contract means that side accepts anything.

use amber_relay_capability::CapabilityManifest;
use std::collections::BTreeSet;
use std::fmt;

/// Input ports treated as interchangeable carriers of plain text.
pub const TEXT_INPUT_SYNONYMS: [&str; 5] = ["text", "input", "command", "prompt", "message"];

/// Behavior of one node, resolved once at validation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Entry marker; passes its inputs through and raises `trigger`.
    Start,
    /// Terminal sink; echoes whatever reached it.
    End,
    /// Injects configured or upstream text.
    ManualInput,
    /// Logs the text that reached it.
    ConsoleOutput,
    /// Switches the active stage scene.
    StageSceneSwitch,
    /// Enables or disables a stage source.
    StageSourceToggle,
    /// Invokes a registered capability by id.
    Capability(String),
}

impl NodeKind {
    /// Resolves a definition's `type` keyword.
    ///
    /// Unrecognized keywords refer to capabilities, either through the
    /// explicit `capability:<id>` form or as a bare id.
    #[must_use]
    pub fn resolve(node_type: &str) -> Self {
        match node_type.trim() {
            "start" => Self::Start,
            "end" => Self::End,
            "manual-input" => Self::ManualInput,
            "console-output" => Self::ConsoleOutput,
            "stage-scene-switch" => Self::StageSceneSwitch,
            "stage-source-toggle" => Self::StageSourceToggle,
            other => {
                let id = other.strip_prefix("capability:").unwrap_or(other).trim();
                Self::Capability(id.to_string())
            }
        }
    }

    /// Fixed port contract for builtin kinds; `None` for capability nodes,
    /// whose contract comes from the manifest.
    #[must_use]
    pub fn builtin_contract(&self) -> Option<PortContract> {
        match self {
            Self::Start => Some(PortContract::from_names(&[], &["trigger"])),
            Self::End => Some(PortContract::from_names(
                &["text", "response", "input", "command", "prompt", "message"],
                &[],
            )),
            Self::ManualInput => Some(PortContract::from_names(&TEXT_INPUT_SYNONYMS, &["text"])),
            Self::ConsoleOutput => {
                Some(PortContract::from_names(&["text", "response"], &["text"]))
            }
            Self::StageSceneSwitch => Some(PortContract::from_names(
                &["scene", "scene_name", "text", "input", "command", "message"],
                &["response", "text", "scene", "ok"],
            )),
            Self::StageSourceToggle => Some(PortContract::from_names(
                &[
                    "scene",
                    "scene_name",
                    "source",
                    "source_name",
                    "enabled",
                    "text",
                    "input",
                    "command",
                    "message",
                ],
                &["response", "text", "scene", "source", "enabled", "ok"],
            )),
            Self::Capability(_) => None,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::End => write!(f, "end"),
            Self::ManualInput => write!(f, "manual-input"),
            Self::ConsoleOutput => write!(f, "console-output"),
            Self::StageSceneSwitch => write!(f, "stage-scene-switch"),
            Self::StageSourceToggle => write!(f, "stage-source-toggle"),
            Self::Capability(id) => write!(f, "capability:{id}"),
        }
    }
}

/// Declared ports for one node. An empty set leaves that side unchecked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortContract {
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl PortContract {
    fn from_names(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|port| (*port).to_string()).collect(),
            outputs: outputs.iter().map(|port| (*port).to_string()).collect(),
        }
    }

    /// Derives the contract for a capability node from its manifest.
    ///
    /// Manifests without declared inputs accept the text synonyms; a
    /// declared `text` input pulls in the other synonyms as well. Outputs
    /// default to `response`/`text`, and declaring either one implies the
    /// other.
    #[must_use]
    pub fn for_capability(manifest: &CapabilityManifest) -> Self {
        let mut inputs: BTreeSet<String> = manifest
            .input_port_ids()
            .into_iter()
            .map(|port| port.trim().to_string())
            .filter(|port| !port.is_empty())
            .collect();
        let mut outputs: BTreeSet<String> = manifest
            .output_port_ids()
            .into_iter()
            .map(|port| port.trim().to_string())
            .filter(|port| !port.is_empty())
            .collect();

        if inputs.is_empty() || inputs.contains("text") {
            inputs.extend(TEXT_INPUT_SYNONYMS.iter().map(|port| (*port).to_string()));
        }
        if outputs.is_empty() {
            outputs.insert("response".to_string());
            outputs.insert("text".to_string());
        } else {
            if outputs.contains("response") {
                outputs.insert("text".to_string());
            }
            if outputs.contains("text") {
                outputs.insert("response".to_string());
            }
        }

        Self { inputs, outputs }
    }

    /// Whether `port` may be used as an input on this node.
    #[must_use]
    pub fn allows_input(&self, port: &str) -> bool {
        self.inputs.is_empty() || self.inputs.contains(port)
    }

    /// Whether `port` may be used as an output of this node.
    #[must_use]
    pub fn allows_output(&self, port: &str) -> bool {
        self.outputs.is_empty() || self.outputs.contains(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(value: serde_json::Value) -> CapabilityManifest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn resolve_maps_builtin_keywords() {
        assert_eq!(NodeKind::resolve("start"), NodeKind::Start);
        assert_eq!(NodeKind::resolve(" end "), NodeKind::End);
        assert_eq!(NodeKind::resolve("manual-input"), NodeKind::ManualInput);
        assert_eq!(NodeKind::resolve("console-output"), NodeKind::ConsoleOutput);
        assert_eq!(
            NodeKind::resolve("stage-scene-switch"),
            NodeKind::StageSceneSwitch
        );
        assert_eq!(
            NodeKind::resolve("stage-source-toggle"),
            NodeKind::StageSourceToggle
        );
    }

    #[test]
    fn resolve_treats_unknown_types_as_capabilities() {
        assert_eq!(
            NodeKind::resolve("capability:clock"),
            NodeKind::Capability("clock".to_string())
        );
        assert_eq!(
            NodeKind::resolve("weather"),
            NodeKind::Capability("weather".to_string())
        );
        assert_eq!(
            NodeKind::resolve("capability: spaced "),
            NodeKind::Capability("spaced".to_string())
        );
    }

    #[test]
    fn start_contract_accepts_any_input() {
        let contract = NodeKind::Start.builtin_contract().unwrap();
        assert!(contract.allows_input("anything"));
        assert!(contract.allows_output("trigger"));
        assert!(!contract.allows_output("text"));
    }

    #[test]
    fn end_contract_accepts_text_synonyms_only() {
        let contract = NodeKind::End.builtin_contract().unwrap();
        assert!(contract.allows_input("prompt"));
        assert!(!contract.allows_input("scene"));
        assert!(contract.allows_output("anything"));
    }

    #[test]
    fn capability_contract_defaults_to_text_synonyms() {
        let contract = PortContract::for_capability(&manifest(json!({
            "id": "clock",
            "name": "Clock"
        })));
        assert!(contract.allows_input("prompt"));
        assert!(contract.allows_input("message"));
        assert!(contract.allows_output("response"));
        assert!(contract.allows_output("text"));
        assert!(!contract.allows_output("scene"));
    }

    #[test]
    fn declared_text_input_widens_to_synonyms() {
        let contract = PortContract::for_capability(&manifest(json!({
            "id": "echo",
            "name": "Echo",
            "input_ports": [{"id": "text"}],
            "output_ports": [{"id": "response"}]
        })));
        assert!(contract.allows_input("command"));
        assert!(contract.allows_output("text"));
    }

    #[test]
    fn declared_custom_ports_stay_narrow() {
        let contract = PortContract::for_capability(&manifest(json!({
            "id": "lights",
            "name": "Lights",
            "input_ports": [{"id": "color"}],
            "output_ports": [{"id": "status"}]
        })));
        assert!(contract.allows_input("color"));
        assert!(!contract.allows_input("text"));
        assert!(contract.allows_output("status"));
        assert!(!contract.allows_output("response"));
    }
}
