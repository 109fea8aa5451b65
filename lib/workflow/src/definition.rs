//! Workflow definition documents.
//!
//! A definition is the stored form of a workflow: nodes, connections, and
//! per-node event filters. Documents are lenient on input (every field has
//! a default, `eventFilters` is accepted as an alias) and the engine never
//! mutates one after loading; validation works on a [`normalized`] copy.
//!
//! [`normalized`]: WorkflowDefinition::normalized

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One event filter attached to a node.
///
/// `event` is a glob-style topic pattern; `condition` is an optional
/// boolean expression over the event payload. Filters with an empty
/// pattern are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilterSpec {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub condition: String,
}

/// One node in a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub node_type: String,
    #[serde(default)]
    pub config: Map<String, JsonValue>,
    #[serde(default, alias = "eventFilters")]
    pub event_filters: Vec<EventFilterSpec>,
}

/// One end of a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(rename = "nodeId", default)]
    pub node_id: String,
    #[serde(default)]
    pub port: String,
}

/// A directed edge between two node ports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub from: Endpoint,
    #[serde(default)]
    pub to: Endpoint,
}

impl ConnectionDefinition {
    /// Destination port after fallback: the explicit target port, then the
    /// source port, then `"input"`.
    #[must_use]
    pub fn target_port(&self) -> &str {
        if !self.to.port.is_empty() {
            &self.to.port
        } else if !self.from.port.is_empty() {
            &self.from.port
        } else {
            "input"
        }
    }

    /// Name used for this connection in validation messages.
    pub(crate) fn label(&self, index: usize) -> String {
        if self.id.is_empty() {
            format!("conn#{}", index + 1)
        } else {
            self.id.clone()
        }
    }
}

/// A complete workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub connections: Vec<ConnectionDefinition>,
}

impl WorkflowDefinition {
    /// Returns a copy with all identifiers, types, ports, and filter
    /// patterns trimmed of surrounding whitespace.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let nodes = self
            .nodes
            .iter()
            .map(|node| NodeDefinition {
                id: node.id.trim().to_string(),
                node_type: node.node_type.trim().to_string(),
                config: node.config.clone(),
                event_filters: node
                    .event_filters
                    .iter()
                    .map(|filter| EventFilterSpec {
                        event: filter.event.trim().to_string(),
                        condition: filter.condition.trim().to_string(),
                    })
                    .collect(),
            })
            .collect();
        let connections = self
            .connections
            .iter()
            .map(|conn| ConnectionDefinition {
                id: conn.id.trim().to_string(),
                from: Endpoint {
                    node_id: conn.from.node_id.trim().to_string(),
                    port: conn.from.port.trim().to_string(),
                },
                to: Endpoint {
                    node_id: conn.to.node_id.trim().to_string(),
                    port: conn.to.port.trim().to_string(),
                },
            })
            .collect();
        Self {
            id: self.id.trim().to_string(),
            name: self.name.trim().to_string(),
            nodes,
            connections,
        }
    }
}
