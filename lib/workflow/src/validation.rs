//! Definition validation and execution-order computation.
//!
//! Validation collects every problem it can find instead of stopping at
//! the first: structural checks, port contracts, filter compilation, and
//! finally cycle detection. A passing definition comes back as a
//! [`PreparedWorkflow`] with kinds resolved, filters compiled, and the
//! execution order fixed, so the run path never re-derives any of it.

use crate::definition::{ConnectionDefinition, NodeDefinition, WorkflowDefinition};
use crate::graph::WorkflowGraph;
use crate::node::{NodeKind, PortContract};
use amber_relay_capability::CapabilityRegistry;
use amber_relay_events::EventFilter;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// Outcome of validating one workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
    pub workflow_id: String,
    pub workflow_name: String,
    pub nodes: usize,
    pub connections: usize,
    pub start_node_id: Option<String>,
    pub execution_order: Vec<String>,
}

impl ValidationReport {
    pub(crate) fn from_prepared(prepared: &PreparedWorkflow) -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            workflow_id: prepared.id.clone(),
            workflow_name: prepared.name.clone(),
            nodes: prepared.order.len(),
            connections: prepared.connections.len(),
            start_node_id: prepared.start_node_id.clone(),
            execution_order: prepared
                .order
                .iter()
                .map(|node| node.definition.id.clone())
                .collect(),
        }
    }

    fn rejected(definition: &WorkflowDefinition, start: Option<&str>, errors: Vec<String>) -> Self {
        Self {
            ok: false,
            errors,
            workflow_id: definition.id.clone(),
            workflow_name: definition.name.clone(),
            nodes: definition.nodes.len(),
            connections: definition.connections.len(),
            start_node_id: start.map(String::from),
            execution_order: Vec::new(),
        }
    }
}

/// One node, ready to execute.
pub(crate) struct PreparedNode {
    pub definition: NodeDefinition,
    pub kind: NodeKind,
    pub filters: Vec<EventFilter>,
    pub inbound: usize,
}

/// A validated definition with its execution order fixed.
pub(crate) struct PreparedWorkflow {
    pub id: String,
    pub name: String,
    pub start_node_id: Option<String>,
    pub connections: Vec<ConnectionDefinition>,
    pub order: Vec<PreparedNode>,
}

/// Validates `definition` and fixes its execution order.
///
/// With a start node given, only the subgraph reachable from it is
/// considered; everything outside is ignored, errors included.
pub(crate) async fn prepare(
    registry: &CapabilityRegistry,
    definition: &WorkflowDefinition,
    start_node_id: Option<&str>,
) -> Result<PreparedWorkflow, ValidationReport> {
    let start = start_node_id
        .map(str::trim)
        .filter(|start| !start.is_empty())
        .map(String::from);
    let definition = definition.normalized();

    let definition = match resolve_subgraph(&definition, start.as_deref()) {
        Ok(subgraph) => subgraph,
        Err(message) => {
            return Err(ValidationReport {
                ok: false,
                errors: vec![message],
                workflow_id: String::new(),
                workflow_name: String::new(),
                nodes: 0,
                connections: 0,
                start_node_id: start,
                execution_order: Vec::new(),
            });
        }
    };

    let check = check_contracts(registry, &definition).await;
    if !check.errors.is_empty() {
        return Err(ValidationReport::rejected(
            &definition,
            start.as_deref(),
            check.errors,
        ));
    }

    let order_ids = match WorkflowGraph::build(&definition).kahn_order() {
        Ok(ids) => ids,
        Err(stuck) => {
            let error = format!("workflow contains a cycle involving: {}", stuck.join(", "));
            return Err(ValidationReport::rejected(
                &definition,
                start.as_deref(),
                vec![error],
            ));
        }
    };

    let inbound = inbound_counts(&definition);
    let mut nodes_by_id: HashMap<String, NodeDefinition> = definition
        .nodes
        .iter()
        .map(|node| (node.id.clone(), node.clone()))
        .collect();
    let mut kinds = check.kinds;
    let mut filters = check.filters;

    let mut order = Vec::with_capacity(order_ids.len());
    for id in &order_ids {
        let (Some(node), Some(kind)) = (nodes_by_id.remove(id), kinds.remove(id)) else {
            continue;
        };
        order.push(PreparedNode {
            kind,
            filters: filters.remove(id).unwrap_or_default(),
            inbound: inbound.get(id).copied().unwrap_or(0),
            definition: node,
        });
    }

    Ok(PreparedWorkflow {
        id: definition.id,
        name: definition.name,
        start_node_id: start,
        connections: definition.connections,
        order,
    })
}

struct ContractCheck {
    errors: Vec<String>,
    kinds: HashMap<String, NodeKind>,
    filters: HashMap<String, Vec<EventFilter>>,
}

async fn check_contracts(
    registry: &CapabilityRegistry,
    definition: &WorkflowDefinition,
) -> ContractCheck {
    let mut errors = Vec::new();
    let mut kinds: HashMap<String, NodeKind> = HashMap::new();
    let mut contracts: HashMap<String, PortContract> = HashMap::new();
    let mut filters: HashMap<String, Vec<EventFilter>> = HashMap::new();

    if definition.nodes.is_empty() {
        errors.push("workflow has no nodes".to_string());
    }

    for (index, node) in definition.nodes.iter().enumerate() {
        if node.id.is_empty() {
            errors.push(format!("node #{} is missing an id", index + 1));
            continue;
        }
        if kinds.contains_key(&node.id) {
            errors.push(format!("duplicate node id '{}'", node.id));
            continue;
        }
        if node.node_type.is_empty() {
            errors.push(format!("node '{}' is missing a type", node.id));
            continue;
        }

        let kind = NodeKind::resolve(&node.node_type);
        kinds.insert(node.id.clone(), kind.clone());
        match resolve_contract(registry, node, &kind).await {
            Ok(contract) => {
                contracts.insert(node.id.clone(), contract);
            }
            Err(message) => errors.push(message),
        }

        let mut compiled = Vec::new();
        for (position, spec) in node.event_filters.iter().enumerate() {
            if spec.event.is_empty() {
                continue;
            }
            match EventFilter::compile(&spec.event, &spec.condition) {
                Ok(filter) => compiled.push(filter),
                Err(err) => errors.push(format!(
                    "node '{}' event filter #{} has an invalid condition: {err}",
                    node.id,
                    position + 1
                )),
            }
        }
        filters.insert(node.id.clone(), compiled);
    }

    let mut fan_in: HashMap<(String, String), String> = HashMap::new();
    for (index, conn) in definition.connections.iter().enumerate() {
        let label = conn.label(index);
        if conn.from.node_id.is_empty() {
            errors.push(format!("connection '{label}' is missing from.nodeId"));
            continue;
        }
        if conn.to.node_id.is_empty() {
            errors.push(format!("connection '{label}' is missing to.nodeId"));
            continue;
        }
        if !kinds.contains_key(&conn.from.node_id) {
            errors.push(format!(
                "connection '{label}' references unknown from.nodeId '{}'",
                conn.from.node_id
            ));
            continue;
        }
        if !kinds.contains_key(&conn.to.node_id) {
            errors.push(format!(
                "connection '{label}' references unknown to.nodeId '{}'",
                conn.to.node_id
            ));
            continue;
        }

        if let Some(contract) = contracts.get(&conn.from.node_id) {
            if !conn.from.port.is_empty() && !contract.allows_output(&conn.from.port) {
                errors.push(format!(
                    "connection '{label}' uses invalid output port '{}' on node '{}' (valid ports: {})",
                    conn.from.port,
                    conn.from.node_id,
                    format_ports(&contract.outputs)
                ));
            }
        }

        let target_port = conn.target_port();
        if let Some(contract) = contracts.get(&conn.to.node_id) {
            if !contract.allows_input(target_port) {
                errors.push(format!(
                    "connection '{label}' uses invalid input port '{target_port}' on node '{}' (valid ports: {})",
                    conn.to.node_id,
                    format_ports(&contract.inputs)
                ));
            }
        }

        let key = (conn.to.node_id.clone(), target_port.to_string());
        match fan_in.get(&key) {
            Some(first) => errors.push(format!(
                "connections '{first}' and '{label}' both feed input port '{target_port}' of node '{}'",
                conn.to.node_id
            )),
            None => {
                fan_in.insert(key, label);
            }
        }
    }

    ContractCheck {
        errors,
        kinds,
        filters,
    }
}

async fn resolve_contract(
    registry: &CapabilityRegistry,
    node: &NodeDefinition,
    kind: &NodeKind,
) -> Result<PortContract, String> {
    match kind {
        NodeKind::Capability(capability_id) => {
            if capability_id.is_empty() {
                return Err(format!(
                    "node '{}' has unsupported type '{}' (use a builtin type or capability:<id>)",
                    node.id, node.node_type
                ));
            }
            match registry.manifest(capability_id).await {
                Some(manifest) => Ok(PortContract::for_capability(&manifest)),
                None => {
                    let detail = registry
                        .entry(capability_id)
                        .await
                        .and_then(|entry| entry.last_error)
                        .map(|err| format!(" ({err})"))
                        .unwrap_or_default();
                    Err(format!(
                        "node '{}' references capability '{capability_id}' without a valid manifest{detail}",
                        node.id
                    ))
                }
            }
        }
        _ => Ok(kind.builtin_contract().unwrap_or_default()),
    }
}

fn resolve_subgraph(
    definition: &WorkflowDefinition,
    start: Option<&str>,
) -> Result<WorkflowDefinition, String> {
    let Some(start) = start else {
        return Ok(definition.clone());
    };
    if !definition.nodes.iter().any(|node| node.id == start) {
        return Err(format!("start node '{start}' does not exist in the workflow"));
    }
    let reachable = WorkflowGraph::build(definition).reachable_from(start);
    Ok(WorkflowDefinition {
        id: definition.id.clone(),
        name: definition.name.clone(),
        nodes: definition
            .nodes
            .iter()
            .filter(|node| reachable.contains(&node.id))
            .cloned()
            .collect(),
        connections: definition
            .connections
            .iter()
            .filter(|conn| {
                reachable.contains(&conn.from.node_id) && reachable.contains(&conn.to.node_id)
            })
            .cloned()
            .collect(),
    })
}

fn inbound_counts(definition: &WorkflowDefinition) -> HashMap<String, usize> {
    let mut counts: HashMap<String, usize> = definition
        .nodes
        .iter()
        .map(|node| (node.id.clone(), 0))
        .collect();
    for conn in &definition.connections {
        if let Some(count) = counts.get_mut(&conn.to.node_id) {
            *count += 1;
        }
    }
    counts
}

fn format_ports(ports: &BTreeSet<String>) -> String {
    if ports.is_empty() {
        return "(none)".to_string();
    }
    ports.iter().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use amber_relay_capability::{Capability, CapabilityError, CapabilityProvider};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct StubCapability;

    #[async_trait]
    impl Capability for StubCapability {
        async fn invoke(&self, _command: &str) -> Result<Option<String>, CapabilityError> {
            Ok(Some("ok".to_string()))
        }
    }

    struct StubProvider {
        id: &'static str,
        manifest: serde_json::Value,
    }

    impl CapabilityProvider for StubProvider {
        fn id(&self) -> &str {
            self.id
        }

        fn embedded_manifest(&self) -> Option<serde_json::Value> {
            Some(self.manifest.clone())
        }

        fn instantiate(&self) -> Result<Arc<dyn Capability>, CapabilityError> {
            Ok(Arc::new(StubCapability))
        }
    }

    fn registry(dir: &TempDir) -> CapabilityRegistry {
        CapabilityRegistry::new(dir.path())
    }

    fn registry_with_echo(dir: &TempDir) -> CapabilityRegistry {
        registry(dir).with_provider(Arc::new(StubProvider {
            id: "echo",
            manifest: json!({"id": "echo", "name": "Echo"}),
        }))
    }

    fn definition(value: serde_json::Value) -> WorkflowDefinition {
        serde_json::from_value(value).unwrap()
    }

    async fn validate(
        registry: &CapabilityRegistry,
        value: serde_json::Value,
    ) -> ValidationReport {
        let definition = definition(value);
        match prepare(registry, &definition, None).await {
            Ok(prepared) => ValidationReport::from_prepared(&prepared),
            Err(report) => report,
        }
    }

    #[tokio::test]
    async fn empty_workflow_is_rejected() {
        let dir = TempDir::new().unwrap();
        let report = validate(&registry(&dir), json!({"id": "wf", "name": "Empty"})).await;
        assert!(!report.ok);
        assert_eq!(report.errors, vec!["workflow has no nodes"]);
        assert_eq!(report.nodes, 0);
        assert_eq!(report.workflow_id, "wf");
    }

    #[tokio::test]
    async fn structural_errors_accumulate() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "", "type": "start"},
                    {"id": "a", "type": "start"},
                    {"id": "a", "type": "end"},
                    {"id": "b"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": ""}, "to": {"nodeId": "a"}},
                    {"id": "c2", "from": {"nodeId": "a"}, "to": {"nodeId": "ghost"}}
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert!(report.errors.contains(&"node #1 is missing an id".to_string()));
        assert!(report.errors.contains(&"duplicate node id 'a'".to_string()));
        assert!(report.errors.contains(&"node 'b' is missing a type".to_string()));
        assert!(
            report
                .errors
                .contains(&"connection 'c1' is missing from.nodeId".to_string())
        );
        assert!(
            report
                .errors
                .contains(&"connection 'c2' references unknown to.nodeId 'ghost'".to_string())
        );
        assert_eq!(report.errors.len(), 5);
    }

    #[tokio::test]
    async fn invalid_output_port_lists_the_valid_ones() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "start", "type": "start"},
                    {"id": "out", "type": "console-output"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "start", "port": "text"}, "to": {"nodeId": "out", "port": "text"}}
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("invalid output port 'text' on node 'start'"));
        assert!(report.errors[0].contains("valid ports: trigger"));
    }

    #[tokio::test]
    async fn portless_connection_falls_back_to_input_port() {
        // console-output only accepts text/response, so the "input"
        // fallback port is an error.
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "start", "type": "start"},
                    {"id": "out", "type": "console-output"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "start"}, "to": {"nodeId": "out"}}
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert!(report.errors[0].contains("invalid input port 'input' on node 'out'"));
        assert!(report.errors[0].contains("valid ports: response, text"));
    }

    #[tokio::test]
    async fn capability_without_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [{"id": "n", "type": "capability:missing"}]
            }),
        )
        .await;

        assert!(!report.ok);
        assert!(
            report.errors[0]
                .contains("node 'n' references capability 'missing' without a valid manifest")
        );
    }

    #[tokio::test]
    async fn empty_capability_reference_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [{"id": "n", "type": "capability:"}]
            }),
        )
        .await;

        assert!(!report.ok);
        assert!(report.errors[0].contains("unsupported type"));
    }

    #[tokio::test]
    async fn capability_synonym_ports_are_accepted() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_echo(&dir);
        let report = validate(
            &registry,
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "start", "type": "start"},
                    {"id": "echo", "type": "capability:echo"},
                    {"id": "end", "type": "end"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "start"}, "to": {"nodeId": "echo", "port": "prompt"}},
                    {"id": "c2", "from": {"nodeId": "echo", "port": "response"}, "to": {"nodeId": "end"}}
                ]
            }),
        )
        .await;

        assert!(report.ok, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.execution_order, vec!["start", "echo", "end"]);
        assert_eq!(report.nodes, 3);
        assert_eq!(report.connections, 2);
    }

    #[tokio::test]
    async fn two_node_cycle_cites_both_nodes() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "a", "type": "manual-input"},
                    {"id": "b", "type": "manual-input"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "a", "port": "text"}, "to": {"nodeId": "b", "port": "text"}},
                    {"id": "c2", "from": {"nodeId": "b", "port": "text"}, "to": {"nodeId": "a", "port": "text"}}
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("cycle"));
        assert!(report.errors[0].contains('a'));
        assert!(report.errors[0].contains('b'));
        assert!(report.execution_order.is_empty());
    }

    #[tokio::test]
    async fn ambiguous_fan_in_is_rejected() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "a", "type": "manual-input"},
                    {"id": "b", "type": "manual-input"},
                    {"id": "sink", "type": "end"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "a", "port": "text"}, "to": {"nodeId": "sink", "port": "text"}},
                    {"id": "c2", "from": {"nodeId": "b", "port": "text"}, "to": {"nodeId": "sink", "port": "text"}}
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert!(
            report.errors[0]
                .contains("connections 'c1' and 'c2' both feed input port 'text' of node 'sink'")
        );
    }

    #[tokio::test]
    async fn distinct_target_ports_may_share_a_sink() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {"id": "a", "type": "manual-input"},
                    {"id": "b", "type": "manual-input"},
                    {"id": "sink", "type": "end"}
                ],
                "connections": [
                    {"id": "c1", "from": {"nodeId": "a", "port": "text"}, "to": {"nodeId": "sink", "port": "text"}},
                    {"id": "c2", "from": {"nodeId": "b", "port": "text"}, "to": {"nodeId": "sink", "port": "message"}}
                ]
            }),
        )
        .await;

        assert!(report.ok, "unexpected errors: {:?}", report.errors);
    }

    #[tokio::test]
    async fn invalid_filter_condition_is_reported() {
        let dir = TempDir::new().unwrap();
        let report = validate(
            &registry(&dir),
            json!({
                "id": "wf",
                "nodes": [
                    {
                        "id": "start",
                        "type": "start",
                        "eventFilters": [
                            {"event": "chat.*", "condition": "user ==="},
                            {"event": "", "condition": "ignored garbage ((("}
                        ]
                    }
                ]
            }),
        )
        .await;

        assert!(!report.ok);
        assert_eq!(report.errors.len(), 1);
        assert!(
            report.errors[0].contains("node 'start' event filter #1 has an invalid condition")
        );
    }

    #[tokio::test]
    async fn start_subgraph_ignores_unreachable_errors() {
        // The broken branch sits outside the requested subgraph, so the
        // validation only sees the reachable half.
        let dir = TempDir::new().unwrap();
        let definition = definition(json!({
            "id": "wf",
            "name": "Split",
            "nodes": [
                {"id": "main", "type": "start"},
                {"id": "sink", "type": "end"},
                {"id": "broken", "type": "capability:missing"}
            ],
            "connections": [
                {"id": "c1", "from": {"nodeId": "main"}, "to": {"nodeId": "sink", "port": "text"}},
                {"id": "c2", "from": {"nodeId": "broken"}, "to": {"nodeId": "sink", "port": "message"}}
            ]
        }));

        let registry = registry(&dir);
        let prepared = prepare(&registry, &definition, Some("main")).await;
        let report = match prepared {
            Ok(prepared) => ValidationReport::from_prepared(&prepared),
            Err(report) => report,
        };

        assert!(report.ok, "unexpected errors: {:?}", report.errors);
        assert_eq!(report.nodes, 2);
        assert_eq!(report.connections, 1);
        assert_eq!(report.execution_order, vec!["main", "sink"]);
        assert_eq!(report.start_node_id.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn unknown_start_node_is_the_only_error() {
        let dir = TempDir::new().unwrap();
        let definition = definition(json!({
            "id": "wf",
            "name": "Named",
            "nodes": [{"id": "a", "type": "start"}]
        }));

        let registry = registry(&dir);
        let report = match prepare(&registry, &definition, Some("nope")).await {
            Ok(prepared) => ValidationReport::from_prepared(&prepared),
            Err(report) => report,
        };

        assert!(!report.ok);
        assert_eq!(
            report.errors,
            vec!["start node 'nope' does not exist in the workflow"]
        );
        assert_eq!(report.nodes, 0);
        assert_eq!(report.connections, 0);
        assert!(report.workflow_id.is_empty());
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_echo(&dir);
        let doc = json!({
            "id": "wf",
            "nodes": [
                {"id": "start", "type": "start"},
                {"id": "echo", "type": "echo"}
            ],
            "connections": [
                {"id": "c1", "from": {"nodeId": "start"}, "to": {"nodeId": "echo", "port": "text"}}
            ]
        });

        let first = validate(&registry, doc.clone()).await;
        let second = validate(&registry, doc).await;
        assert!(first.ok);
        assert_eq!(first, second);
    }
}
