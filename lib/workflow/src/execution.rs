//! Node execution and inter-node data flow.
//!
//! A pass walks the prepared order once. Each node's output map is kept
//! for downstream resolution and for the final report; inputs resolve per
//! connection from upstream outputs, with source nodes falling back to
//! the pass seed (the caller's initial inputs, or a flattened event).

use crate::definition::ConnectionDefinition;
use crate::error::EngineError;
use crate::node::{NodeKind, TEXT_INPUT_SYNONYMS};
use crate::stage::StageController;
use crate::validation::{PreparedNode, PreparedWorkflow};
use amber_relay_capability::CapabilityRegistry;
use amber_relay_events::EventRecord;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Output map produced by one node.
pub type NodeOutputs = Map<String, JsonValue>;

/// Result of one pass: node id to the outputs it produced.
pub type ExecutionReport = BTreeMap<String, NodeOutputs>;

/// What seeds a source node when nothing upstream resolved.
#[derive(Clone, Copy)]
pub(crate) enum PassSeed<'a> {
    Inputs(&'a NodeOutputs),
    Event(&'a EventRecord),
}

/// Shared handles a pass executes against.
pub(crate) struct ExecutionContext<'a> {
    pub registry: &'a CapabilityRegistry,
    pub stage: &'a dyn StageController,
    pub invoke_timeout: Duration,
}

/// Executes one full pass over the prepared order.
pub(crate) async fn run_pass(
    ctx: &ExecutionContext<'_>,
    prepared: &PreparedWorkflow,
    seed: PassSeed<'_>,
) -> Result<ExecutionReport, EngineError> {
    let event = match seed {
        PassSeed::Event(event) => Some(event),
        PassSeed::Inputs(_) => None,
    };

    let mut report = ExecutionReport::new();
    for node in &prepared.order {
        if let Some(event) = event {
            if !node_accepts_event(node, event) {
                continue;
            }
        }

        let mut inputs = resolve_inputs(&node.definition.id, &prepared.connections, &report);
        if inputs.is_empty() && node.inbound == 0 {
            inputs = match seed {
                PassSeed::Inputs(initial) => initial.clone(),
                PassSeed::Event(event) => event_inputs(event),
            };
        }
        if inputs.is_empty() && node.inbound > 0 {
            continue;
        }

        let outputs = execute_node(ctx, node, &inputs, event).await?;
        report.insert(node.definition.id.clone(), outputs);
    }
    Ok(report)
}

fn node_accepts_event(node: &PreparedNode, event: &EventRecord) -> bool {
    node.filters.is_empty() || node.filters.iter().any(|filter| filter.matches(event))
}

/// Resolves a node's inputs from its inbound connections.
///
/// Upstream nodes that produced nothing (or did not run) contribute
/// nothing. The value is the named source port when present, then the
/// upstream "text" key, then the whole upstream map.
pub(crate) fn resolve_inputs(
    node_id: &str,
    connections: &[ConnectionDefinition],
    report: &ExecutionReport,
) -> NodeOutputs {
    let mut inputs = NodeOutputs::new();
    for conn in connections {
        if conn.to.node_id != node_id {
            continue;
        }
        let Some(upstream) = report.get(&conn.from.node_id) else {
            continue;
        };
        if upstream.is_empty() {
            continue;
        }

        let named = (!conn.from.port.is_empty())
            .then(|| upstream.get(conn.from.port.as_str()))
            .flatten();
        let value = match named.or_else(|| upstream.get("text")) {
            Some(value) => value.clone(),
            None => JsonValue::Object(upstream.clone()),
        };
        inputs.insert(conn.target_port().to_string(), value);
    }
    inputs
}

/// Flattens an event into an input map: the payload, plus `topic` and
/// `source` where the payload does not already define them.
pub(crate) fn event_inputs(event: &EventRecord) -> NodeOutputs {
    let mut inputs = event.payload.clone();
    inputs
        .entry("topic")
        .or_insert_with(|| JsonValue::String(event.topic.clone()));
    inputs
        .entry("source")
        .or_insert_with(|| JsonValue::String(event.source.clone()));
    inputs
}

const COMMAND_INPUT_KEYS: [&str; 5] = ["command", "prompt", "text", "message", "input"];
const COMMAND_CONFIG_KEYS: [&str; 5] = ["command", "inputText", "text", "prompt", "message"];
const COMMAND_EVENT_KEYS: [&str; 3] = ["text", "message", "command"];

/// Picks the text command for a capability node: resolved inputs first,
/// then static config, then (event-driven only) the event payload.
pub(crate) fn pick_command(
    inputs: &NodeOutputs,
    config: &Map<String, JsonValue>,
    event: Option<&EventRecord>,
) -> Option<String> {
    for key in COMMAND_INPUT_KEYS {
        if let Some(text) = nonempty_str(inputs.get(key)) {
            return Some(text);
        }
    }
    for key in COMMAND_CONFIG_KEYS {
        if let Some(text) = nonempty_str(config.get(key)) {
            return Some(text);
        }
    }
    if let Some(event) = event {
        for key in COMMAND_EVENT_KEYS {
            if let Some(text) = nonempty_str(event.payload.get(key)) {
                return Some(text);
            }
        }
    }
    None
}

fn nonempty_str(value: Option<&JsonValue>) -> Option<String> {
    let text = value?.as_str()?.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Lenient truthiness for workflow values: booleans as-is, numbers by
/// non-zero, strings by keyword, anything else takes the default.
pub(crate) fn to_bool(value: Option<&JsonValue>, default: bool) -> bool {
    match value {
        None | Some(JsonValue::Null) => default,
        Some(JsonValue::Bool(flag)) => *flag,
        Some(JsonValue::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(JsonValue::String(text)) => match text.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Some(_) => default,
    }
}

const SCENE_INPUT_KEYS: [&str; 6] = ["scene", "scene_name", "input", "text", "command", "message"];
const SCENE_CONFIG_KEYS: [&str; 2] = ["sceneName", "scene"];
const SOURCE_INPUT_KEYS: [&str; 2] = ["source", "source_name"];
const SOURCE_CONFIG_KEYS: [&str; 2] = ["sourceName", "source"];

fn pick_scene(inputs: &NodeOutputs, config: &Map<String, JsonValue>) -> Option<String> {
    SCENE_INPUT_KEYS
        .iter()
        .find_map(|key| nonempty_str(inputs.get(*key)))
        .or_else(|| {
            SCENE_CONFIG_KEYS
                .iter()
                .find_map(|key| nonempty_str(config.get(*key)))
        })
}

fn pick_source(inputs: &NodeOutputs, config: &Map<String, JsonValue>) -> Option<String> {
    SOURCE_INPUT_KEYS
        .iter()
        .find_map(|key| nonempty_str(inputs.get(*key)))
        .or_else(|| {
            SOURCE_CONFIG_KEYS
                .iter()
                .find_map(|key| nonempty_str(config.get(*key)))
        })
}

fn pick_enabled(inputs: &NodeOutputs, config: &Map<String, JsonValue>) -> bool {
    if inputs.contains_key("enabled") {
        to_bool(inputs.get("enabled"), true)
    } else {
        to_bool(config.get("enabled"), true)
    }
}

async fn execute_node(
    ctx: &ExecutionContext<'_>,
    node: &PreparedNode,
    inputs: &NodeOutputs,
    event: Option<&EventRecord>,
) -> Result<NodeOutputs, EngineError> {
    let config = &node.definition.config;
    match &node.kind {
        NodeKind::Start => {
            // Pass the seed through so downstream nodes see it.
            let mut outputs = inputs.clone();
            outputs.insert("trigger".to_string(), JsonValue::Bool(true));
            Ok(outputs)
        }
        NodeKind::End => Ok(inputs.clone()),
        NodeKind::ManualInput => {
            let text = nonempty_str(config.get("inputText"))
                .or_else(|| {
                    TEXT_INPUT_SYNONYMS
                        .iter()
                        .find_map(|key| nonempty_str(inputs.get(*key)))
                })
                .unwrap_or_default();
            Ok(text_output(text))
        }
        NodeKind::ConsoleOutput => {
            let text = nonempty_str(inputs.get("text"))
                .or_else(|| nonempty_str(inputs.get("response")))
                .unwrap_or_default();
            info!(node = %node.definition.id, text = %text, "workflow console output");
            Ok(text_output(text))
        }
        NodeKind::StageSceneSwitch => Ok(execute_scene_switch(ctx, config, inputs).await),
        NodeKind::StageSourceToggle => Ok(execute_source_toggle(ctx, config, inputs).await),
        NodeKind::Capability(capability_id) => {
            execute_capability(ctx, node, capability_id, inputs, event).await
        }
    }
}

fn text_output(text: String) -> NodeOutputs {
    let mut outputs = NodeOutputs::new();
    outputs.insert("text".to_string(), JsonValue::String(text));
    outputs
}

async fn execute_scene_switch(
    ctx: &ExecutionContext<'_>,
    config: &Map<String, JsonValue>,
    inputs: &NodeOutputs,
) -> NodeOutputs {
    let Some(scene) = pick_scene(inputs, config) else {
        return scene_outputs("no scene name provided", "", false);
    };
    let ok = match ctx.stage.switch_scene(&scene).await {
        Ok(()) => true,
        Err(err) => {
            warn!(scene = %scene, error = %err, "stage scene switch failed");
            false
        }
    };
    let message = if ok {
        format!("stage scene switched to '{scene}'")
    } else {
        format!("failed to switch stage scene to '{scene}'")
    };
    scene_outputs(&message, &scene, ok)
}

fn scene_outputs(message: &str, scene: &str, ok: bool) -> NodeOutputs {
    let mut outputs = NodeOutputs::new();
    outputs.insert("response".to_string(), message.into());
    outputs.insert("text".to_string(), message.into());
    outputs.insert("scene".to_string(), scene.into());
    outputs.insert("ok".to_string(), ok.into());
    outputs
}

async fn execute_source_toggle(
    ctx: &ExecutionContext<'_>,
    config: &Map<String, JsonValue>,
    inputs: &NodeOutputs,
) -> NodeOutputs {
    let scene = pick_scene(inputs, config);
    let enabled = pick_enabled(inputs, config);
    let Some(source) = pick_source(inputs, config) else {
        return source_outputs(
            "no source name provided",
            scene.as_deref().unwrap_or(""),
            "",
            enabled,
            false,
        );
    };
    let ok = match ctx
        .stage
        .set_source_enabled(&source, enabled, scene.as_deref())
        .await
    {
        Ok(()) => true,
        Err(err) => {
            warn!(source = %source, error = %err, "stage source toggle failed");
            false
        }
    };
    let action = if enabled { "enabled" } else { "disabled" };
    let message = if ok {
        format!("stage source '{source}' {action}")
    } else {
        format!("failed to update stage source '{source}' ({action})")
    };
    source_outputs(
        &message,
        scene.as_deref().unwrap_or(""),
        &source,
        enabled,
        ok,
    )
}

fn source_outputs(
    message: &str,
    scene: &str,
    source: &str,
    enabled: bool,
    ok: bool,
) -> NodeOutputs {
    let mut outputs = NodeOutputs::new();
    outputs.insert("response".to_string(), message.into());
    outputs.insert("text".to_string(), message.into());
    outputs.insert("scene".to_string(), scene.into());
    outputs.insert("source".to_string(), source.into());
    outputs.insert("enabled".to_string(), enabled.into());
    outputs.insert("ok".to_string(), ok.into());
    outputs
}

async fn execute_capability(
    ctx: &ExecutionContext<'_>,
    node: &PreparedNode,
    capability_id: &str,
    inputs: &NodeOutputs,
    event: Option<&EventRecord>,
) -> Result<NodeOutputs, EngineError> {
    let Some(capability) = ctx.registry.capability(capability_id).await else {
        warn!(
            node = %node.definition.id,
            capability = %capability_id,
            "capability not loaded; node produced nothing"
        );
        return Ok(NodeOutputs::new());
    };
    let Some(command) = pick_command(inputs, &node.definition.config, event) else {
        return Ok(NodeOutputs::new());
    };

    let reply = match tokio::time::timeout(ctx.invoke_timeout, capability.invoke(&command)).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(source)) => {
            return Err(EngineError::CapabilityFailed {
                node_id: node.definition.id.clone(),
                capability_id: capability_id.to_string(),
                source,
            });
        }
        Err(_) => {
            return Err(EngineError::InvocationTimedOut {
                node_id: node.definition.id.clone(),
                capability_id: capability_id.to_string(),
                timeout: ctx.invoke_timeout,
            });
        }
    };

    Ok(match reply {
        Some(text) => {
            let mut outputs = NodeOutputs::new();
            outputs.insert("response".to_string(), text.clone().into());
            outputs.insert("text".to_string(), text.into());
            outputs
        }
        None => NodeOutputs::new(),
    })
}
