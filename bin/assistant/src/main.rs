//! Headless workflow assistant daemon.
//!
//! Wires the capability registry, event bus, and workflow runtime together,
//! optionally autostarts a configured workflow, and runs until interrupted.

mod config;

use amber_relay_capability::CapabilityRegistry;
use amber_relay_events::EventBus;
use amber_relay_runtime::WorkflowRuntime;
use config::AssistantConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = AssistantConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let registry = Arc::new(CapabilityRegistry::new(&config.capability_dir));
    let discovered = registry.discover().await;
    tracing::info!(
        capabilities = discovered.len(),
        dir = %config.capability_dir,
        "capability manifests discovered"
    );

    let bus = Arc::new(EventBus::with_history_capacity(
        config.engine.history_capacity,
    ));

    let runtime = WorkflowRuntime::new(
        &config.workflow_dir,
        Arc::clone(&registry),
        Arc::clone(&bus),
    )
    .with_queue_capacity(config.engine.queue_capacity)
    .with_invoke_timeout(Duration::from_secs(config.engine.invoke_timeout_seconds));

    runtime
        .ensure_workflow_dir()
        .expect("failed to create workflow directory");

    let catalog = runtime.list_workflows();
    tracing::info!(
        workflows = catalog.len(),
        dir = %config.workflow_dir,
        "workflow catalog scanned"
    );

    let outcome = runtime.autostart(&config.autostart_config()).await;
    if outcome.started {
        tracing::info!(workflow = %outcome.workflow_id, "autostart workflow running");
    } else if let Some(error) = &outcome.error {
        tracing::warn!(error = %error, "autostart did not start a workflow");
    }

    tracing::info!("assistant ready; waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");

    tracing::info!("shutting down");
    let status = runtime.stop().await;
    tracing::info!(
        events_processed = status.engine.events_processed,
        events_failed = status.engine.events_failed,
        "assistant stopped"
    );
}
