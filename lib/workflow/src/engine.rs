//! The workflow engine: validation, one-shot runs, and the event-driven
//! consumer loop.
//!
//! An engine owns one bounded event queue and at most one background
//! consumer. Starting event-driven execution validates the definition,
//! snapshots the prepared order, subscribes the queue to the bus, and
//! spawns the consumer; stopping tears the subscriptions down and joins
//! the consumer with a bounded wait. Counters and the last error are
//! visible at any time through [`WorkflowEngine::status`].

use crate::definition::WorkflowDefinition;
use crate::error::EngineError;
use crate::execution::{ExecutionContext, ExecutionReport, NodeOutputs, PassSeed, run_pass};
use crate::stage::{StageController, UnavailableStage};
use crate::validation::{PreparedWorkflow, ValidationReport, prepare};
use amber_relay_capability::CapabilityRegistry;
use amber_relay_core::{RunId, SubscriptionId};
use amber_relay_events::{EventBus, EventQueue, EventRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default bound on the engine's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Topic patterns used when a start request names none.
pub const DEFAULT_LISTEN_PATTERNS: [&str; 1] = ["chat.*"];
/// Default bound on a single capability invocation.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

const CONSUMER_POLL: Duration = Duration::from_millis(500);
const STOP_GRACE: Duration = Duration::from_millis(1500);
const SUBSCRIPTION_TAG: &str = "workflow-engine";

/// Point-in-time view of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub run_id: Option<RunId>,
    pub workflow_id: Option<String>,
    pub workflow_name: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub queue_depth: usize,
    pub queue_dropped: u64,
    pub queue_processing: bool,
    pub events_processed: u64,
    pub events_failed: u64,
    pub events_total: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct EngineState {
    run_id: Option<RunId>,
    workflow_id: Option<String>,
    workflow_name: Option<String>,
    subscriptions: Vec<SubscriptionId>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    events_processed: u64,
    events_failed: u64,
    last_event_at: Option<DateTime<Utc>>,
}

/// Validates and executes workflow definitions against a capability
/// registry and an event bus.
pub struct WorkflowEngine {
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    stage: Arc<dyn StageController>,
    queue: Arc<EventQueue<EventRecord>>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<EngineState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    invoke_timeout: Duration,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(registry: Arc<CapabilityRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            registry,
            bus,
            stage: Arc::new(UnavailableStage),
            queue: Arc::new(EventQueue::new(DEFAULT_QUEUE_CAPACITY)),
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(EngineState::default())),
            worker: Mutex::new(None),
            invoke_timeout: DEFAULT_INVOKE_TIMEOUT,
        }
    }

    /// Replaces the stage controller used by stage nodes.
    #[must_use]
    pub fn with_stage_controller(mut self, stage: Arc<dyn StageController>) -> Self {
        self.stage = stage;
        self
    }

    /// Replaces the event queue with one of the given capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue = Arc::new(EventQueue::new(capacity));
        self
    }

    /// Bounds each capability invocation.
    #[must_use]
    pub fn with_invoke_timeout(mut self, timeout: Duration) -> Self {
        self.invoke_timeout = timeout;
        self
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates a definition without running it.
    pub async fn validate(
        &self,
        definition: &WorkflowDefinition,
        start_node_id: Option<&str>,
    ) -> ValidationReport {
        match prepare(&self.registry, definition, start_node_id).await {
            Ok(prepared) => ValidationReport::from_prepared(&prepared),
            Err(report) => report,
        }
    }

    /// Validates and executes one pass, seeded with `initial_inputs`.
    ///
    /// Stateless: the engine's event-driven state and counters are not
    /// touched.
    pub async fn run_once(
        &self,
        definition: &WorkflowDefinition,
        start_node_id: Option<&str>,
        initial_inputs: Option<&NodeOutputs>,
    ) -> Result<ExecutionReport, EngineError> {
        let prepared = prepare(&self.registry, definition, start_node_id)
            .await
            .map_err(|report| EngineError::ValidationFailed {
                errors: report.errors,
            })?;

        let ctx = ExecutionContext {
            registry: &self.registry,
            stage: self.stage.as_ref(),
            invoke_timeout: self.invoke_timeout,
        };
        let empty = NodeOutputs::new();
        run_pass(
            &ctx,
            &prepared,
            PassSeed::Inputs(initial_inputs.unwrap_or(&empty)),
        )
        .await
    }

    /// Validates the definition, then subscribes to `listen_patterns`
    /// (default [`DEFAULT_LISTEN_PATTERNS`]) and spawns the consumer.
    ///
    /// A previous run is stopped first; counters and queue metrics reset.
    pub async fn start_event_driven(
        &self,
        definition: &WorkflowDefinition,
        listen_patterns: &[String],
        start_node_id: Option<&str>,
    ) -> Result<(), EngineError> {
        self.stop_event_driven().await;

        let prepared = prepare(&self.registry, definition, start_node_id)
            .await
            .map_err(|report| EngineError::ValidationFailed {
                errors: report.errors,
            })?;
        let prepared = Arc::new(prepared);
        let run_id = RunId::new();

        {
            let mut state = self.lock_state();
            state.run_id = Some(run_id);
            state.workflow_id = Some(prepared.id.clone());
            state.workflow_name = Some(prepared.name.clone());
            state.started_at = Some(Utc::now());
            state.last_error = None;
            state.events_processed = 0;
            state.events_failed = 0;
            state.last_event_at = None;
        }

        self.running.store(true, Ordering::SeqCst);
        self.queue.clear();
        self.queue.reset_metrics();

        let patterns: Vec<String> = if listen_patterns.is_empty() {
            DEFAULT_LISTEN_PATTERNS
                .iter()
                .map(|pattern| (*pattern).to_string())
                .collect()
        } else {
            listen_patterns.to_vec()
        };

        let mut subscriptions = Vec::with_capacity(patterns.len());
        for pattern in &patterns {
            let queue = Arc::clone(&self.queue);
            let running = Arc::clone(&self.running);
            let id = self.bus.subscribe_with(
                pattern,
                Vec::new(),
                Some(SUBSCRIPTION_TAG),
                move |event: &EventRecord| {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(evicted) = queue.put(event.clone()) {
                        warn!(topic = %evicted.topic, "event queue full; evicted oldest event");
                    }
                },
            );
            subscriptions.push(id);
        }
        self.lock_state().subscriptions = subscriptions;

        let handle = self.spawn_consumer(Arc::clone(&prepared));
        *self.lock_worker() = Some(handle);

        info!(
            run = %run_id,
            workflow = %prepared.id,
            patterns = ?patterns,
            "event-driven workflow started"
        );
        Ok(())
    }

    fn spawn_consumer(&self, prepared: Arc<PreparedWorkflow>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let stage = Arc::clone(&self.stage);
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let state = Arc::clone(&self.state);
        let invoke_timeout = self.invoke_timeout;

        tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let Some(event) = queue.get(CONSUMER_POLL).await else {
                    continue;
                };
                queue.set_processing(true);
                let ctx = ExecutionContext {
                    registry: registry.as_ref(),
                    stage: stage.as_ref(),
                    invoke_timeout,
                };
                let outcome = run_pass(&ctx, &prepared, PassSeed::Event(&event)).await;
                {
                    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                    match outcome {
                        Ok(_) => state.events_processed += 1,
                        Err(err) => {
                            state.events_failed += 1;
                            state.last_error = Some(err.to_string());
                            error!(topic = %event.topic, error = %err, "event processing failed");
                        }
                    }
                    state.last_event_at = Some(Utc::now());
                }
                queue.set_processing(false);
            }
            debug!("workflow consumer stopped");
        })
    }

    /// Stops event-driven execution: clears the running flag, drops the
    /// bus subscriptions, drains the queue, and joins the consumer with a
    /// bounded wait. An event mid-execution is not interrupted; if the
    /// consumer outlives the grace period it is detached, not aborted.
    pub async fn stop_event_driven(&self) {
        self.running.store(false, Ordering::SeqCst);

        let subscriptions = {
            let mut state = self.lock_state();
            std::mem::take(&mut state.subscriptions)
        };
        for id in subscriptions {
            self.bus.unsubscribe(id);
        }

        self.queue.clear();
        self.queue.set_processing(false);

        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            match tokio::time::timeout(STOP_GRACE, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "workflow consumer ended abnormally"),
                Err(_) => {
                    warn!("workflow consumer did not stop within the grace period; detaching");
                }
            }
        }
    }

    /// Snapshot of flags, counters, and queue metrics.
    #[must_use]
    pub fn status(&self) -> EngineStatus {
        let state = self.lock_state();
        EngineStatus {
            running: self.running.load(Ordering::SeqCst),
            run_id: state.run_id,
            workflow_id: state.workflow_id.clone(),
            workflow_name: state.workflow_name.clone(),
            started_at: state.started_at,
            last_error: state.last_error.clone(),
            queue_depth: self.queue.len(),
            queue_dropped: self.queue.dropped_count(),
            queue_processing: self.queue.is_processing(),
            events_processed: state.events_processed,
            events_failed: state.events_failed,
            events_total: state.events_processed + state.events_failed,
            last_event_at: state.last_event_at,
        }
    }
}
