//! Scenario engine: runs registered scenarios as independent, cancellable instances.
//!
//! `run` allocates an instance and returns its id immediately; the steps execute
//! on their own tokio task. Steps of one instance never overlap, instances of
//! different runs interleave freely. The engine imposes no timeout of its own:
//! a transport call that never resolves leaves its instance `running` until the
//! call's own deadline (if any) fires.

pub mod context;
pub mod scenario;

pub use context::{Checkpoint, Params, Results, RunContext, TargetHandle};
pub use scenario::{Scenario, ScenarioRegistry, ScenarioSummary, Step};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::HostBridge;
use crate::error::{PipelineError, Result};
use crate::logging::{LogLevel, LogSink, RunLog};

const MODULE: &str = "ScenarioEngine";

/// Finished instances kept by [`Engine::new`]
pub const DEFAULT_MAX_FINISHED: usize = 200;

/// Unique id of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle of a run instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl InstanceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InstanceStatus::Succeeded | InstanceStatus::Failed | InstanceStatus::Cancelled
        )
    }

    /// Transitions only move forward; nothing leaves a terminal state.
    pub fn can_transition_to(self, next: InstanceStatus) -> bool {
        match (self, next) {
            (InstanceStatus::Pending, InstanceStatus::Running) => true,
            (InstanceStatus::Pending, InstanceStatus::Failed) => true,
            (InstanceStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Succeeded => "succeeded",
            InstanceStatus::Failed => "failed",
            InstanceStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Engine bookkeeping for one execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInstance {
    pub id: InstanceId,
    pub scenario_id: String,
    pub target: TargetHandle,
    pub status: InstanceStatus,
    pub error: Option<String>,
    pub current_step: Option<String>,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Snapshot of the context's results slot, refreshed after every step
    pub results: Results,
}

/// Progress notifications for observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RunEvent {
    #[serde(rename_all = "camelCase")]
    Started {
        instance_id: InstanceId,
        scenario_id: String,
    },
    #[serde(rename_all = "camelCase")]
    StepStarted {
        instance_id: InstanceId,
        index: usize,
        step: String,
    },
    #[serde(rename_all = "camelCase")]
    StepCompleted {
        instance_id: InstanceId,
        index: usize,
        step: String,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        instance_id: InstanceId,
        status: InstanceStatus,
        error: Option<String>,
    },
}

struct InstanceSlot {
    record: RunInstance,
    checkpoint: Checkpoint,
    done: watch::Sender<InstanceStatus>,
}

impl InstanceSlot {
    /// Finished and nobody is blocked in [`Engine::wait`] on it.
    fn is_prunable(&self) -> bool {
        self.record.status.is_terminal() && self.done.receiver_count() == 0
    }
}

struct EngineInner {
    registry: ScenarioRegistry,
    instances: RwLock<HashMap<InstanceId, InstanceSlot>>,
    host: Arc<dyn HostBridge>,
    log_sink: Arc<dyn LogSink>,
    events: broadcast::Sender<RunEvent>,
    max_finished: usize,
}

/// Registry plus runner. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(host: Arc<dyn HostBridge>, log_sink: Arc<dyn LogSink>) -> Self {
        Self::with_retention(host, log_sink, DEFAULT_MAX_FINISHED)
    }

    /// Keep at most `max_finished` finished instances (at least one). The
    /// oldest are dropped as new runs finish.
    pub fn with_retention(
        host: Arc<dyn HostBridge>,
        log_sink: Arc<dyn LogSink>,
        max_finished: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(EngineInner {
                registry: ScenarioRegistry::new(),
                instances: RwLock::new(HashMap::new()),
                host,
                log_sink,
                events,
                max_finished: max_finished.max(1),
            }),
        }
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.inner.registry
    }

    pub fn register_scenario(&self, scenario: Scenario) -> Result<Arc<Scenario>> {
        let scenario = self.inner.registry.register(scenario)?;
        debug!("Registered scenario '{}'", scenario.id());
        Ok(scenario)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.events.subscribe()
    }

    /// Start a scenario and return without waiting for it. Must be called
    /// from within a tokio runtime.
    pub fn run(&self, scenario: Arc<Scenario>, params: Params, target: TargetHandle) -> InstanceId {
        self.run_seeded(scenario, params, target, Results::new())
    }

    /// Resolve a registered scenario by id, check its required parameters and
    /// start it. Both failures surface here, before any instance exists.
    pub fn run_registered(
        &self,
        scenario_id: &str,
        params: Params,
        target: TargetHandle,
    ) -> Result<InstanceId> {
        let scenario = self.inner.registry.get(scenario_id)?;
        scenario.validate_params(&params)?;
        Ok(self.run(scenario, params, target))
    }

    /// Start a scenario whose results slot is pre-populated, so a step can be
    /// run on its own against inputs supplied by the caller.
    pub fn run_seeded(
        &self,
        scenario: Arc<Scenario>,
        params: Params,
        target: TargetHandle,
        seed: Results,
    ) -> InstanceId {
        let id = InstanceId::new();
        let checkpoint = Checkpoint::from_token(CancellationToken::new());
        let (done, _) = watch::channel(InstanceStatus::Pending);

        let record = RunInstance {
            id,
            scenario_id: scenario.id().to_string(),
            target: target.clone(),
            status: InstanceStatus::Pending,
            error: None,
            current_step: None,
            steps_completed: 0,
            total_steps: scenario.steps().len(),
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            results: seed.clone(),
        };

        self.inner.write_instances().insert(
            id,
            InstanceSlot {
                record,
                checkpoint: checkpoint.clone(),
                done,
            },
        );

        let log = RunLog::new(Arc::clone(&self.inner.log_sink), id.to_string());
        let ctx = RunContext::new(
            id,
            target,
            params,
            log,
            checkpoint,
            Arc::clone(&self.inner.host),
        )
        .with_results(seed);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(scenario, ctx).await;
        });

        id
    }

    /// Request cooperative cancellation. Returns `false` when the instance is
    /// already terminal (a no-op).
    pub fn cancel(&self, id: InstanceId) -> Result<bool> {
        let mut instances = self.inner.write_instances();
        let slot = instances.get_mut(&id).ok_or(PipelineError::NotFound(id))?;

        if slot.record.status.is_terminal() {
            return Ok(false);
        }

        slot.record.cancel_requested = true;
        slot.checkpoint.cancel();
        drop(instances);

        self.inner.log_sink.log(
            LogLevel::Warn,
            "Cancellation requested",
            crate::logging::LogFields {
                module: Some(MODULE.to_string()),
                context_id: Some(id.to_string()),
                meta: None,
            },
        );
        Ok(true)
    }

    /// Cancel every non-terminal instance; returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<InstanceId> = self
            .inner
            .read_instances()
            .values()
            .filter(|slot| !slot.record.status.is_terminal())
            .map(|slot| slot.record.id)
            .collect();

        ids.into_iter()
            .filter(|id| matches!(self.cancel(*id), Ok(true)))
            .count()
    }

    pub fn status(&self, id: InstanceId) -> Result<RunInstance> {
        self.inner
            .read_instances()
            .get(&id)
            .map(|slot| slot.record.clone())
            .ok_or(PipelineError::NotFound(id))
    }

    /// All known instances, oldest first
    pub fn instances(&self) -> Vec<RunInstance> {
        let mut records: Vec<_> = self
            .inner
            .read_instances()
            .values()
            .map(|slot| slot.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Resolve once the instance reaches a terminal state.
    pub async fn wait(&self, id: InstanceId) -> Result<RunInstance> {
        let mut rx = {
            let instances = self.inner.read_instances();
            let slot = instances.get(&id).ok_or(PipelineError::NotFound(id))?;
            slot.done.subscribe()
        };

        if rx.wait_for(|status| status.is_terminal()).await.is_err() {
            warn!("Status channel for {} closed before completion", id);
        }
        self.status(id)
    }

    /// Drop finished instances from the table; returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut instances = self.inner.write_instances();
        let before = instances.len();
        instances.retain(|_, slot| !slot.is_prunable());
        before - instances.len()
    }
}

impl EngineInner {
    fn read_instances(&self) -> RwLockReadGuard<'_, HashMap<InstanceId, InstanceSlot>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_instances(&self) -> RwLockWriteGuard<'_, HashMap<InstanceId, InstanceSlot>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: RunEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Drop the oldest finished instances beyond the retention bound. One
    /// that still has a waiter is skipped and counted against the bound.
    fn enforce_retention(&self) -> usize {
        let mut instances = self.write_instances();
        let mut finished: Vec<_> = instances
            .values()
            .filter(|slot| slot.record.status.is_terminal())
            .map(|slot| {
                let at = slot.record.finished_at.unwrap_or(slot.record.created_at);
                (at, slot.record.id, slot.is_prunable())
            })
            .collect();
        if finished.len() <= self.max_finished {
            return 0;
        }

        finished.sort_by_key(|(at, _, _)| *at);
        let excess = finished.len() - self.max_finished;
        let doomed: Vec<InstanceId> = finished
            .into_iter()
            .filter(|(_, _, prunable)| *prunable)
            .map(|(_, id, _)| id)
            .take(excess)
            .collect();
        for id in &doomed {
            instances.remove(id);
        }
        doomed.len()
    }

    /// Apply `update` to the instance record if it still exists.
    fn update<F: FnOnce(&mut RunInstance)>(&self, id: InstanceId, update: F) {
        if let Some(slot) = self.write_instances().get_mut(&id) {
            update(&mut slot.record);
        }
    }

    /// Move to `next` if the transition is legal; returns whether it happened.
    fn transition(&self, id: InstanceId, next: InstanceStatus) -> bool {
        let mut instances = self.write_instances();
        let Some(slot) = instances.get_mut(&id) else {
            return false;
        };
        if !slot.record.status.can_transition_to(next) {
            return false;
        }
        slot.record.status = next;
        match next {
            InstanceStatus::Running => slot.record.started_at = Some(Utc::now()),
            status if status.is_terminal() => {
                slot.record.finished_at = Some(Utc::now());
                slot.record.current_step = None;
            }
            _ => {}
        }
        slot.done.send_replace(next);
        true
    }

    async fn execute(self: Arc<Self>, scenario: Arc<Scenario>, ctx: RunContext) {
        let id = ctx.instance_id();
        let log = ctx.log().clone();

        if !self.transition(id, InstanceStatus::Running) {
            return;
        }
        self.emit(RunEvent::Started {
            instance_id: id,
            scenario_id: scenario.id().to_string(),
        });
        log.info(MODULE, format!("🚀 Starting scenario: {}", scenario.name()));

        // Steps run on a child task so a panicking step still yields a
        // terminal status instead of a forever-running instance.
        let worker = tokio::spawn(Arc::clone(&self).run_steps(Arc::clone(&scenario), ctx));
        let (outcome, results) = match worker.await {
            Ok(finished) => finished,
            Err(join_error) => {
                let last_snapshot = self
                    .read_instances()
                    .get(&id)
                    .map(|slot| slot.record.results.clone())
                    .unwrap_or_default();
                (Err(PipelineError::StepPanicked(join_error.to_string())), last_snapshot)
            }
        };

        self.finish(id, scenario.name(), outcome, results, &log);
    }

    async fn run_steps(
        self: Arc<Self>,
        scenario: Arc<Scenario>,
        mut ctx: RunContext,
    ) -> (Result<()>, Results) {
        let id = ctx.instance_id();
        let total = scenario.steps().len();

        for (index, step) in scenario.steps().iter().enumerate() {
            if let Err(e) = ctx.check() {
                return (Err(e), ctx.into_results());
            }

            let step_name = step.name().to_string();
            self.update(id, |record| record.current_step = Some(step_name.clone()));
            self.emit(RunEvent::StepStarted {
                instance_id: id,
                index,
                step: step_name.clone(),
            });
            ctx.log()
                .info(MODULE, format!("🔍 Step {}/{}: {}", index + 1, total, step_name));

            let outcome = step.run(&mut ctx).await;

            // Publish whatever the step wrote, even if it then failed
            let snapshot = ctx.results().clone();
            self.update(id, |record| {
                record.results = snapshot;
                if outcome.is_ok() {
                    record.steps_completed = index + 1;
                }
            });

            if let Err(e) = outcome {
                if !e.is_cancelled() {
                    ctx.log()
                        .error(MODULE, format!("❌ Step '{}' failed: {}", step_name, e));
                }
                return (Err(e), ctx.into_results());
            }

            self.emit(RunEvent::StepCompleted {
                instance_id: id,
                index,
                step: step_name.clone(),
            });
            ctx.log()
                .success(MODULE, format!("✅ Step {}/{} done: {}", index + 1, total, step_name));
        }

        (Ok(()), ctx.into_results())
    }

    fn finish(
        &self,
        id: InstanceId,
        scenario_name: &str,
        outcome: Result<()>,
        results: Results,
        log: &RunLog,
    ) {
        let (status, error) = match outcome {
            Ok(()) => (InstanceStatus::Succeeded, None),
            Err(PipelineError::Cancelled) => (InstanceStatus::Cancelled, None),
            Err(e) => (InstanceStatus::Failed, Some(e.to_string())),
        };

        self.update(id, |record| {
            record.results = results;
            record.error = error.clone();
        });
        if !self.transition(id, status) {
            return;
        }

        match status {
            InstanceStatus::Succeeded => {
                log.success(MODULE, format!("🎉 Scenario '{}' finished", scenario_name))
            }
            InstanceStatus::Cancelled => {
                log.warn(MODULE, format!("⏹️ Scenario '{}' cancelled", scenario_name))
            }
            _ => log.error(
                MODULE,
                format!(
                    "❌ Scenario '{}' failed: {}",
                    scenario_name,
                    error.as_deref().unwrap_or("unknown error")
                ),
            ),
        }

        self.emit(RunEvent::Finished {
            instance_id: id,
            status,
            error,
        });

        let dropped = self.enforce_retention();
        if dropped > 0 {
            debug!("Dropped {} finished instance(s) past retention", dropped);
        }
    }
}
