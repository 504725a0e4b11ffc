//! Evaluation run orchestrator
//!
//! One pass over the registry:
//! 1. Fan out every independent probe concurrently; each branch persists its
//!    own value as soon as it has one.
//! 2. Fan in: wait for every branch to settle. A failed branch never cancels
//!    its siblings.
//! 3. Issue each shared upstream call once and derive its dependent probes.
//!    A failed shared call skips the whole group.
//!
//! The pass is bounded by a single wall-clock deadline. On expiry the
//! branches still in flight are dropped and their results discarded.
//!
//! Overlapping runs are not serialized: their writes interleave and the last
//! write per key wins.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{ProberError, Result};
use crate::gateway::{derive_from_shared, FailureReason, ProbeExecutor};
use crate::registry::{ProbeDefinition, ProbeRegistry};
use crate::store::ResultStore;
use crate::telemetry::ProberMetrics;

/// Default run deadline
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(60);

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Wall-clock bound for a whole pass
    pub deadline: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_RUN_DEADLINE,
        }
    }
}

/// Run lifecycle: `Idle -> Running -> {Completed, Failed, TimedOut}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Running,
    /// Pass reached its end, possibly with per-probe failures
    Completed,
    /// Infrastructure failure, no result could be persisted
    Failed,
    /// Deadline elapsed before the pass finished
    TimedOut,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::TimedOut
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one probe during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Value obtained and written
    Persisted {
        value: String,
        observed_at: DateTime<Utc>,
    },
    /// Executor failed, nothing written
    ExecutionFailed {
        reason: FailureReason,
        message: String,
    },
    /// Value obtained but the write failed
    PersistFailed { value: String, error: String },
    /// Shared call failed, the whole group shares its fate
    Skipped {
        shared_call_key: String,
        reason: FailureReason,
        message: String,
    },
    /// Still in flight when the deadline elapsed
    Abandoned,
}

impl ProbeOutcome {
    /// Short label used for metrics and logs
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Persisted { .. } => "persisted",
            ProbeOutcome::ExecutionFailed { .. } => "execution_failed",
            ProbeOutcome::PersistFailed { .. } => "persist_failed",
            ProbeOutcome::Skipped { .. } => "skipped",
            ProbeOutcome::Abandoned => "abandoned",
        }
    }

    pub fn is_persisted(&self) -> bool {
        matches!(self, ProbeOutcome::Persisted { .. })
    }

    fn attempted_write(&self) -> bool {
        matches!(
            self,
            ProbeOutcome::Persisted { .. } | ProbeOutcome::PersistFailed { .. }
        )
    }
}

/// One orchestration pass and its per-probe outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRun {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub outcomes: BTreeMap<String, ProbeOutcome>,
    /// Run-level failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EvaluationRun {
    /// Create an idle run
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Idle,
            outcomes: BTreeMap::new(),
            error: None,
        }
    }

    fn begin(&mut self) {
        debug_assert_eq!(self.status, RunStatus::Idle);
        self.started_at = Utc::now();
        self.status = RunStatus::Running;
    }

    fn finish(&mut self, status: RunStatus, error: Option<String>) {
        debug_assert_eq!(self.status, RunStatus::Running);
        debug_assert!(status.is_terminal());
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
    }

    /// Outcome recorded for a probe
    pub fn outcome(&self, probe_id: &str) -> Option<&ProbeOutcome> {
        self.outcomes.get(probe_id)
    }

    /// Ids of probes whose value was written
    pub fn persisted(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.is_persisted())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Ids of probes that produced no stored value this run
    pub fn failed(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_persisted())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl Default for EvaluationRun {
    fn default() -> Self {
        Self::new()
    }
}

/// Probes selected for one pass
struct RunPlan<'a> {
    independent: Vec<&'a ProbeDefinition>,
    shared: BTreeMap<String, Vec<&'a ProbeDefinition>>,
}

impl RunPlan<'_> {
    fn probe_ids(&self) -> impl Iterator<Item = &str> {
        self.independent
            .iter()
            .chain(self.shared.values().flatten())
            .map(|p| p.id.as_str())
    }

    fn len(&self) -> usize {
        self.independent.len() + self.shared.values().map(Vec::len).sum::<usize>()
    }
}

type OutcomeMap = Mutex<BTreeMap<String, ProbeOutcome>>;

fn record(outcomes: &OutcomeMap, probe_id: &str, outcome: ProbeOutcome) {
    let mut map = outcomes.lock().unwrap_or_else(|e| e.into_inner());
    map.insert(probe_id.to_string(), outcome);
}

/// Counts a pass as active until dropped, including when the run future
/// is cancelled mid-pass
struct ActiveRun<'a> {
    active: &'a AtomicUsize,
    metrics: &'a ProberMetrics,
}

impl<'a> ActiveRun<'a> {
    fn enter(active: &'a AtomicUsize, metrics: &'a ProberMetrics) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        metrics.inc_active();
        Self { active, metrics }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.metrics.dec_active();
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs evaluation passes over a probe registry
pub struct Orchestrator {
    registry: Arc<ProbeRegistry>,
    executor: Arc<dyn ProbeExecutor>,
    store: Arc<dyn ResultStore>,
    settings: OrchestratorSettings,
    metrics: ProberMetrics,
    last_run: RwLock<Option<EvaluationRun>>,
    active: AtomicUsize,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("executor", &self.executor.name())
            .field("namespace", &self.store.namespace())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProbeRegistry>,
        executor: Arc<dyn ProbeExecutor>,
        store: Arc<dyn ResultStore>,
        settings: OrchestratorSettings,
        metrics: ProberMetrics,
    ) -> Self {
        Self {
            registry,
            executor,
            store,
            settings,
            metrics,
            last_run: RwLock::new(None),
            active: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ProbeRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Most recently finished run
    pub fn last_run(&self) -> Option<EvaluationRun> {
        self.last_run
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of passes currently running
    pub fn active_runs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one pass over the full registry
    pub async fn run(&self) -> EvaluationRun {
        let plan = RunPlan {
            independent: self.registry.independent(),
            shared: self.registry.shared_groups(),
        };
        self.execute(plan).await
    }

    /// Run one pass over a subset of probes.
    ///
    /// Selecting any member of a shared group issues that group's shared
    /// call once and derives only the selected members.
    pub async fn run_probes(&self, probe_ids: &[String]) -> Result<EvaluationRun> {
        let wanted: BTreeSet<&str> = probe_ids.iter().map(String::as_str).collect();
        if let Some(unknown) = wanted.iter().find(|id| !self.registry.contains(id)) {
            return Err(ProberError::UnknownProbe(unknown.to_string()));
        }

        let independent = self
            .registry
            .independent()
            .into_iter()
            .filter(|p| wanted.contains(p.id.as_str()))
            .collect();

        let shared = self
            .registry
            .shared_groups()
            .into_iter()
            .filter_map(|(key, members)| {
                let selected: Vec<_> = members
                    .into_iter()
                    .filter(|p| wanted.contains(p.id.as_str()))
                    .collect();
                (!selected.is_empty()).then_some((key, selected))
            })
            .collect();

        Ok(self.execute(RunPlan { independent, shared }).await)
    }

    async fn execute(&self, plan: RunPlan<'_>) -> EvaluationRun {
        let mut run = EvaluationRun::new();
        run.begin();
        let _active = ActiveRun::enter(&self.active, &self.metrics);
        let clock = Instant::now();

        tracing::info!(
            run_id = %run.run_id,
            probes = plan.len(),
            deadline_ms = self.settings.deadline.as_millis() as u64,
            "Starting evaluation run"
        );

        let outcomes: OutcomeMap = Mutex::new(BTreeMap::new());
        let timed_out = tokio::time::timeout(self.settings.deadline, self.pass(&plan, &outcomes))
            .await
            .is_err();

        let mut outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
        for probe_id in plan.probe_ids() {
            if !outcomes.contains_key(probe_id) {
                self.metrics.record_probe(probe_id, ProbeOutcome::Abandoned.label());
                outcomes.insert(probe_id.to_string(), ProbeOutcome::Abandoned);
            }
        }

        let attempted = outcomes.values().filter(|o| o.attempted_write()).count();
        let persisted = outcomes.values().filter(|o| o.is_persisted()).count();

        let (status, error) = if timed_out {
            (
                RunStatus::TimedOut,
                Some(format!(
                    "deadline of {}ms exceeded",
                    self.settings.deadline.as_millis()
                )),
            )
        } else if attempted > 0 && persisted == 0 {
            (
                RunStatus::Failed,
                Some("result store rejected every write".to_string()),
            )
        } else {
            (RunStatus::Completed, None)
        };

        run.outcomes = outcomes;
        run.finish(status, error);

        let elapsed = clock.elapsed();
        self.metrics.record_run(status.as_str(), elapsed.as_secs_f64());

        match status {
            RunStatus::Completed => tracing::info!(
                run_id = %run.run_id,
                persisted,
                failed = run.outcomes.len() - persisted,
                duration_ms = elapsed.as_millis() as u64,
                "Evaluation run completed"
            ),
            _ => tracing::warn!(
                run_id = %run.run_id,
                status = %status,
                persisted,
                "Evaluation run ended without completing: {}",
                run.error.as_deref().unwrap_or_default()
            ),
        }

        *self.last_run.write().unwrap_or_else(|e| e.into_inner()) = Some(run.clone());
        run
    }

    async fn pass(&self, plan: &RunPlan<'_>, outcomes: &OutcomeMap) {
        let branches = plan
            .independent
            .iter()
            .map(|probe| self.independent_branch(probe, outcomes));
        join_all(branches).await;

        for (key, members) in &plan.shared {
            self.shared_step(key, members, outcomes).await;
        }
    }

    async fn independent_branch(&self, probe: &ProbeDefinition, outcomes: &OutcomeMap) {
        let outcome = match self.executor.invoke(&probe.id).await {
            Ok(value) => self.persist(&probe.id, value).await,
            Err(e) => {
                tracing::warn!(probe = %probe.id, reason = %e.reason, "Probe execution failed: {}", e.message);
                ProbeOutcome::ExecutionFailed {
                    reason: e.reason,
                    message: e.message,
                }
            }
        };

        self.metrics.record_probe(&probe.id, outcome.label());
        record(outcomes, &probe.id, outcome);
    }

    async fn shared_step(&self, key: &str, members: &[&ProbeDefinition], outcomes: &OutcomeMap) {
        let response = match self.executor.invoke_shared(key).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    shared_call = key,
                    reason = %e.reason,
                    dependents = members.len(),
                    "Shared call failed, skipping dependent probes: {}",
                    e.message
                );
                for probe in members {
                    let outcome = ProbeOutcome::Skipped {
                        shared_call_key: key.to_string(),
                        reason: e.reason,
                        message: e.message.clone(),
                    };
                    self.metrics.record_probe(&probe.id, outcome.label());
                    record(outcomes, &probe.id, outcome);
                }
                return;
            }
        };

        for probe in members {
            let outcome = match derive_from_shared(&response, probe) {
                Ok(value) => self.persist(&probe.id, value).await,
                Err(e) => {
                    tracing::warn!(probe = %probe.id, shared_call = key, "Derivation failed: {}", e.message);
                    ProbeOutcome::ExecutionFailed {
                        reason: e.reason,
                        message: e.message,
                    }
                }
            };
            self.metrics.record_probe(&probe.id, outcome.label());
            record(outcomes, &probe.id, outcome);
        }
    }

    async fn persist(&self, probe_id: &str, value: String) -> ProbeOutcome {
        let observed_at = Utc::now();
        match self.store.put(probe_id, &value, observed_at).await {
            Ok(()) => {
                self.metrics.record_write(true);
                ProbeOutcome::Persisted { value, observed_at }
            }
            Err(e) => {
                self.metrics.record_write(false);
                tracing::error!(
                    probe = probe_id,
                    key = %self.store.key(probe_id),
                    "Failed to persist probe result: {}",
                    e
                );
                ProbeOutcome::PersistFailed {
                    value,
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Fire-and-forget run trigger
pub trait RunTrigger: Send + Sync {
    /// Start a full pass in the background
    fn trigger(&self);

    /// Start a single-probe pass in the background
    fn trigger_probe(&self, probe_id: &str);
}

impl RunTrigger for Arc<Orchestrator> {
    fn trigger(&self) {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            orchestrator.run().await;
        });
    }

    fn trigger_probe(&self, probe_id: &str) {
        let orchestrator = Arc::clone(self);
        let ids = vec![probe_id.to_string()];
        tokio::spawn(async move {
            if let Err(e) = orchestrator.run_probes(&ids).await {
                tracing::warn!("Recheck not started: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ScriptedReply, StaticExecutor};
    use crate::registry::{ProbeCategory, ACCOUNT_SUMMARY_CALL};
    use crate::store::MemoryResultStore;
    use serde_json::json;

    fn orchestrator(executor: StaticExecutor) -> (Orchestrator, Arc<MemoryResultStore>) {
        let registry = ProbeRegistry::new(vec![
            ProbeDefinition::independent("a", ProbeCategory::Security),
            ProbeDefinition::independent("b", ProbeCategory::CostManagement),
        ])
        .unwrap();
        let store = Arc::new(MemoryResultStore::default());
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::new(executor),
            store.clone(),
            OrchestratorSettings::default(),
            ProberMetrics::new().unwrap(),
        );
        (orchestrator, store)
    }

    #[test]
    fn test_run_state_machine() {
        let mut run = EvaluationRun::new();
        assert_eq!(run.status, RunStatus::Idle);
        run.begin();
        assert_eq!(run.status, RunStatus::Running);
        assert!(!run.status.is_terminal());
        run.finish(RunStatus::Completed, None);
        assert!(run.status.is_terminal());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = ProbeOutcome::ExecutionFailed {
            reason: FailureReason::Timeout,
            message: "slow".to_string(),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "execution_failed");
        assert_eq!(json["reason"], "timeout");
    }

    #[tokio::test]
    async fn test_run_persists_independent_probes() {
        let executor = StaticExecutor::new()
            .with_probe("a", ScriptedReply::Value("COMPLIANT".into()))
            .with_probe("b", ScriptedReply::Value("NON_COMPLIANT".into()));
        let (orchestrator, store) = orchestrator(executor);

        let run = orchestrator.run().await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.persisted(), vec!["a", "b"]);
        assert_eq!(store.get("b").await.unwrap().unwrap().value, "NON_COMPLIANT");
        assert_eq!(orchestrator.last_run().unwrap().run_id, run.run_id);
        assert_eq!(orchestrator.active_runs(), 0);
    }

    #[tokio::test]
    async fn test_run_probes_rejects_unknown_ids() {
        let (orchestrator, _) = orchestrator(StaticExecutor::new());
        let err = orchestrator
            .run_probes(&["nope".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ProberError::UnknownProbe(id) if id == "nope"));
    }

    #[tokio::test]
    async fn test_run_probes_selects_shared_member() {
        let executor = Arc::new(
            StaticExecutor::new().with_shared(
                ACCOUNT_SUMMARY_CALL,
                ScriptedReply::Fields(
                    [
                        ("AccountMFAEnabled".to_string(), json!(1)),
                        ("AccountAccessKeysPresent".to_string(), json!(0)),
                    ]
                    .into_iter()
                    .collect(),
                ),
            ),
        );
        let store = Arc::new(MemoryResultStore::default());
        let orchestrator = Orchestrator::new(
            Arc::new(ProbeRegistry::builtin()),
            executor.clone(),
            store.clone(),
            OrchestratorSettings::default(),
            ProberMetrics::new().unwrap(),
        );

        let run = orchestrator
            .run_probes(&["security-root-account-mfa-enabled".to_string()])
            .await
            .unwrap();

        assert_eq!(run.outcomes.len(), 1);
        assert_eq!(executor.calls(ACCOUNT_SUMMARY_CALL), 1);
        assert!(store
            .get("security-iam-root-access-key-check")
            .await
            .unwrap()
            .is_none());
    }
}
