//! Result lifecycle: eviction, dashboard reads and on-demand refresh

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prober_core::store::StoreResult;
use prober_core::{
    DashboardGateway, EvictionPolicy, EvictionScheduler, MemoryResultStore, Orchestrator,
    OrchestratorSettings, ProbeCategory, ProbeDefinition, ProbeRegistry, ProbeResult, ProbeState,
    ProberError, ProberMetrics, ResultStore, RunTrigger, ScriptedReply, StaticExecutor, StoreError,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn two_probes() -> ProbeRegistry {
    ProbeRegistry::new(vec![
        ProbeDefinition::independent("billing-budget-created", ProbeCategory::CostManagement)
            .with_text("AWS Budget created", "Create a budget", "https://docs.example/budget"),
        ProbeDefinition::independent("security-account-has-no-iam-users", ProbeCategory::Security),
    ])
    .unwrap()
}

struct Stack {
    registry: Arc<ProbeRegistry>,
    executor: Arc<StaticExecutor>,
    store: Arc<MemoryResultStore>,
    orchestrator: Arc<Orchestrator>,
    metrics: ProberMetrics,
}

fn stack() -> Stack {
    let registry = Arc::new(two_probes());
    let executor = Arc::new(
        StaticExecutor::new()
            .with_probe("billing-budget-created", ScriptedReply::Value("COMPLIANT".into()))
            .with_probe(
                "security-account-has-no-iam-users",
                ScriptedReply::Value("NON_COMPLIANT".into()),
            ),
    );
    let store = Arc::new(MemoryResultStore::default());
    let metrics = ProberMetrics::new().unwrap();
    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        executor.clone(),
        store.clone(),
        OrchestratorSettings::default(),
        metrics.clone(),
    ));
    Stack {
        registry,
        executor,
        store,
        orchestrator,
        metrics,
    }
}

fn dashboard(stack: &Stack) -> DashboardGateway {
    DashboardGateway::new(
        stack.registry.clone(),
        stack.store.clone(),
        Arc::new(stack.orchestrator.clone()),
        stack.metrics.clone(),
    )
}

/// Poll until the store holds a value for `probe_id`
async fn wait_for_value(store: &MemoryResultStore, probe_id: &str) -> ProbeResult {
    for _ in 0..200 {
        if let Some(result) = store.get(probe_id).await.unwrap() {
            return result;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no value stored for {}", probe_id);
}

/// Trigger that only counts calls
#[derive(Default)]
struct CountingTrigger {
    runs: AtomicUsize,
    probes: AtomicUsize,
}

impl RunTrigger for CountingTrigger {
    fn trigger(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    fn trigger_probe(&self, _probe_id: &str) {
        self.probes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Store whose reads always fail
struct UnreadableStore;

#[async_trait]
impl ResultStore for UnreadableStore {
    fn namespace(&self) -> &str {
        "prober"
    }

    async fn put(&self, _: &str, _: &str, _: DateTime<Utc>) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, _: &str) -> StoreResult<Option<ProbeResult>> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _: &str) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_eviction_is_idempotent() {
    let stack = stack();
    let scheduler = EvictionScheduler::new(
        &stack.registry,
        stack.store.clone(),
        EvictionPolicy::default(),
        stack.metrics.clone(),
    );

    stack.store.put("billing-budget-created", "COMPLIANT", Utc::now()).await.unwrap();
    assert_ok!(scheduler.evict("billing-budget-created").await);
    assert_ok!(scheduler.evict("billing-budget-created").await);
    assert_ok!(scheduler.evict("security-account-has-no-iam-users").await);

    assert!(stack.store.is_empty());
}

#[tokio::test]
async fn test_scheduler_covers_registry() {
    let stack = stack();
    let scheduler = EvictionScheduler::new(
        &stack.registry,
        stack.store.clone(),
        EvictionPolicy::default(),
        stack.metrics.clone(),
    );

    let registry_ids: Vec<String> = stack.registry.ids();
    let expected: BTreeSet<&str> = registry_ids.iter().map(String::as_str).collect();
    assert_eq!(scheduler.probe_ids(), expected);

    let handle = scheduler.start();
    assert_eq!(handle.len(), stack.registry.len());
    handle.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_eviction_removes_values() {
    let stack = stack();
    let policy = EvictionPolicy::new(Duration::from_secs(10), Duration::ZERO);
    let scheduler = EvictionScheduler::new(
        &stack.registry,
        stack.store.clone(),
        policy,
        stack.metrics.clone(),
    );

    stack.orchestrator.run().await;
    assert_eq!(stack.store.len(), 2);

    let handle = scheduler.start();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(stack.store.len(), 2);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(stack.store.is_empty());

    // fresh values are evicted again on the next tick
    stack.orchestrator.run().await;
    assert_eq!(stack.store.len(), 2);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(stack.store.is_empty());

    handle.shutdown();
}

#[tokio::test]
async fn test_render_with_values_does_not_trigger() {
    let stack = stack();
    stack.orchestrator.run().await;

    let trigger = Arc::new(CountingTrigger::default());
    let gateway = DashboardGateway::new(
        stack.registry.clone(),
        stack.store.clone(),
        trigger.clone(),
        stack.metrics.clone(),
    );

    let view = gateway.render().await;
    assert_eq!(view.pending, 0);
    assert!(!view.run_triggered);
    assert_eq!(trigger.runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        view.probe("security-account-has-no-iam-users").unwrap().state.value(),
        Some("NON_COMPLIANT")
    );
}

#[tokio::test]
async fn test_render_triggers_once_for_many_missing() {
    let stack = stack();
    let trigger = Arc::new(CountingTrigger::default());
    let gateway = DashboardGateway::new(
        stack.registry.clone(),
        stack.store.clone(),
        trigger.clone(),
        stack.metrics.clone(),
    );

    let view = gateway.render().await;

    assert_eq!(view.pending, 2);
    assert!(view.run_triggered);
    assert!(view.probes.iter().all(|p| p.state.is_unknown()));
    assert_eq!(trigger.runs.load(Ordering::SeqCst), 1);
    assert_eq!(stack.metrics.trigger_count(), 1.0);
}

#[tokio::test]
async fn test_evict_render_refresh_cycle() {
    let stack = stack();
    let gateway = dashboard(&stack);
    let scheduler = EvictionScheduler::new(
        &stack.registry,
        stack.store.clone(),
        EvictionPolicy::default(),
        stack.metrics.clone(),
    );

    stack.orchestrator.run().await;
    let before = stack.store.get("billing-budget-created").await.unwrap().unwrap();

    scheduler.evict("billing-budget-created").await.unwrap();

    let view = gateway.render().await;
    let row = view.probe("billing-budget-created").unwrap();
    assert_eq!(row.state, ProbeState::Unknown);
    assert_eq!(row.title, "AWS Budget created");
    assert!(!view.probe("security-account-has-no-iam-users").unwrap().state.is_unknown());
    assert!(view.run_triggered);

    let after = wait_for_value(&stack.store, "billing-budget-created").await;
    assert!(after.observed_at >= before.observed_at);

    let view = gateway.render().await;
    assert_eq!(view.pending, 0);
}

#[tokio::test]
async fn test_render_does_not_wait_for_triggered_run() {
    let stack = stack();
    stack.executor.set_probe("billing-budget-created", ScriptedReply::Hang);
    let gateway = dashboard(&stack);

    let view = tokio::time::timeout(Duration::from_secs(1), gateway.render())
        .await
        .expect("render returned");

    assert!(view.run_triggered);
    assert!(view.probe("billing-budget-created").unwrap().state.is_unknown());
}

#[tokio::test]
async fn test_render_treats_read_errors_as_unknown() {
    let stack = stack();
    let trigger = Arc::new(CountingTrigger::default());
    let gateway = DashboardGateway::new(
        stack.registry.clone(),
        Arc::new(UnreadableStore),
        trigger.clone(),
        stack.metrics.clone(),
    );

    let view = gateway.render().await;
    assert_eq!(view.pending, 2);
    assert_eq!(trigger.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recheck_refreshes_only_that_probe() {
    let stack = stack();
    let gateway = dashboard(&stack);

    gateway.recheck("billing-budget-created").unwrap();
    wait_for_value(&stack.store, "billing-budget-created").await;

    assert_eq!(stack.executor.calls("billing-budget-created"), 1);
    assert_eq!(stack.executor.calls("security-account-has-no-iam-users"), 0);
}

#[tokio::test]
async fn test_recheck_unknown_probe() {
    let stack = stack();
    let gateway = dashboard(&stack);

    let err = gateway.recheck("not-a-probe").unwrap_err();
    assert!(matches!(err, ProberError::UnknownProbe(id) if id == "not-a-probe"));
}
