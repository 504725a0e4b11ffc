//! Engine assembly

use prober_core::{
    spawn_run_schedule, DashboardGateway, EvictionHandle, EvictionScheduler, HttpProbeExecutor,
    Orchestrator, ProbeExecutor, ProbeRegistry, ProberConfig, ProberError, ProberMetrics,
    ResultStore, Result, RunTrigger,
};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Fully wired engine: one registry, one store, shared by every component
#[derive(Clone)]
pub struct ProberApp {
    pub config: ProberConfig,
    pub registry: Arc<ProbeRegistry>,
    pub store: Arc<dyn ResultStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub dashboard: DashboardGateway,
    pub eviction: EvictionScheduler,
    pub metrics: ProberMetrics,
}

impl std::fmt::Debug for ProberApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProberApp")
            .field("namespace", &self.config.namespace)
            .field("probes", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ProberApp {
    /// Build from configuration with the HTTP executor and the configured store
    pub fn from_config(config: ProberConfig) -> Result<Self> {
        config.validate()?;
        let executor = HttpProbeExecutor::new(config.executor.clone())
            .map_err(|e| ProberError::config(format!("executor: {}", e)))?;
        let store = config.open_store()?;
        Self::assemble(config, Arc::new(executor), store)
    }

    /// Build around a given executor and store
    pub fn assemble(
        config: ProberConfig,
        executor: Arc<dyn ProbeExecutor>,
        store: Arc<dyn ResultStore>,
    ) -> Result<Self> {
        let registry = Arc::new(config.registry()?);
        let metrics = ProberMetrics::new()?;

        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            executor,
            store.clone(),
            config.orchestrator_settings(),
            metrics.clone(),
        ));
        let dashboard = DashboardGateway::new(
            registry.clone(),
            store.clone(),
            Arc::new(orchestrator.clone()),
            metrics.clone(),
        );
        let eviction = EvictionScheduler::new(
            &registry,
            store.clone(),
            config.eviction_policy(),
            metrics.clone(),
        );

        tracing::debug!(
            probes = registry.len(),
            namespace = %config.namespace,
            "Prober assembled"
        );

        Ok(Self {
            config,
            registry,
            store,
            orchestrator,
            dashboard,
            eviction,
            metrics,
        })
    }

    /// Dashboard over the same store whose misses start no run
    pub fn read_only_dashboard(&self) -> DashboardGateway {
        DashboardGateway::new(
            self.registry.clone(),
            self.store.clone(),
            Arc::new(NoRunTrigger),
            self.metrics.clone(),
        )
    }

    /// Start the run schedule and the eviction tasks
    pub fn start_background(&self) -> BackgroundTasks {
        BackgroundTasks {
            eviction: self.eviction.start(),
            schedule: spawn_run_schedule(self.orchestrator.clone(), self.config.schedule_interval()),
        }
    }
}

/// Trigger for one-shot processes that exit before a spawned run could finish
struct NoRunTrigger;

impl RunTrigger for NoRunTrigger {
    fn trigger(&self) {
        tracing::debug!("Run not started, dashboard is read-only");
    }

    fn trigger_probe(&self, probe_id: &str) {
        tracing::debug!(probe = %probe_id, "Recheck not started, dashboard is read-only");
    }
}

/// Handles of the recurring background work
#[derive(Debug)]
pub struct BackgroundTasks {
    eviction: EvictionHandle,
    schedule: JoinHandle<()>,
}

impl BackgroundTasks {
    pub fn shutdown(self) {
        self.schedule.abort();
        self.eviction.shutdown();
        tracing::info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prober_core::{MemoryResultStore, ScriptedReply, StaticExecutor};
    use std::time::Duration;

    fn app(executor: Arc<StaticExecutor>, store: Arc<MemoryResultStore>) -> ProberApp {
        ProberApp::assemble(ProberConfig::default(), executor, store).unwrap()
    }

    #[tokio::test]
    async fn test_read_only_dashboard_starts_no_run() {
        let executor = Arc::new(StaticExecutor::new());
        for probe in ProbeRegistry::builtin().independent() {
            executor.set_probe(probe.id.clone(), ScriptedReply::Value("COMPLIANT".into()));
        }
        let store = Arc::new(MemoryResultStore::default());
        let app = app(executor.clone(), store.clone());

        let view = app.read_only_dashboard().render().await;
        assert_eq!(view.pending, app.registry.len());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(executor.calls("billing-budget-created"), 0);
        assert!(store.is_empty());
        assert!(app.orchestrator.last_run().is_none());
    }

    #[tokio::test]
    async fn test_read_only_dashboard_reads_stored_values() {
        let executor = Arc::new(StaticExecutor::new());
        let store = Arc::new(MemoryResultStore::default());
        store
            .put("billing-budget-created", "COMPLIANT", chrono::Utc::now())
            .await
            .unwrap();
        let app = app(executor, store);

        let view = app.read_only_dashboard().render().await;
        assert_eq!(
            view.probe("billing-budget-created").unwrap().state.value(),
            Some("COMPLIANT")
        );
        assert_eq!(view.pending, app.registry.len() - 1);
    }
}
