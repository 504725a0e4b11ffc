//! Prometheus metrics for the prober
//!
//! - `prober_runs_total` (counter) - Finished runs by status
//! - `prober_run_duration_seconds` (histogram) - Run duration distribution
//! - `prober_probe_executions_total` (counter) - Probe outcomes by probe and result
//! - `prober_store_writes_total` (counter) - Result writes by result
//! - `prober_evictions_total` (counter) - Evictions by probe and result
//! - `prober_dashboard_renders_total` (counter) - Dashboard renders
//! - `prober_dashboard_triggers_total` (counter) - Runs triggered by the dashboard
//! - `prober_active_runs` (gauge) - Runs in progress

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry,
};
use std::sync::Arc;

use crate::error::{ProberError, Result};

/// Metrics shared by the orchestrator, the eviction scheduler and the dashboard
#[derive(Clone)]
pub struct ProberMetrics {
    registry: Arc<Registry>,
    runs_total: CounterVec,
    run_duration_seconds: Histogram,
    probe_executions_total: CounterVec,
    store_writes_total: CounterVec,
    evictions_total: CounterVec,
    dashboard_renders_total: Counter,
    dashboard_triggers_total: Counter,
    active_runs: Gauge,
}

impl std::fmt::Debug for ProberMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProberMetrics").finish_non_exhaustive()
    }
}

impl ProberMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create metrics and register them with the provided registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let runs_total = CounterVec::new(
            Opts::new("runs_total", "Finished evaluation runs by status").namespace("prober"),
            &["status"],
        )?;

        let run_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("run_duration_seconds", "Evaluation run duration in seconds")
                .namespace("prober")
                .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;

        let probe_executions_total = CounterVec::new(
            Opts::new("probe_executions_total", "Probe outcomes by probe and result")
                .namespace("prober"),
            &["probe", "result"],
        )?;

        let store_writes_total = CounterVec::new(
            Opts::new("store_writes_total", "Result store writes by result").namespace("prober"),
            &["result"],
        )?;

        let evictions_total = CounterVec::new(
            Opts::new("evictions_total", "Scheduled evictions by probe and result")
                .namespace("prober"),
            &["probe", "result"],
        )?;

        let dashboard_renders_total = Counter::new(
            "prober_dashboard_renders_total",
            "Total number of dashboard renders",
        )?;

        let dashboard_triggers_total = Counter::new(
            "prober_dashboard_triggers_total",
            "Total number of runs triggered by dashboard renders",
        )?;

        let active_runs = Gauge::new("prober_active_runs", "Evaluation runs in progress")?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(run_duration_seconds.clone()))?;
        registry.register(Box::new(probe_executions_total.clone()))?;
        registry.register(Box::new(store_writes_total.clone()))?;
        registry.register(Box::new(evictions_total.clone()))?;
        registry.register(Box::new(dashboard_renders_total.clone()))?;
        registry.register(Box::new(dashboard_triggers_total.clone()))?;
        registry.register(Box::new(active_runs.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            run_duration_seconds,
            probe_executions_total,
            store_writes_total,
            evictions_total,
            dashboard_renders_total,
            dashboard_triggers_total,
            active_runs,
        })
    }

    /// Record a finished run
    pub fn record_run(&self, status: &str, duration_secs: f64) {
        self.runs_total.with_label_values(&[status]).inc();
        self.run_duration_seconds.observe(duration_secs);
    }

    /// Record a probe outcome
    pub fn record_probe(&self, probe: &str, result: &str) {
        self.probe_executions_total
            .with_label_values(&[probe, result])
            .inc();
    }

    /// Record a store write
    pub fn record_write(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.store_writes_total.with_label_values(&[result]).inc();
    }

    /// Record an eviction
    pub fn record_eviction(&self, probe: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.evictions_total.with_label_values(&[probe, result]).inc();
    }

    pub fn record_render(&self) {
        self.dashboard_renders_total.inc();
    }

    pub fn record_trigger(&self) {
        self.dashboard_triggers_total.inc();
    }

    pub fn inc_active(&self) {
        self.active_runs.inc();
    }

    pub fn dec_active(&self) {
        self.active_runs.dec();
    }

    /// Current count of a probe outcome
    pub fn probe_count(&self, probe: &str, result: &str) -> f64 {
        self.probe_executions_total
            .with_label_values(&[probe, result])
            .get()
    }

    /// Current count of runs with a status
    pub fn run_count(&self, status: &str) -> f64 {
        self.runs_total.with_label_values(&[status]).get()
    }

    pub fn trigger_count(&self) -> f64 {
        self.dashboard_triggers_total.get()
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Encode metrics as text for scraping
    pub fn encode_text(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| ProberError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}
