//! Account Prober core engine
//!
//! Evaluates a fixed catalog of account health probes, keeps the latest
//! value of each probe in a namespaced result store and lets those values
//! age out on a jittered schedule.
//!
//! # Components
//! - `registry`: probe catalog and executor kinds
//! - `gateway`: executor trait, HTTP executor and shared-call derivation
//! - `store`: result store trait with in-memory and sled backends
//! - `orchestrator`: deadline-bounded fan-out/fan-in evaluation runs
//! - `eviction`: per-probe eviction tasks
//! - `dashboard`: read path that triggers a run when values are missing
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prober_core::{
//!     HttpExecutorConfig, HttpProbeExecutor, MemoryResultStore, Orchestrator,
//!     OrchestratorSettings, ProbeRegistry, ProberMetrics,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(
//!     Arc::new(ProbeRegistry::builtin()),
//!     Arc::new(HttpProbeExecutor::new(HttpExecutorConfig::default())?),
//!     Arc::new(MemoryResultStore::new("prober")),
//!     OrchestratorSettings::default(),
//!     ProberMetrics::new()?,
//! );
//! let run = orchestrator.run().await;
//! println!("{} probes persisted", run.persisted().len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dashboard;
pub mod error;
pub mod eviction;
pub mod gateway;
pub mod orchestrator;
pub mod registry;
pub mod schedule;
pub mod store;
pub mod telemetry;

pub use config::{ProberConfig, StoreConfig};
pub use dashboard::{render_html, ComplianceStatus, DashboardGateway, DashboardView, ProbeState, ProbeView};
pub use error::{ProberError, Result};
pub use eviction::{EvictionHandle, EvictionPolicy, EvictionScheduler};
pub use gateway::{
    ExecutionError, FailureReason, HttpExecutorConfig, HttpProbeExecutor, ProbeExecutor,
    ScriptedReply, SharedResponse, StaticExecutor,
};
pub use orchestrator::{
    EvaluationRun, Orchestrator, OrchestratorSettings, ProbeOutcome, RunStatus, RunTrigger,
};
pub use registry::{ExecutorKind, ProbeCategory, ProbeDefinition, ProbeRegistry};
pub use schedule::spawn_run_schedule;
pub use store::{MemoryResultStore, ProbeResult, ResultKey, ResultStore, SledResultStore, StoreError};
pub use telemetry::ProberMetrics;
