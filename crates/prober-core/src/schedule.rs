//! Recurring run schedule

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::orchestrator::Orchestrator;

/// Run one full pass every `every`, starting immediately.
///
/// Passes do not overlap within one schedule; a pass that outlasts the
/// interval delays the next tick. Abort the handle to stop.
pub fn spawn_run_schedule(orchestrator: Arc<Orchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::debug!("Scheduled evaluation run");
            orchestrator.run().await;
        }
    })
}
