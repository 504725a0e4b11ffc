//! Eviction scheduler
//!
//! Every probe gets its own recurring task that deletes the stored result
//! after `interval + U[0, jitter)`. Ticks are not coordinated across probes
//! and do not look at freshness: a value written just before a tick is
//! deleted too. This bounds how long a stale value can survive, not how
//! long a value is guaranteed to stay.

use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::registry::ProbeRegistry;
use crate::store::{ResultStore, StoreResult};
use crate::telemetry::ProberMetrics;

/// Nominal eviction interval
pub const DEFAULT_EVICTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Interval plus random jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub interval: Duration,
    /// Width of the jitter window added to every interval
    pub jitter: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_EVICTION_INTERVAL,
            jitter: DEFAULT_EVICTION_INTERVAL,
        }
    }
}

impl EvictionPolicy {
    pub fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    /// Delay until the next eviction tick
    pub fn next_delay(&self, rng: &mut impl Rng) -> Duration {
        let window = self.jitter.as_millis() as u64;
        if window == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(rng.gen_range(0..window))
    }

    /// Longest time a value can survive without a refresh
    pub fn max_staleness(&self) -> Duration {
        self.interval + self.jitter
    }
}

/// Deletes stored results on an independent schedule per probe
#[derive(Clone)]
pub struct EvictionScheduler {
    probe_ids: Vec<String>,
    store: Arc<dyn ResultStore>,
    policy: EvictionPolicy,
    metrics: ProberMetrics,
}

impl std::fmt::Debug for EvictionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvictionScheduler")
            .field("probe_ids", &self.probe_ids)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl EvictionScheduler {
    /// Create a scheduler covering every probe of the registry
    pub fn new(
        registry: &ProbeRegistry,
        store: Arc<dyn ResultStore>,
        policy: EvictionPolicy,
        metrics: ProberMetrics,
    ) -> Self {
        Self {
            probe_ids: registry.ids(),
            store,
            policy,
            metrics,
        }
    }

    /// Probes covered by this scheduler
    pub fn probe_ids(&self) -> BTreeSet<&str> {
        self.probe_ids.iter().map(String::as_str).collect()
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Delete one probe's result now
    pub async fn evict(&self, probe_id: &str) -> StoreResult<()> {
        let result = self.store.delete(probe_id).await;
        self.metrics.record_eviction(probe_id, result.is_ok());
        match &result {
            Ok(()) => tracing::info!(probe = probe_id, key = %self.store.key(probe_id), "Evicted probe result"),
            Err(e) => tracing::warn!(probe = probe_id, "Eviction failed: {}", e),
        }
        result
    }

    /// Spawn one eviction task per probe
    pub fn start(&self) -> EvictionHandle {
        tracing::info!(
            probes = self.probe_ids.len(),
            interval_secs = self.policy.interval.as_secs(),
            jitter_secs = self.policy.jitter.as_secs(),
            "Starting eviction scheduler"
        );

        let tasks = self
            .probe_ids
            .iter()
            .map(|probe_id| {
                let scheduler = self.clone();
                let probe_id = probe_id.clone();
                tokio::spawn(async move { scheduler.evict_forever(probe_id).await })
            })
            .collect();

        EvictionHandle { tasks }
    }

    async fn evict_forever(&self, probe_id: String) {
        loop {
            let delay = {
                let mut rng = rand::thread_rng();
                self.policy.next_delay(&mut rng)
            };
            tokio::time::sleep(delay).await;
            // failures are logged and retried on the next tick
            let _ = self.evict(&probe_id).await;
        }
    }
}

/// Running eviction tasks
#[derive(Debug)]
pub struct EvictionHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl EvictionHandle {
    /// Number of scheduled probes
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stop every eviction task
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_zero_jitter_is_exact() {
        let policy = EvictionPolicy::new(Duration::from_secs(10), Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(policy.next_delay(&mut rng), Duration::from_secs(10));
    }

    #[test]
    fn test_default_policy() {
        let policy = EvictionPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(86_400));
        assert_eq!(policy.max_staleness(), Duration::from_secs(172_800));
    }

    #[test]
    fn test_jitter_spreads_ticks() {
        let policy = EvictionPolicy::default();
        let mut rng = StdRng::seed_from_u64(42);
        let delays: BTreeSet<Duration> = (0..16).map(|_| policy.next_delay(&mut rng)).collect();
        assert!(delays.len() > 1);
    }

    proptest! {
        #[test]
        fn prop_delay_within_window(interval in 1u64..100_000, jitter in 0u64..100_000, seed: u64) {
            let policy = EvictionPolicy::new(Duration::from_millis(interval), Duration::from_millis(jitter));
            let mut rng = StdRng::seed_from_u64(seed);
            let delay = policy.next_delay(&mut rng);
            prop_assert!(delay >= policy.interval);
            prop_assert!(delay <= policy.max_staleness());
        }
    }
}
