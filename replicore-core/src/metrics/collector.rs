//! In-process metrics collector

use super::{ReplicationCounter, ReplicationHistogram, ReplicationMetrics};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Point-in-time copy of the collector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub items_received: u64,
    pub items_accepted: u64,
    pub items_rejected: u64,
    pub items_malformed: u64,
    pub conflicts_detected: u64,
    pub conflicts_resolved: u64,
    pub conflicts_unresolved: u64,
    pub script_failures: u64,
    pub stale_script_results: u64,
    pub resolutions_timed: u64,
    pub resolution_ms_total: f64,
}

/// Metrics collector for aggregating replication events
#[derive(Debug, Default)]
pub struct MetricsCollector {
    counters: [AtomicU64; ReplicationCounter::ALL.len()],
    resolution_ms: Mutex<(u64, f64)>,
}

fn slot(counter: ReplicationCounter) -> usize {
    counter as usize
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, counter: ReplicationCounter) -> u64 {
        self.counters[slot(counter)].load(Ordering::Relaxed)
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (resolutions_timed, resolution_ms_total) = match self.resolution_ms.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        MetricsSnapshot {
            items_received: self.get(ReplicationCounter::ItemsReceived),
            items_accepted: self.get(ReplicationCounter::ItemsAccepted),
            items_rejected: self.get(ReplicationCounter::ItemsRejected),
            items_malformed: self.get(ReplicationCounter::ItemsMalformed),
            conflicts_detected: self.get(ReplicationCounter::ConflictsDetected),
            conflicts_resolved: self.get(ReplicationCounter::ConflictsResolved),
            conflicts_unresolved: self.get(ReplicationCounter::ConflictsUnresolved),
            script_failures: self.get(ReplicationCounter::ScriptFailures),
            stale_script_results: self.get(ReplicationCounter::StaleScriptResults),
            resolutions_timed,
            resolution_ms_total,
        }
    }
}

impl ReplicationMetrics for MetricsCollector {
    fn increment(&self, counter: ReplicationCounter) {
        self.counters[slot(counter)].fetch_add(1, Ordering::Relaxed);
    }

    fn observe(&self, histogram: ReplicationHistogram, value: f64) {
        match histogram {
            ReplicationHistogram::ResolutionDurationMs => {
                let mut guard = match self.resolution_ms.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.0 += 1;
                guard.1 += value;
            }
        }
    }
}
