//! Metrics collection for replication observability
//!
//! The processor reports through the [`ReplicationMetrics`] trait so tests
//! can count events in-process while deployments forward them to the
//! `metrics` facade and whatever recorder is installed there.

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::time::Instant;

mod collector;

pub use collector::{MetricsCollector, MetricsSnapshot};

/// Event counters reported by the replication core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationCounter {
    ItemsReceived,
    ItemsAccepted,
    ItemsRejected,
    ItemsMalformed,
    ConflictsDetected,
    ConflictsResolved,
    ConflictsUnresolved,
    ScriptFailures,
    StaleScriptResults,
}

impl ReplicationCounter {
    pub const ALL: [ReplicationCounter; 9] = [
        ReplicationCounter::ItemsReceived,
        ReplicationCounter::ItemsAccepted,
        ReplicationCounter::ItemsRejected,
        ReplicationCounter::ItemsMalformed,
        ReplicationCounter::ConflictsDetected,
        ReplicationCounter::ConflictsResolved,
        ReplicationCounter::ConflictsUnresolved,
        ReplicationCounter::ScriptFailures,
        ReplicationCounter::StaleScriptResults,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ReplicationCounter::ItemsReceived => "replication.items.received",
            ReplicationCounter::ItemsAccepted => "replication.items.accepted",
            ReplicationCounter::ItemsRejected => "replication.items.rejected",
            ReplicationCounter::ItemsMalformed => "replication.items.malformed",
            ReplicationCounter::ConflictsDetected => "replication.conflicts.detected",
            ReplicationCounter::ConflictsResolved => "replication.conflicts.resolved",
            ReplicationCounter::ConflictsUnresolved => "replication.conflicts.unresolved",
            ReplicationCounter::ScriptFailures => "replication.scripts.failed",
            ReplicationCounter::StaleScriptResults => "replication.scripts.stale",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            ReplicationCounter::ItemsReceived => "Items handed over by transport",
            ReplicationCounter::ItemsAccepted => "Items applied directly to storage",
            ReplicationCounter::ItemsRejected => "Stale or duplicate items dropped",
            ReplicationCounter::ItemsMalformed => "Items rejected by validation",
            ReplicationCounter::ConflictsDetected => "Items that opened or grew a conflict set",
            ReplicationCounter::ConflictsResolved => "Conflict sets collapsed by a resolution policy",
            ReplicationCounter::ConflictsUnresolved => "Resolution attempts leaving the conflict recorded",
            ReplicationCounter::ScriptFailures => "Resolution scripts that failed or timed out",
            ReplicationCounter::StaleScriptResults => "Script results discarded because the set changed",
        }
    }
}

/// Distributions reported by the replication core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationHistogram {
    /// Wall time of one resolution attempt, milliseconds
    ResolutionDurationMs,
}

impl ReplicationHistogram {
    pub fn name(&self) -> &'static str {
        match self {
            ReplicationHistogram::ResolutionDurationMs => "replication.resolution.duration_ms",
        }
    }
}

/// Sink for replication statistics
pub trait ReplicationMetrics: Send + Sync {
    fn increment(&self, counter: ReplicationCounter);
    fn observe(&self, histogram: ReplicationHistogram, value: f64);
}

/// Forwards to the global `metrics` recorder
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsFacade;

impl ReplicationMetrics for MetricsFacade {
    fn increment(&self, which: ReplicationCounter) {
        counter!(which.name()).increment(1);
    }

    fn observe(&self, which: ReplicationHistogram, value: f64) {
        histogram!(which.name()).record(value);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl ReplicationMetrics for NoopMetrics {
    fn increment(&self, _counter: ReplicationCounter) {}
    fn observe(&self, _histogram: ReplicationHistogram, _value: f64) {}
}

/// Initialize metrics with descriptions
pub fn init_metrics() {
    for which in ReplicationCounter::ALL {
        describe_counter!(which.name(), which.description());
    }
    describe_histogram!(
        ReplicationHistogram::ResolutionDurationMs.name(),
        "Conflict resolution duration in milliseconds"
    );
}

/// Timer for measuring operation duration
pub struct Timer {
    histogram: ReplicationHistogram,
    start: Instant,
}

impl Timer {
    pub fn new(histogram: ReplicationHistogram) -> Self {
        Self { histogram, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self, sink: &dyn ReplicationMetrics) {
        sink.observe(self.histogram, self.start.elapsed().as_secs_f64() * 1000.0);
    }
}
