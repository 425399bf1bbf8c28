//! Weaving counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// How a transform request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Bytes were rewritten
    Woven,
    /// Bytes returned unchanged
    PassedThrough,
    /// Weaving failed; bytes returned unchanged
    Failed,
}

/// Lock-free counters updated by the pipeline
#[derive(Debug, Default)]
pub struct WeavingStats {
    seen: AtomicU64,
    woven: AtomicU64,
    passed_through: AtomicU64,
    failed: AtomicU64,
    methods_woven: AtomicU64,
    mixins_applied: AtomicU64,
    weave_nanos: AtomicU64,
}

impl WeavingStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, outcome: Outcome, elapsed: Duration) {
        self.seen.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            Outcome::Woven => &self.woven,
            Outcome::PassedThrough => &self.passed_through,
            Outcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.weave_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_changes(&self, methods: usize, mixins: usize) {
        self.methods_woven.fetch_add(methods as u64, Ordering::Relaxed);
        self.mixins_applied.fetch_add(mixins as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            classes_seen: self.seen.load(Ordering::Relaxed),
            classes_woven: self.woven.load(Ordering::Relaxed),
            classes_passed_through: self.passed_through.load(Ordering::Relaxed),
            classes_failed: self.failed.load(Ordering::Relaxed),
            methods_woven: self.methods_woven.load(Ordering::Relaxed),
            mixins_applied: self.mixins_applied.load(Ordering::Relaxed),
            weave_time_us: self.weave_nanos.load(Ordering::Relaxed) / 1_000,
        }
    }
}

/// Serializable view of [`WeavingStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Transform requests that reached the weaver
    pub classes_seen: u64,
    /// Classes rewritten
    pub classes_woven: u64,
    /// Classes returned unchanged
    pub classes_passed_through: u64,
    /// Classes that failed to weave
    pub classes_failed: u64,
    /// Methods wrapped
    pub methods_woven: u64,
    /// Mixins attached
    pub mixins_applied: u64,
    /// Time spent weaving, in microseconds
    pub weave_time_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record() {
        let stats = WeavingStats::new();
        stats.record(Outcome::Woven, Duration::from_micros(40));
        stats.record(Outcome::PassedThrough, Duration::from_micros(2));
        stats.record(Outcome::Failed, Duration::from_micros(8));
        stats.record_changes(3, 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.classes_seen, 3);
        assert_eq!(snapshot.classes_woven, 1);
        assert_eq!(snapshot.classes_passed_through, 1);
        assert_eq!(snapshot.classes_failed, 1);
        assert_eq!(snapshot.methods_woven, 3);
        assert_eq!(snapshot.mixins_applied, 1);
        assert_eq!(snapshot.weave_time_us, 50);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(WeavingStats::new().snapshot()).unwrap();
        assert_eq!(json["classes_woven"], 0);
    }
}
