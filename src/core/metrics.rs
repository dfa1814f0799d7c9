//! In-process counters for operator status output (`spec.md` §4.4
//! "Metrics"). Not a `metrics`/Prometheus integration — just the plain
//! atomic counters the teacher's actor runtime keeps on `ActorRegistry`
//! for its own status reporting, extended with a per-adapter error map.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// Snapshot of [`Metrics`] at a point in time, suitable for serializing
/// into a status endpoint or CLI report.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub publishes: u64,
    pub dispatches: u64,
    pub deliveries_ok: u64,
    pub deliveries_failed: u64,
    pub dlq_moves: u64,
    pub adapter_errors: Vec<(String, u64)>,
}

/// Process-lifetime counters for RelayCore activity.
///
/// Every field is an independent [`AtomicU64`] rather than a struct behind
/// a mutex: counters are only ever incremented, never read-modify-written
/// as a group, so relaxed ordering is sufficient and cheap under
/// concurrent dispatch.
#[derive(Debug, Default)]
pub struct Metrics {
    publishes: AtomicU64,
    dispatches: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_failed: AtomicU64,
    dlq_moves: AtomicU64,
    adapter_errors: DashMap<String, AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_publish(&self) {
        self.publishes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_ok(&self) {
        self.deliveries_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivery_failed(&self, adapter_id: &str) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
        self.adapter_errors
            .entry(adapter_id.to_string())
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dlq_move(&self) {
        self.dlq_moves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            publishes: self.publishes.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            deliveries_ok: self.deliveries_ok.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            dlq_moves: self.dlq_moves.load(Ordering::Relaxed),
            adapter_errors: self
                .adapter_errors
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_publish();
        metrics.record_publish();
        metrics.record_dispatch();
        metrics.record_delivery_failed("telegram-main");
        metrics.record_delivery_failed("telegram-main");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.publishes, 2);
        assert_eq!(snapshot.dispatches, 1);
        assert_eq!(snapshot.deliveries_failed, 2);
        assert_eq!(snapshot.adapter_errors, vec![("telegram-main".to_string(), 2)]);
    }
}
