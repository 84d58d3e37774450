//! Coordination counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use replicant_common::{PromotionDecision, Role};

/// Counters for coordination runs, directory mutations and promotions.
#[derive(Default)]
pub struct CoordinationMetrics {
    pub runs_started: AtomicU64,
    pub runs_started_primary: AtomicU64,
    pub runs_started_replica: AtomicU64,
    pub runs_failed: AtomicU64,
    pub claims_succeeded: AtomicU64,
    pub claims_rejected: AtomicU64,
    pub releases: AtomicU64,
    pub release_failures: AtomicU64,
    pub promotions_promoted: AtomicU64,
    pub promotions_forced: AtomicU64,
    pub promotions_refused: AtomicU64,
}

impl CoordinationMetrics {
    /// Create zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a run entering resolution.
    pub fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a run reaching `Started(role)`.
    pub fn run_succeeded(&self, role: Role) {
        match role {
            Role::Primary => self.runs_started_primary.fetch_add(1, Ordering::Relaxed),
            Role::Replica => self.runs_started_replica.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a run reaching `Failed`.
    pub fn run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a claim outcome.
    pub fn claim(&self, succeeded: bool) {
        if succeeded {
            self.claims_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claims_rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a cleanup release outcome.
    pub fn release(&self, succeeded: bool) {
        if succeeded {
            self.releases.fetch_add(1, Ordering::Relaxed);
        } else {
            self.release_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a promotion decision.
    pub fn promotion(&self, decision: PromotionDecision) {
        let counter = match decision {
            PromotionDecision::Promoted => &self.promotions_promoted,
            PromotionDecision::ForcedOverActivePrimary => &self.promotions_forced,
            PromotionDecision::RefusedActivePrimary | PromotionDecision::RefusedUnreachable => {
                &self.promotions_refused
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_started_primary: self.runs_started_primary.load(Ordering::Relaxed),
            runs_started_replica: self.runs_started_replica.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            claims_succeeded: self.claims_succeeded.load(Ordering::Relaxed),
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            promotions_promoted: self.promotions_promoted.load(Ordering::Relaxed),
            promotions_forced: self.promotions_forced.load(Ordering::Relaxed),
            promotions_refused: self.promotions_refused.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let series = [
            ("runs_started", "Coordination runs begun", snapshot.runs_started),
            ("runs_started_primary", "Runs started as primary", snapshot.runs_started_primary),
            ("runs_started_replica", "Runs started as replica", snapshot.runs_started_replica),
            ("runs_failed", "Runs ending failed", snapshot.runs_failed),
            ("claims_succeeded", "Primary name claims bound", snapshot.claims_succeeded),
            ("claims_rejected", "Primary name claims rejected", snapshot.claims_rejected),
            ("releases", "Primary name bindings removed after failure", snapshot.releases),
            ("release_failures", "Cleanup releases that errored", snapshot.release_failures),
            ("promotions_promoted", "Promotions without an active incumbent", snapshot.promotions_promoted),
            ("promotions_forced", "Promotions forced over an active primary", snapshot.promotions_forced),
            ("promotions_refused", "Promotions refused", snapshot.promotions_refused),
        ];

        let mut output = String::new();
        for (name, help, value) in series {
            output.push_str(&format!(
                "# HELP replicant_{name}_total {help}\n# TYPE replicant_{name}_total counter\nreplicant_{name}_total {value}\n\n"
            ));
        }
        output
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub runs_started: u64,
    pub runs_started_primary: u64,
    pub runs_started_replica: u64,
    pub runs_failed: u64,
    pub claims_succeeded: u64,
    pub claims_rejected: u64,
    pub releases: u64,
    pub release_failures: u64,
    pub promotions_promoted: u64,
    pub promotions_forced: u64,
    pub promotions_refused: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<CoordinationMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_increment() {
        let metrics = CoordinationMetrics::new();

        metrics.run_started();
        metrics.run_started();
        metrics.run_succeeded(Role::Replica);
        metrics.run_failed();
        metrics.claim(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_started, 2);
        assert_eq!(snapshot.runs_started_replica, 1);
        assert_eq!(snapshot.runs_failed, 1);
        assert_eq!(snapshot.claims_rejected, 1);
        assert_eq!(snapshot.claims_succeeded, 0);
    }

    #[test]
    fn test_promotion_buckets() {
        let metrics = CoordinationMetrics::new();
        metrics.promotion(PromotionDecision::RefusedActivePrimary);
        metrics.promotion(PromotionDecision::RefusedUnreachable);
        metrics.promotion(PromotionDecision::ForcedOverActivePrimary);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.promotions_refused, 2);
        assert_eq!(snapshot.promotions_forced, 1);
        assert_eq!(snapshot.promotions_promoted, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = CoordinationMetrics::new();
        metrics.run_started();

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE replicant_runs_started_total counter"));
        assert!(output.contains("replicant_runs_started_total 1"));
        assert!(output.contains("replicant_promotions_refused_total 0"));
    }
}
