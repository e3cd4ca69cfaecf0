//! Metrics collection for controller monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::result::TransitionResult;

/// Controller metrics.
pub struct Metrics {
    /// Total set-node-state requests evaluated.
    pub requests_total: AtomicU64,
    /// Requests that were allowed to set a new wanted state.
    pub requests_allowed: AtomicU64,
    /// Requests whose wanted state was already in effect.
    pub requests_already_set: AtomicU64,
    /// Requests refused by the safety checks.
    pub requests_disallowed: AtomicU64,
    /// Requests carrying the force condition.
    pub requests_forced: AtomicU64,
    /// Requests evaluated without applying.
    pub requests_probed: AtomicU64,
    /// Wanted states written to the registry.
    pub wanted_states_applied: AtomicU64,
    /// Version of the latest published cluster state.
    pub cluster_state_version: AtomicU64,
}

impl Metrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_allowed: AtomicU64::new(0),
            requests_already_set: AtomicU64::new(0),
            requests_disallowed: AtomicU64::new(0),
            requests_forced: AtomicU64::new(0),
            requests_probed: AtomicU64::new(0),
            wanted_states_applied: AtomicU64::new(0),
            cluster_state_version: AtomicU64::new(0),
        }
    }

    /// Record the verdict for one request.
    pub fn request_evaluated(&self, result: &TransitionResult) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let counter = match result {
            TransitionResult::MustSetWantedState => &self.requests_allowed,
            TransitionResult::AlreadySet => &self.requests_already_set,
            TransitionResult::Disallowed(_) => &self.requests_disallowed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_forced(&self) {
        self.requests_forced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_probed(&self) {
        self.requests_probed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wanted_state_applied(&self) {
        self.wanted_states_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_cluster_state_version(&self, version: u32) {
        self.cluster_state_version
            .store(u64::from(version), Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_allowed: self.requests_allowed.load(Ordering::Relaxed),
            requests_already_set: self.requests_already_set.load(Ordering::Relaxed),
            requests_disallowed: self.requests_disallowed.load(Ordering::Relaxed),
            requests_forced: self.requests_forced.load(Ordering::Relaxed),
            requests_probed: self.requests_probed.load(Ordering::Relaxed),
            wanted_states_applied: self.wanted_states_applied.load(Ordering::Relaxed),
            cluster_state_version: self.cluster_state_version.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        format!(
            r#"# HELP fleetgate_requests_total Total set-node-state requests evaluated
# TYPE fleetgate_requests_total counter
fleetgate_requests_total {}

# HELP fleetgate_requests_allowed Requests allowed to set a new wanted state
# TYPE fleetgate_requests_allowed counter
fleetgate_requests_allowed {}

# HELP fleetgate_requests_already_set Requests whose wanted state was already in effect
# TYPE fleetgate_requests_already_set counter
fleetgate_requests_already_set {}

# HELP fleetgate_requests_disallowed Requests refused by safety checks
# TYPE fleetgate_requests_disallowed counter
fleetgate_requests_disallowed {}

# HELP fleetgate_requests_forced Requests with the force condition
# TYPE fleetgate_requests_forced counter
fleetgate_requests_forced {}

# HELP fleetgate_requests_probed Requests evaluated as probes
# TYPE fleetgate_requests_probed counter
fleetgate_requests_probed {}

# HELP fleetgate_wanted_states_applied Wanted states written to the registry
# TYPE fleetgate_wanted_states_applied counter
fleetgate_wanted_states_applied {}

# HELP fleetgate_cluster_state_version Version of the latest published cluster state
# TYPE fleetgate_cluster_state_version gauge
fleetgate_cluster_state_version {}
"#,
            snapshot.requests_total,
            snapshot.requests_allowed,
            snapshot.requests_already_set,
            snapshot.requests_disallowed,
            snapshot.requests_forced,
            snapshot.requests_probed,
            snapshot.wanted_states_applied,
            snapshot.cluster_state_version,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_allowed: u64,
    pub requests_already_set: u64,
    pub requests_disallowed: u64,
    pub requests_forced: u64,
    pub requests_probed: u64,
    pub wanted_states_applied: u64,
    pub cluster_state_version: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
