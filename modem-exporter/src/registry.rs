//! Shared store of the latest modem snapshot and exporter health.
//!
//! The poller is the only writer. Scrape handlers read concurrently. State is
//! held as one immutable value behind an [`ArcSwap`]: writers build a new
//! value and swap it in, readers take an `Arc` to whatever is current and
//! render from it without holding any lock.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::PollError;
use crate::snapshot::StatSnapshot;

/// The most recent poll failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Classification, e.g. `unreachable` or `missing_field`.
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Exporter self-health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExporterHealth {
    /// Failed polls since the last success.
    pub consecutive_failures: u32,
    /// Capture time of the last published snapshot.
    pub last_success: Option<DateTime<Utc>>,
    /// Last failure, kept after recovery for diagnostics.
    pub last_error: Option<LastError>,
    pub successes_total: u64,
    pub failures_total: u64,
    /// Wall time of the last poll cycle.
    pub last_poll_duration: Option<Duration>,
}

/// One consistent view of the registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryState {
    latest: Option<Arc<StatSnapshot>>,
    health: ExporterHealth,
}

impl RegistryState {
    /// The last successfully parsed snapshot, if any poll has succeeded yet.
    pub fn latest(&self) -> Option<&StatSnapshot> {
        self.latest.as_deref()
    }

    pub fn health(&self) -> &ExporterHealth {
        &self.health
    }

    /// Whether the most recent poll produced fresh data.
    pub fn is_up(&self) -> bool {
        self.latest.is_some() && self.health.consecutive_failures == 0
    }
}

/// Immutable handle to a registry state, as returned by [`MetricRegistry::read`].
pub type RegistrySnapshot = Arc<RegistryState>;

/// Thread-safe registry.
pub struct MetricRegistry {
    state: ArcSwap<RegistryState>,
    /// Serializes read-modify-write cycles. Readers never take it.
    writer: Mutex<()>,
}

/// Create a shareable registry handle.
pub type SharedRegistry = Arc<MetricRegistry>;

impl MetricRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            state: ArcSwap::from_pointee(RegistryState::default()),
            writer: Mutex::new(()),
        }
    }

    /// Publish a new snapshot and mark the exporter healthy.
    pub fn update(&self, snapshot: StatSnapshot) {
        self.publish_success(snapshot, None);
    }

    /// Publish a new snapshot together with the duration of the cycle that
    /// produced it.
    pub fn update_with_duration(&self, snapshot: StatSnapshot, duration: Duration) {
        self.publish_success(snapshot, Some(duration));
    }

    /// Record a failed poll. The previous snapshot stays published.
    pub fn record_failure(&self, error: &PollError) {
        self.publish_failure(error, None);
    }

    /// Record a failed poll together with the duration of the cycle.
    pub fn record_failure_with_duration(&self, error: &PollError, duration: Duration) {
        self.publish_failure(error, Some(duration));
    }

    /// Record how long the last poll cycle took.
    pub fn record_poll_duration(&self, duration: Duration) {
        self.modify(|state| state.health.last_poll_duration = Some(duration));
    }

    /// Current state. Never blocks on the writer.
    pub fn read(&self) -> RegistrySnapshot {
        self.state.load_full()
    }

    fn publish_success(&self, snapshot: StatSnapshot, duration: Option<Duration>) {
        let captured_at = snapshot.captured_at();
        let snapshot = Arc::new(snapshot);

        self.modify(|state| {
            state.latest = Some(snapshot);
            state.health.consecutive_failures = 0;
            state.health.last_success = Some(captured_at);
            state.health.successes_total += 1;
            if duration.is_some() {
                state.health.last_poll_duration = duration;
            }
        });

        debug!(captured_at = %captured_at, "Published new snapshot");
    }

    fn publish_failure(&self, error: &PollError, duration: Option<Duration>) {
        let last_error = LastError {
            kind: error.kind(),
            message: error.to_string(),
            at: Utc::now(),
        };

        self.modify(|state| {
            state.health.consecutive_failures = state.health.consecutive_failures.saturating_add(1);
            state.health.failures_total += 1;
            state.health.last_error = Some(last_error);
            if duration.is_some() {
                state.health.last_poll_duration = duration;
            }
        });

        trace!(kind = error.kind(), "Recorded poll failure");
    }

    fn modify(&self, apply: impl FnOnce(&mut RegistryState)) {
        let _guard = self.writer.lock();
        let mut next = RegistryState::clone(&self.state.load());
        apply(&mut next);
        self.state.store(Arc::new(next));
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
