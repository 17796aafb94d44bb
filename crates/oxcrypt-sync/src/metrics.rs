//! Coordination metrics for profiling lock and dependency behavior.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the coordination layer.
///
/// Thread-safe counters using atomic operations for lock-free updates. One
/// instance is shared by the lock manager, the dependency graph and the
/// pipeline handlers of a coordinator.
#[derive(Debug, Default)]
pub struct CoordinationMetrics {
    /// Locks granted (path and data class)
    pub lock_grants: AtomicU64,

    /// Grants that had to wait for another holder
    pub contended_grants: AtomicU64,

    /// Locks released
    pub lock_releases: AtomicU64,

    /// Dependency nodes created
    pub nodes_created: AtomicU64,

    /// Dependency nodes removed from the registry
    pub nodes_collected: AtomicU64,

    /// Collision renames followed by a retry
    pub collision_retries: AtomicU64,

    /// Backend errors rewritten into the host taxonomy
    pub translated_errors: AtomicU64,
}

impl CoordinationMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a lock grant
    #[inline]
    pub fn record_grant(&self, contended: bool) {
        self.lock_grants.fetch_add(1, Ordering::Relaxed);
        if contended {
            self.contended_grants.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a lock release
    #[inline]
    pub fn record_release(&self) {
        self.lock_releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dependency node creation
    #[inline]
    pub fn record_node_created(&self) {
        self.nodes_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dependency node leaving the registry
    #[inline]
    pub fn record_node_collected(&self) {
        self.nodes_collected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a collision retry
    #[inline]
    pub fn record_collision_retry(&self) {
        self.collision_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a translated backend error
    #[inline]
    pub fn record_translated_error(&self) {
        self.translated_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> CoordinationMetricsSnapshot {
        CoordinationMetricsSnapshot {
            lock_grants: self.lock_grants.load(Ordering::Relaxed),
            contended_grants: self.contended_grants.load(Ordering::Relaxed),
            lock_releases: self.lock_releases.load(Ordering::Relaxed),
            nodes_created: self.nodes_created.load(Ordering::Relaxed),
            nodes_collected: self.nodes_collected.load(Ordering::Relaxed),
            collision_retries: self.collision_retries.load(Ordering::Relaxed),
            translated_errors: self.translated_errors.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    pub fn reset(&self) {
        self.lock_grants.store(0, Ordering::Relaxed);
        self.contended_grants.store(0, Ordering::Relaxed);
        self.lock_releases.store(0, Ordering::Relaxed);
        self.nodes_created.store(0, Ordering::Relaxed);
        self.nodes_collected.store(0, Ordering::Relaxed);
        self.collision_retries.store(0, Ordering::Relaxed);
        self.translated_errors.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of coordination metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinationMetricsSnapshot {
    pub lock_grants: u64,
    pub contended_grants: u64,
    pub lock_releases: u64,
    pub nodes_created: u64,
    pub nodes_collected: u64,
    pub collision_retries: u64,
    pub translated_errors: u64,
}

impl CoordinationMetricsSnapshot {
    /// Locks currently held (grants minus releases)
    pub fn outstanding_locks(&self) -> u64 {
        self.lock_grants.saturating_sub(self.lock_releases)
    }

    /// Nodes still registered (created minus collected)
    pub fn live_nodes(&self) -> u64 {
        self.nodes_created.saturating_sub(self.nodes_collected)
    }

    /// Fraction of grants that waited (0.0 to 1.0)
    pub fn contention_rate(&self) -> f64 {
        if self.lock_grants == 0 {
            0.0
        } else {
            self.contended_grants as f64 / self.lock_grants as f64
        }
    }
}

impl fmt::Display for CoordinationMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Locks:")?;
        writeln!(f, "  Grants:    {:>10}", self.lock_grants)?;
        writeln!(
            f,
            "  Contended: {:>10} ({:>5.1}%)",
            self.contended_grants,
            self.contention_rate() * 100.0
        )?;
        writeln!(f, "  Releases:  {:>10}", self.lock_releases)?;
        writeln!(f, "Dependency nodes:")?;
        writeln!(f, "  Created:   {:>10}", self.nodes_created)?;
        writeln!(f, "  Collected: {:>10}", self.nodes_collected)?;
        writeln!(f, "Pipeline:")?;
        writeln!(f, "  Collision retries: {:>10}", self.collision_retries)?;
        write!(f, "  Translated errors: {:>10}", self.translated_errors)
    }
}
