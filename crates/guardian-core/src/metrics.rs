//! Atomic counters for Guardian observability.
//!
//! One [`Metrics`] instance is owned by the facade and shared by handle.
//! Counters are bumped silently; [`Metrics::flush`] emits them as a single
//! `tracing::info!` event.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    tokens_minted: AtomicU64,
    tokens_rejected: AtomicU64,
    replays_blocked: AtomicU64,
    executions: AtomicU64,
    policy_violations: AtomicU64,
    proposals_merged: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub tokens_minted: u64,
    pub tokens_rejected: u64,
    pub replays_blocked: u64,
    pub executions: u64,
    pub policy_violations: u64,
    pub proposals_merged: u64,
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            tokens_minted: AtomicU64::new(0),
            tokens_rejected: AtomicU64::new(0),
            replays_blocked: AtomicU64::new(0),
            executions: AtomicU64::new(0),
            policy_violations: AtomicU64::new(0),
            proposals_merged: AtomicU64::new(0),
        }
    }

    pub fn inc_tokens_minted(&self) {
        self.tokens_minted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tokens_minted", "counter incremented");
    }

    pub fn inc_tokens_rejected(&self) {
        self.tokens_rejected.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "tokens_rejected", "counter incremented");
    }

    pub fn inc_replays_blocked(&self) {
        self.replays_blocked.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "replays_blocked", "counter incremented");
    }

    pub fn inc_executions(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "executions", "counter incremented");
    }

    pub fn inc_policy_violations(&self) {
        self.policy_violations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "policy_violations", "counter incremented");
    }

    pub fn inc_proposals_merged(&self) {
        self.proposals_merged.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "proposals_merged", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tokens_minted: self.tokens_minted.load(Ordering::Relaxed),
            tokens_rejected: self.tokens_rejected.load(Ordering::Relaxed),
            replays_blocked: self.replays_blocked.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            policy_violations: self.policy_violations.load(Ordering::Relaxed),
            proposals_merged: self.proposals_merged.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as one `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            tokens_minted = s.tokens_minted,
            tokens_rejected = s.tokens_rejected,
            replays_blocked = s.replays_blocked,
            executions = s.executions,
            policy_violations = s.policy_violations,
            proposals_merged = s.proposals_merged,
        );
    }

    pub fn reset(&self) {
        self.tokens_minted.store(0, Ordering::Relaxed);
        self.tokens_rejected.store(0, Ordering::Relaxed);
        self.replays_blocked.store(0, Ordering::Relaxed);
        self.executions.store(0, Ordering::Relaxed);
        self.policy_violations.store(0, Ordering::Relaxed);
        self.proposals_merged.store(0, Ordering::Relaxed);
    }
}
