//! Per-tool rate windows, concurrency slots and observational logs.
//!
//! All state lives behind one mutex; no critical section spans an `.await`.
//! Window timestamps use `tokio::time::Instant` so paused-clock tests are
//! deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::domain::error::PolicyViolation;

/// Length of the sliding rate window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound on retained access records and violations.
const LOG_CAPACITY: usize = 10_000;

/// What kind of resource an access attempt targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Egress,
    Database,
    FileSystem,
}

impl AccessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Egress => "egress",
            Self::Database => "database",
            Self::FileSystem => "file_system",
        }
    }
}

/// One allowed or denied resource access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub timestamp: DateTime<Utc>,
    pub tool_id: String,
    pub kind: AccessKind,
    pub resource: String,
    pub allowed: bool,
}

impl AccessRecord {
    pub fn new(
        tool_id: impl Into<String>,
        kind: AccessKind,
        resource: impl Into<String>,
        allowed: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            tool_id: tool_id.into(),
            kind,
            resource: resource.into(),
            allowed,
        }
    }
}

/// A rejected call at the rate gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitViolation {
    pub timestamp: DateTime<Utc>,
    pub tool_id: String,
    pub current: u32,
    pub limit: u32,
    pub retry_after_ms: u64,
}

/// How one execution attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// The tool ran and failed, or its response was refused.
    Failed,
    TimedOut,
    /// A gate refused the call before the tool ran.
    Rejected,
}

/// Aggregate counters for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_executions: u64,
    pub successful: u64,
    /// Every non-successful attempt, gate rejections and timeouts included.
    pub failed: u64,
    pub timed_out: u64,
    pub rejected: u64,
    /// Rolling mean over attempts that reached the executor.
    pub avg_execution_time_ms: f64,
    /// Rolling mean over attempts with a memory sample.
    pub avg_memory_delta_bytes: f64,
    pub memory_samples: u64,
    pub last_execution: Option<DateTime<Utc>>,
}

impl ExecutionStats {
    fn record(&mut self, outcome: ExecutionOutcome, duration_ms: u64, memory_delta: Option<i64>) {
        self.total_executions += 1;
        match outcome {
            ExecutionOutcome::Succeeded => self.successful += 1,
            ExecutionOutcome::Failed => self.failed += 1,
            ExecutionOutcome::TimedOut => {
                self.failed += 1;
                self.timed_out += 1;
            }
            ExecutionOutcome::Rejected => {
                self.failed += 1;
                self.rejected += 1;
            }
        }

        if outcome != ExecutionOutcome::Rejected {
            let ran = (self.total_executions - self.rejected) as f64;
            self.avg_execution_time_ms += (duration_ms as f64 - self.avg_execution_time_ms) / ran;
        }

        if let Some(delta) = memory_delta {
            self.memory_samples += 1;
            self.avg_memory_delta_bytes +=
                (delta as f64 - self.avg_memory_delta_bytes) / self.memory_samples as f64;
        }

        self.last_execution = Some(Utc::now());
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    windows: HashMap<String, VecDeque<Instant>>,
    active: HashMap<String, u32>,
    access_log: VecDeque<AccessRecord>,
    violations: VecDeque<RateLimitViolation>,
    stats: HashMap<String, ExecutionStats>,
}

impl MonitorState {
    /// Drop timestamps that left the window; returns the in-window count.
    fn prune(&mut self, tool_id: &str, now: Instant) -> usize {
        let Some(window) = self.windows.get_mut(tool_id) else {
            return 0;
        };
        while window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= RATE_WINDOW)
        {
            window.pop_front();
        }
        window.len()
    }

    fn rate_check(&mut self, tool_id: &str, limit: u32, now: Instant) -> Result<(), PolicyViolation> {
        let current = self.prune(tool_id, now);
        if current < limit as usize {
            return Ok(());
        }

        let retry_after_ms = self
            .windows
            .get(tool_id)
            .and_then(|w| w.front())
            .map(|oldest| {
                let age = now.saturating_duration_since(*oldest);
                RATE_WINDOW.saturating_sub(age).as_millis() as u64
            })
            .unwrap_or(RATE_WINDOW.as_millis() as u64)
            .max(1);

        let current = u32::try_from(current).unwrap_or(u32::MAX);
        push_capped(
            &mut self.violations,
            RateLimitViolation {
                timestamp: Utc::now(),
                tool_id: tool_id.to_string(),
                current,
                limit,
                retry_after_ms,
            },
        );

        Err(PolicyViolation::RateLimited {
            tool_id: tool_id.to_string(),
            current,
            limit,
            retry_after_ms,
        })
    }
}

fn push_capped<T>(log: &mut VecDeque<T>, item: T) {
    if log.len() == LOG_CAPACITY {
        log.pop_front();
    }
    log.push_back(item);
}

/// Shared rate, concurrency and access bookkeeping for the sandbox.
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    state: Mutex<MonitorState>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject when the last 60s already hold `limit` executions.
    ///
    /// Read-only apart from recording the violation; the timestamp is only
    /// taken by [`ResourceMonitor::acquire`].
    pub fn check_rate(&self, tool_id: &str, limit: u32) -> Result<(), PolicyViolation> {
        self.lock().rate_check(tool_id, limit, Instant::now())
    }

    /// Re-check the rate window, check concurrency, then take a slot and
    /// record the rate timestamp, all in one critical section.
    pub fn acquire(
        self: &Arc<Self>,
        tool_id: &str,
        rate_limit: u32,
        max_concurrency: u32,
    ) -> Result<ConcurrencySlot, PolicyViolation> {
        let now = Instant::now();
        let mut state = self.lock();

        state.rate_check(tool_id, rate_limit, now)?;

        let active = state.active.get(tool_id).copied().unwrap_or(0);
        if active >= max_concurrency {
            return Err(PolicyViolation::ConcurrencyExceeded {
                tool_id: tool_id.to_string(),
                active,
                limit: max_concurrency,
            });
        }

        state
            .windows
            .entry(tool_id.to_string())
            .or_default()
            .push_back(now);
        state.active.insert(tool_id.to_string(), active + 1);

        Ok(ConcurrencySlot {
            monitor: Arc::clone(self),
            tool_id: tool_id.to_string(),
        })
    }

    fn release(&self, tool_id: &str) {
        let mut state = self.lock();
        if let Some(active) = state.active.get_mut(tool_id) {
            *active = active.saturating_sub(1);
            if *active == 0 {
                state.active.remove(tool_id);
            }
        }
    }

    pub fn active_executions(&self, tool_id: &str) -> u32 {
        self.lock().active.get(tool_id).copied().unwrap_or(0)
    }

    /// Executions counted in the current window.
    pub fn window_len(&self, tool_id: &str) -> usize {
        self.lock().prune(tool_id, Instant::now())
    }

    pub fn log_access(&self, record: AccessRecord) {
        push_capped(&mut self.lock().access_log, record);
    }

    pub fn access_log(&self, tool_id: Option<&str>) -> Vec<AccessRecord> {
        self.lock()
            .access_log
            .iter()
            .filter(|r| tool_id.map_or(true, |id| r.tool_id == id))
            .cloned()
            .collect()
    }

    pub fn violations(&self, tool_id: Option<&str>) -> Vec<RateLimitViolation> {
        self.lock()
            .violations
            .iter()
            .filter(|v| tool_id.map_or(true, |id| v.tool_id == id))
            .cloned()
            .collect()
    }

    pub fn record_outcome(
        &self,
        tool_id: &str,
        outcome: ExecutionOutcome,
        duration_ms: u64,
        memory_delta: Option<i64>,
    ) {
        self.lock()
            .stats
            .entry(tool_id.to_string())
            .or_default()
            .record(outcome, duration_ms, memory_delta);
    }

    pub fn stats(&self, tool_id: &str) -> Option<ExecutionStats> {
        self.lock().stats.get(tool_id).cloned()
    }
}

/// An occupied concurrency slot; released on drop.
#[derive(Debug)]
pub struct ConcurrencySlot {
    monitor: Arc<ResourceMonitor>,
    tool_id: String,
}

impl ConcurrencySlot {
    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.monitor.release(&self.tool_id);
    }
}

// ---------------------------------------------------------------------------
// Memory probe
// ---------------------------------------------------------------------------

/// Source of the process's resident memory, for best-effort deltas.
pub trait MemoryProbe: Send + Sync {
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads the current process's resident set through `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

impl MemoryProbe for SysinfoProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = sysinfo::get_current_pid().ok()?;
        let mut system = sysinfo::System::new();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(|p| p.memory())
    }
}

/// Probe that never samples.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_window_slides() {
        let monitor = Arc::new(ResourceMonitor::new());
        for _ in 0..3 {
            let _slot = monitor.acquire("t", 3, 5).unwrap();
        }
        let err = monitor.check_rate("t", 3).unwrap_err();
        match err {
            PolicyViolation::RateLimited {
                current,
                limit,
                retry_after_ms,
                ..
            } => {
                assert_eq!((current, limit), (3, 3));
                assert_eq!(retry_after_ms, 60_000);
            }
            other => panic!("unexpected {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(45)).await;
        match monitor.check_rate("t", 3).unwrap_err() {
            PolicyViolation::RateLimited { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, 15_000)
            }
            other => panic!("unexpected {other:?}"),
        }

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(monitor.check_rate("t", 3).is_ok());
        assert_eq!(monitor.window_len("t"), 0);
        assert_eq!(monitor.violations(Some("t")).len(), 2);
    }

    #[test]
    fn test_slot_released_on_drop() {
        let monitor = Arc::new(ResourceMonitor::new());
        let a = monitor.acquire("t", 10, 2).unwrap();
        let _b = monitor.acquire("t", 10, 2).unwrap();
        assert_eq!(monitor.active_executions("t"), 2);

        let err = monitor.acquire("t", 10, 2).unwrap_err();
        assert_eq!(
            err,
            PolicyViolation::ConcurrencyExceeded {
                tool_id: "t".into(),
                active: 2,
                limit: 2,
            }
        );

        drop(a);
        assert_eq!(monitor.active_executions("t"), 1);
        let c = monitor.acquire("t", 10, 2).unwrap();
        assert_eq!(c.tool_id(), "t");
    }

    #[test]
    fn test_concurrency_rejection_takes_no_rate_slot() {
        let monitor = Arc::new(ResourceMonitor::new());
        let _slot = monitor.acquire("t", 10, 1).unwrap();
        assert!(monitor.acquire("t", 10, 1).is_err());
        assert_eq!(monitor.window_len("t"), 1);
    }

    #[test]
    fn test_stats_rolling_average() {
        let monitor = ResourceMonitor::new();
        monitor.record_outcome("t", ExecutionOutcome::Succeeded, 10, Some(100));
        monitor.record_outcome("t", ExecutionOutcome::Failed, 30, None);
        monitor.record_outcome("t", ExecutionOutcome::Rejected, 0, None);
        monitor.record_outcome("t", ExecutionOutcome::TimedOut, 50, Some(300));

        let stats = monitor.stats("t").unwrap();
        assert_eq!(stats.total_executions, 4);
        assert_eq!(stats.successful, 1);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.timed_out, 1);
        assert!((stats.avg_execution_time_ms - 30.0).abs() < f64::EPSILON);
        assert!((stats.avg_memory_delta_bytes - 200.0).abs() < f64::EPSILON);
        assert!(monitor.stats("other").is_none());
    }

    #[test]
    fn test_access_log_filter() {
        let monitor = ResourceMonitor::new();
        monitor.log_access(AccessRecord::new("a", AccessKind::Egress, "x.org", true));
        monitor.log_access(AccessRecord::new("b", AccessKind::Database, "patients", false));
        assert_eq!(monitor.access_log(None).len(), 2);
        let b = monitor.access_log(Some("b"));
        assert_eq!(b.len(), 1);
        assert!(!b[0].allowed);
        assert_eq!(b[0].kind.as_str(), "database");
    }

    #[test]
    fn test_no_probe() {
        assert_eq!(NoMemoryProbe.resident_bytes(), None);
    }
}
