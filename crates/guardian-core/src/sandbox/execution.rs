//! The gated execution path.
//!
//! [`ExecutionSandbox::execute`] runs a fixed gate sequence: policy, rate,
//! payload size, token, concurrency and rate slot, deadline-bound execution,
//! response size, then stats. Every outcome comes back as an
//! [`ExecutionResult`]; gate failures never escape as errors.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::auth::TokenAuthenticator;
use crate::domain::error::{GuardianError, PolicyViolation};
use crate::metrics::Metrics;
use crate::obs;
use crate::registry::ToolMetadata;

use super::egress::{GuardedHttpClient, HttpClient};
use super::estimate::estimate_size;
use super::io::{check_access, ExecutionTrail, ToolIo};
use super::monitor::{
    AccessKind, AccessRecord, ExecutionOutcome, ExecutionStats, MemoryProbe, RateLimitViolation,
    ResourceMonitor, SysinfoProbe,
};
use super::policy::ExecutionPolicy;

/// Per-call inputs besides the payload.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Bearer token minted for this action.
    pub token: String,
    /// Checksum presented for the tool artifact, verified by the facade.
    pub checksum: Option<String>,
    /// Overrides the sandbox's default outbound client for this call.
    pub http: Option<Arc<dyn HttpClient>>,
}

impl ExecutionContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            checksum: None,
            http: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn with_http(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("token", &"<redacted>")
            .field("checksum", &self.checksum)
            .field("http", &self.http.is_some())
            .finish()
    }
}

/// Outcome envelope of one execution attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub tool_id: String,
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<GuardianError>,
    pub execution_time_ms: u64,
    pub resources_accessed: Vec<String>,
    pub egress_calls: u32,
    pub memory_delta_bytes: Option<i64>,
}

impl ExecutionResult {
    pub(crate) fn failure(
        execution_id: impl Into<String>,
        tool_id: impl Into<String>,
        error: GuardianError,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            tool_id: tool_id.into(),
            success: false,
            data: None,
            error: Some(error),
            execution_time_ms,
            resources_accessed: Vec::new(),
            egress_calls: 0,
            memory_delta_bytes: None,
        }
    }

    /// The data on success, the error otherwise.
    pub fn into_result(self) -> Result<Value, GuardianError> {
        match (self.success, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (true, None, _) => Ok(Value::Null),
            (false, _, Some(error)) => Err(error),
            (false, _, None) => Err(GuardianError::ToolFailure {
                tool_id: self.tool_id,
                message: "execution failed without an error".into(),
            }),
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        self.error.as_ref().and_then(GuardianError::retry_after_ms)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Resource-governed executor for registered tools.
pub struct ExecutionSandbox {
    policies: RwLock<HashMap<String, Arc<ExecutionPolicy>>>,
    monitor: Arc<ResourceMonitor>,
    auth: Arc<TokenAuthenticator>,
    http: Arc<dyn HttpClient>,
    probe: Arc<dyn MemoryProbe>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
}

impl ExecutionSandbox {
    pub fn new(
        auth: Arc<TokenAuthenticator>,
        http: Arc<dyn HttpClient>,
        audit: Arc<dyn AuditSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            monitor: Arc::new(ResourceMonitor::new()),
            auth,
            http,
            probe: Arc::new(SysinfoProbe),
            audit,
            metrics,
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    // ---- Policies ---------------------------------------------------------

    pub fn set_policy(&self, tool_id: impl Into<String>, policy: ExecutionPolicy) {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tool_id.into(), Arc::new(policy));
    }

    /// Remove a tool's policy. The tool cannot execute until a new one is set.
    pub fn remove_policy(&self, tool_id: &str) -> bool {
        self.policies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tool_id)
            .is_some()
    }

    pub fn policy(&self, tool_id: &str) -> Option<ExecutionPolicy> {
        self.policy_handle(tool_id).map(|p| p.as_ref().clone())
    }

    fn policy_handle(&self, tool_id: &str) -> Option<Arc<ExecutionPolicy>> {
        self.policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tool_id)
            .cloned()
    }

    // ---- Standalone access checks ----------------------------------------

    pub fn check_database_access(&self, tool_id: &str, table: &str) -> Result<(), PolicyViolation> {
        self.check_standalone(tool_id, AccessKind::Database, table)
    }

    pub fn check_file_system_access(&self, tool_id: &str, path: &str) -> Result<(), PolicyViolation> {
        self.check_standalone(tool_id, AccessKind::FileSystem, path)
    }

    fn check_standalone(
        &self,
        tool_id: &str,
        kind: AccessKind,
        resource: &str,
    ) -> Result<(), PolicyViolation> {
        let policy = self
            .policy_handle(tool_id)
            .ok_or_else(|| PolicyViolation::MissingPolicy {
                tool_id: tool_id.to_string(),
            })?;
        check_access(
            &policy,
            &self.monitor,
            self.audit.as_ref(),
            tool_id,
            kind,
            resource,
        )
    }

    // ---- Queries ----------------------------------------------------------

    pub fn stats(&self, tool_id: &str) -> Option<ExecutionStats> {
        self.monitor.stats(tool_id)
    }

    pub fn access_log(&self, tool_id: Option<&str>) -> Vec<AccessRecord> {
        self.monitor.access_log(tool_id)
    }

    pub fn violations(&self, tool_id: Option<&str>) -> Vec<RateLimitViolation> {
        self.monitor.violations(tool_id)
    }

    pub fn active_executions(&self, tool_id: &str) -> u32 {
        self.monitor.active_executions(tool_id)
    }

    // ---- Execution --------------------------------------------------------

    /// Run `executor` for `tool` behind every gate.
    ///
    /// The executor receives the input and a [`ToolIo`] handle. Any access
    /// the handle denies fails the execution with that violation, even if
    /// the executor recovered from it.
    pub async fn execute<F, Fut, E>(
        &self,
        tool: &ToolMetadata,
        input: Value,
        context: ExecutionContext,
        executor: F,
    ) -> ExecutionResult
    where
        F: FnOnce(Value, ToolIo) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        self.execute_checked(tool, input, context, executor, Ok).await
    }

    /// Like [`execute`](Self::execute), with `check` applied to the executor's
    /// output before the outcome is recorded. A rejected output counts as a
    /// failed execution in stats and audit.
    pub async fn execute_checked<F, Fut, E, C>(
        &self,
        tool: &ToolMetadata,
        input: Value,
        context: ExecutionContext,
        executor: F,
        check: C,
    ) -> ExecutionResult
    where
        F: FnOnce(Value, ToolIo) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
        C: FnOnce(Value) -> Result<Value, GuardianError>,
    {
        let execution_id = Uuid::new_v4().to_string();
        let span = obs::execution_span(&tool.id, &execution_id);
        self.run_gated(tool, input, context, executor, check, execution_id)
            .instrument(span)
            .await
    }

    async fn run_gated<F, Fut, E, C>(
        &self,
        tool: &ToolMetadata,
        input: Value,
        context: ExecutionContext,
        executor: F,
        check: C,
        execution_id: String,
    ) -> ExecutionResult
    where
        F: FnOnce(Value, ToolIo) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
        C: FnOnce(Value) -> Result<Value, GuardianError>,
    {
        let started = Instant::now();
        let tool_id = tool.id.as_str();

        // 1. Policy
        let Some(policy) = self.policy_handle(tool_id) else {
            let violation = PolicyViolation::MissingPolicy {
                tool_id: tool_id.to_string(),
            };
            return self.reject(&execution_id, tool_id, "policy", violation.into(), started);
        };

        // 2. Rate
        if let Err(violation) = self
            .monitor
            .check_rate(tool_id, policy.max_executions_per_minute)
        {
            self.audit_rate_limited(tool_id, &violation);
            return self.reject(&execution_id, tool_id, "rate", violation.into(), started);
        }

        // 3. Payload size
        let size = estimate_size(&input);
        if size > policy.max_payload_bytes {
            let violation = PolicyViolation::PayloadTooLarge {
                tool_id: tool_id.to_string(),
                size,
                limit: policy.max_payload_bytes,
            };
            return self.reject(&execution_id, tool_id, "payload", violation.into(), started);
        }

        // 4. Token
        if let Err(err) = self
            .auth
            .validate_token(&context.token, &tool.required_scopes)
            .into_result()
        {
            return self.reject(&execution_id, tool_id, "token", err.into(), started);
        }

        // 5 + 6. Concurrency and rate slot
        let slot = match self.monitor.acquire(
            tool_id,
            policy.max_executions_per_minute,
            policy.max_concurrency,
        ) {
            Ok(slot) => slot,
            Err(violation) => {
                if matches!(violation, PolicyViolation::RateLimited { .. }) {
                    self.audit_rate_limited(tool_id, &violation);
                }
                return self.reject(&execution_id, tool_id, "concurrency", violation.into(), started);
            }
        };

        // 7. Execute under a deadline
        let trail = ExecutionTrail::default();
        let http = GuardedHttpClient::new(
            tool_id,
            Arc::clone(&policy),
            context.http.unwrap_or_else(|| Arc::clone(&self.http)),
            Arc::clone(&self.monitor),
            Arc::clone(&self.audit),
            trail.clone(),
        );
        let io = ToolIo::new(
            tool_id,
            http,
            Arc::clone(&policy),
            Arc::clone(&self.monitor),
            Arc::clone(&self.audit),
            trail.clone(),
        );

        let memory_before = self.probe.resident_bytes();
        let deadline = Duration::from_millis(policy.max_execution_time_ms);
        let raced = tokio::time::timeout(deadline, executor(input, io)).await;

        // 9. Memory delta
        let memory_delta = memory_before
            .zip(self.probe.resident_bytes())
            .map(|(before, after)| after as i64 - before as i64);

        // 8. Response size and output check, with denials recorded on the
        //    trail taking precedence
        let (outcome, result) = match raced {
            Err(_elapsed) => (
                ExecutionOutcome::TimedOut,
                Err(GuardianError::from(PolicyViolation::Timeout {
                    tool_id: tool_id.to_string(),
                    timeout_ms: policy.max_execution_time_ms,
                })),
            ),
            Ok(output) => match (trail.first_denial(), output) {
                (Some(violation), _) => (ExecutionOutcome::Failed, Err(violation.into())),
                (None, Err(e)) => (
                    ExecutionOutcome::Failed,
                    Err(GuardianError::ToolFailure {
                        tool_id: tool_id.to_string(),
                        message: e.to_string(),
                    }),
                ),
                (None, Ok(data)) => {
                    let size = estimate_size(&data);
                    if size > policy.max_response_bytes {
                        (
                            ExecutionOutcome::Failed,
                            Err(PolicyViolation::ResponseTooLarge {
                                tool_id: tool_id.to_string(),
                                size,
                                limit: policy.max_response_bytes,
                            }
                            .into()),
                        )
                    } else {
                        match check(data) {
                            Ok(data) => (ExecutionOutcome::Succeeded, Ok(data)),
                            Err(error) => (ExecutionOutcome::Failed, Err(error)),
                        }
                    }
                }
            },
        };

        // 10. Stats; the slot is released on every path out of this scope.
        drop(slot);
        let execution_time_ms = elapsed_ms(started);
        self.monitor
            .record_outcome(tool_id, outcome, execution_time_ms, memory_delta);
        self.metrics.inc_executions();
        obs::emit_execution_finished(tool_id, execution_time_ms, result.is_ok());

        let mut envelope = match result {
            Ok(data) => {
                self.audit.record(AuditEvent::new(
                    AuditEventKind::ExecutionSucceeded,
                    tool_id,
                    json!({
                        "execution_id": execution_id,
                        "execution_time_ms": execution_time_ms,
                        "egress_calls": trail.egress_calls(),
                    }),
                ));
                ExecutionResult {
                    execution_id,
                    tool_id: tool_id.to_string(),
                    success: true,
                    data: Some(data),
                    error: None,
                    execution_time_ms,
                    resources_accessed: Vec::new(),
                    egress_calls: 0,
                    memory_delta_bytes: None,
                }
            }
            Err(error) => {
                if matches!(error, GuardianError::Policy(_)) {
                    self.metrics.inc_policy_violations();
                    obs::emit_gate_rejected(tool_id, "execution", &error);
                }
                self.audit_failure(&execution_id, tool_id, &error);
                ExecutionResult::failure(execution_id, tool_id, error, execution_time_ms)
            }
        };
        envelope.resources_accessed = trail.resources();
        envelope.egress_calls = trail.egress_calls();
        envelope.memory_delta_bytes = memory_delta;
        envelope
    }

    /// Failure before the executor ran.
    fn reject(
        &self,
        execution_id: &str,
        tool_id: &str,
        gate: &str,
        error: GuardianError,
        started: Instant,
    ) -> ExecutionResult {
        let execution_time_ms = elapsed_ms(started);
        obs::emit_gate_rejected(tool_id, gate, &error);
        if matches!(error, GuardianError::Policy(_)) {
            self.metrics.inc_policy_violations();
        }
        self.monitor
            .record_outcome(tool_id, ExecutionOutcome::Rejected, execution_time_ms, None);
        self.audit_failure(execution_id, tool_id, &error);
        ExecutionResult::failure(execution_id, tool_id, error, execution_time_ms)
    }

    fn audit_failure(&self, execution_id: &str, tool_id: &str, error: &GuardianError) {
        self.audit.record(AuditEvent::warn(
            AuditEventKind::ExecutionFailed,
            tool_id,
            json!({
                "execution_id": execution_id,
                "category": error.category(),
                "error": error.to_string(),
            }),
        ));
    }

    fn audit_rate_limited(&self, tool_id: &str, violation: &PolicyViolation) {
        self.audit.record(AuditEvent::warn(
            AuditEventKind::RateLimited,
            tool_id,
            json!({
                "error": violation.to_string(),
                "retry_after_ms": violation.retry_after_ms(),
            }),
        ));
    }
}

impl std::fmt::Debug for ExecutionSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let policies = self
            .policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("ExecutionSandbox")
            .field("policies", &policies)
            .finish_non_exhaustive()
    }
}
