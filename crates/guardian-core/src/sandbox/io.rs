//! The I/O handle a tool receives for one execution.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::error::PolicyViolation;

use super::egress::GuardedHttpClient;
use super::monitor::{AccessKind, AccessRecord, ResourceMonitor};
use super::policy::ExecutionPolicy;

#[derive(Debug, Default)]
struct TrailState {
    resources: Vec<String>,
    egress_calls: u32,
    denial: Option<PolicyViolation>,
}

/// Resources touched during one execution, shared by its I/O handles.
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrail {
    state: Arc<Mutex<TrailState>>,
}

impl ExecutionTrail {
    fn lock(&self) -> MutexGuard<'_, TrailState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn record_egress(&self, host: &str) {
        let mut state = self.lock();
        state.egress_calls += 1;
        let resource = format!("egress:{host}");
        if !state.resources.contains(&resource) {
            state.resources.push(resource);
        }
    }

    pub(crate) fn record_resource(&self, kind: AccessKind, resource: &str) {
        let entry = format!("{}:{resource}", kind.as_str());
        let mut state = self.lock();
        if !state.resources.contains(&entry) {
            state.resources.push(entry);
        }
    }

    /// Keeps the first denial; later ones are already in the access log.
    pub(crate) fn record_denial(&self, violation: PolicyViolation) {
        self.lock().denial.get_or_insert(violation);
    }

    pub fn resources(&self) -> Vec<String> {
        self.lock().resources.clone()
    }

    pub fn egress_calls(&self) -> u32 {
        self.lock().egress_calls
    }

    pub fn first_denial(&self) -> Option<PolicyViolation> {
        self.lock().denial.clone()
    }
}

/// Allow-list check for a table or path, logged to the access log.
///
/// Denials are audited at warn.
pub(crate) fn check_access(
    policy: &ExecutionPolicy,
    monitor: &ResourceMonitor,
    audit: &dyn AuditSink,
    tool_id: &str,
    kind: AccessKind,
    resource: &str,
) -> Result<(), PolicyViolation> {
    let allowed = match kind {
        AccessKind::Database => policy.allows_table(resource),
        AccessKind::FileSystem => policy.allows_path(resource),
        AccessKind::Egress => policy.allows_domain(resource),
    };
    monitor.log_access(AccessRecord::new(tool_id, kind, resource, allowed));

    if allowed {
        return Ok(());
    }

    audit.record(AuditEvent::warn(
        AuditEventKind::AccessDenied,
        tool_id,
        json!({ "kind": kind.as_str(), "resource": resource }),
    ));
    let tool_id = tool_id.to_string();
    let resource = resource.to_string();
    Err(match kind {
        AccessKind::Database => PolicyViolation::TableNotAllowed {
            tool_id,
            table: resource,
        },
        AccessKind::FileSystem => PolicyViolation::PathNotAllowed {
            tool_id,
            path: resource,
        },
        AccessKind::Egress => PolicyViolation::DomainNotAllowed {
            tool_id,
            domain: resource,
        },
    })
}

/// Handle passed to a tool executor: guarded HTTP plus table and path gates.
#[derive(Clone)]
pub struct ToolIo {
    tool_id: String,
    http: GuardedHttpClient,
    policy: Arc<ExecutionPolicy>,
    monitor: Arc<ResourceMonitor>,
    audit: Arc<dyn AuditSink>,
    trail: ExecutionTrail,
}

impl ToolIo {
    pub(crate) fn new(
        tool_id: impl Into<String>,
        http: GuardedHttpClient,
        policy: Arc<ExecutionPolicy>,
        monitor: Arc<ResourceMonitor>,
        audit: Arc<dyn AuditSink>,
        trail: ExecutionTrail,
    ) -> Self {
        Self {
            tool_id: tool_id.into(),
            http,
            policy,
            monitor,
            audit,
            trail,
        }
    }

    pub fn tool_id(&self) -> &str {
        &self.tool_id
    }

    /// The egress-guarded HTTP client.
    pub fn http(&self) -> &GuardedHttpClient {
        &self.http
    }

    /// Gate access to a database table.
    pub fn table(&self, name: &str) -> Result<(), PolicyViolation> {
        self.gate(AccessKind::Database, name)
    }

    /// Gate access to a file-system path.
    pub fn path(&self, path: &str) -> Result<(), PolicyViolation> {
        self.gate(AccessKind::FileSystem, path)
    }

    fn gate(&self, kind: AccessKind, resource: &str) -> Result<(), PolicyViolation> {
        match check_access(
            &self.policy,
            &self.monitor,
            self.audit.as_ref(),
            &self.tool_id,
            kind,
            resource,
        ) {
            Ok(()) => {
                self.trail.record_resource(kind, resource);
                Ok(())
            }
            Err(violation) => {
                self.trail.record_denial(violation.clone());
                Err(violation)
            }
        }
    }
}

impl std::fmt::Debug for ToolIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolIo")
            .field("tool_id", &self.tool_id)
            .finish()
    }
}
