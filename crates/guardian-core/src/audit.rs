//! Audit sink: append-only, fire-and-forget lifecycle events.
//!
//! Every component holds an `Arc<dyn AuditSink>` and records one
//! [`AuditEvent`] per lifecycle transition. Sinks must never fail the caller.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ToolRegistered,
    ToolApproved,
    IntegrityViolation,
    TokenMinted,
    TokenValidated,
    TokenRejected,
    TokenReplayed,
    TokenRevoked,
    SessionRevoked,
    TokenRefreshed,
    RateLimited,
    EgressDenied,
    AccessDenied,
    ExecutionSucceeded,
    ExecutionFailed,
    ProposalTransition,
    MergeBlocked,
    Merged,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ToolRegistered => "tool.registered",
            Self::ToolApproved => "tool.approved",
            Self::IntegrityViolation => "tool.integrity_violation",
            Self::TokenMinted => "token.minted",
            Self::TokenValidated => "token.validated",
            Self::TokenRejected => "token.rejected",
            Self::TokenReplayed => "token.replayed",
            Self::TokenRevoked => "token.revoked",
            Self::SessionRevoked => "token.session_revoked",
            Self::TokenRefreshed => "token.refreshed",
            Self::RateLimited => "sandbox.rate_limited",
            Self::EgressDenied => "sandbox.egress_denied",
            Self::AccessDenied => "sandbox.access_denied",
            Self::ExecutionSucceeded => "sandbox.execution_succeeded",
            Self::ExecutionFailed => "sandbox.execution_failed",
            Self::ProposalTransition => "proposal.transition",
            Self::MergeBlocked => "proposal.merge_blocked",
            Self::Merged => "proposal.merged",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warn,
    Error,
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub severity: AuditSeverity,
    /// Tool id, jti, session id or proposal id the event is about.
    pub subject: String,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, subject: impl Into<String>, details: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            kind,
            severity: AuditSeverity::Info,
            subject: subject.into(),
            details,
        }
    }

    pub fn warn(kind: AuditEventKind, subject: impl Into<String>, details: Value) -> Self {
        Self {
            severity: AuditSeverity::Warn,
            ..Self::new(kind, subject, details)
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits every audit event as a `tracing` event on the `guardian::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let details = event.details.to_string();
        match event.severity {
            AuditSeverity::Info => tracing::info!(
                target: "guardian::audit",
                event = event.kind.as_str(),
                subject = %event.subject,
                event_id = %event.event_id,
                details = %details,
            ),
            AuditSeverity::Warn => tracing::warn!(
                target: "guardian::audit",
                event = event.kind.as_str(),
                subject = %event.subject,
                event_id = %event.event_id,
                details = %details,
            ),
            AuditSeverity::Error => tracing::error!(
                target: "guardian::audit",
                event = event.kind.as_str(),
                subject = %event.subject,
                event_id = %event.event_id,
                details = %details,
            ),
        }
    }
}

/// In-memory sink that keeps every event, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_sink_appends() {
        let sink = MemoryAuditSink::new();
        assert!(sink.is_empty());
        sink.record(AuditEvent::new(
            AuditEventKind::TokenMinted,
            "jti-1",
            json!({"scopes": ["fhir.read:Observation"]}),
        ));
        sink.record(AuditEvent::warn(
            AuditEventKind::TokenReplayed,
            "jti-1",
            Value::Null,
        ));
        assert_eq!(sink.len(), 2);
        let replays = sink.events_of(AuditEventKind::TokenReplayed);
        assert_eq!(replays.len(), 1);
        assert_eq!(replays[0].severity, AuditSeverity::Warn);
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingAuditSink.record(AuditEvent::new(
            AuditEventKind::Merged,
            "p-1",
            Value::Null,
        ));
    }

    #[test]
    fn test_kind_names_are_dotted() {
        assert_eq!(AuditEventKind::RateLimited.as_str(), "sandbox.rate_limited");
        assert_eq!(AuditEventKind::TokenRevoked.as_str(), "token.revoked");
    }
}
