//! Error taxonomy for Guardian.
//!
//! Five categories mirror the trust boundaries: authorization (tokens),
//! policy (sandbox gates), validation (schemas and detectors), integrity
//! (registry and checksums) and workflow (proposal lifecycle). Everything
//! except [`WorkflowError`] is converted into a structured failure envelope
//! at the sandbox/validator boundary.

use serde::{Deserialize, Serialize};

/// Token and scope failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthorizationError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("token signature invalid: {0}")]
    InvalidSignature(String),

    #[error("token issuer mismatch: expected {expected}, got {actual}")]
    WrongIssuer { expected: String, actual: String },

    #[error("token {jti} expired")]
    Expired { jti: String },

    #[error("token {jti} revoked")]
    Revoked { jti: String },

    #[error("token {jti} already used (replay)")]
    Replayed { jti: String },

    #[error("insufficient scopes, missing: [{}]", missing.join(", "))]
    InsufficientScopes { missing: Vec<String> },

    #[error("token rejected: {}", reasons.join("; "))]
    Rejected { reasons: Vec<String> },
}

/// Sandbox gate failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    #[error("no execution policy registered for tool '{tool_id}'")]
    MissingPolicy { tool_id: String },

    #[error("tool '{tool_id}' is not approved for execution")]
    ToolNotApproved { tool_id: String },

    #[error("rate limit exceeded for tool '{tool_id}': {current}/{limit} per minute, retry after {retry_after_ms}ms")]
    RateLimited {
        tool_id: String,
        current: u32,
        limit: u32,
        retry_after_ms: u64,
    },

    #[error("payload for tool '{tool_id}' is {size} bytes (limit {limit})")]
    PayloadTooLarge {
        tool_id: String,
        size: usize,
        limit: usize,
    },

    #[error("response from tool '{tool_id}' is {size} bytes (limit {limit})")]
    ResponseTooLarge {
        tool_id: String,
        size: usize,
        limit: usize,
    },

    #[error("tool '{tool_id}' concurrency limit reached ({active}/{limit})")]
    ConcurrencyExceeded {
        tool_id: String,
        active: u32,
        limit: u32,
    },

    #[error("egress to '{domain}' denied for tool '{tool_id}'")]
    DomainNotAllowed { tool_id: String, domain: String },

    #[error("table '{table}' not allowed for tool '{tool_id}'")]
    TableNotAllowed { tool_id: String, table: String },

    #[error("path '{path}' not allowed for tool '{tool_id}'")]
    PathNotAllowed { tool_id: String, path: String },

    #[error("tool '{tool_id}' timed out after {timeout_ms}ms")]
    Timeout { tool_id: String, timeout_ms: u64 },
}

impl PolicyViolation {
    /// Milliseconds the caller should wait before retrying, if the gate says so.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

/// A single violated path reported by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// JSON path of the offending value (`$` is the root).
    pub path: String,
    pub kind: IssueKind,
    pub message: String,
}

/// Classification of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Missing,
    UnknownField,
    TypeMismatch,
    OutOfRange,
    Pattern,
    Phi,
    SqlInjection,
    Xss,
    UnknownSchema,
    Executor,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Schema and content-detector failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown schema '{name}'")]
    UnknownSchema { name: String },

    #[error("{stage} validation failed for schema '{schema}': {} issue(s)", issues.len())]
    SchemaViolation {
        schema: String,
        stage: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("executor failed inside schema lock for '{schema}': {message}")]
    ExecutorFailed { schema: String, message: String },

    #[error("schema '{name}' is invalid: {reason}")]
    InvalidSchema { name: String, reason: String },
}

impl ValidationError {
    /// The per-path issues carried by this error.
    pub fn issues(&self) -> Vec<ValidationIssue> {
        match self {
            Self::UnknownSchema { name } => vec![ValidationIssue::new(
                "$",
                IssueKind::UnknownSchema,
                format!("schema '{name}' is not registered"),
            )],
            Self::SchemaViolation { issues, .. } => issues.clone(),
            Self::ExecutorFailed { message, .. } => {
                vec![ValidationIssue::new("$", IssueKind::Executor, message.clone())]
            }
            Self::InvalidSchema { reason, .. } => {
                vec![ValidationIssue::new("$", IssueKind::UnknownSchema, reason.clone())]
            }
        }
    }
}

/// Registry and checksum failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("checksum must be 64 hex characters, got {len}")]
    MalformedChecksum { len: usize },

    #[error("invalid semver version '{version}'")]
    InvalidVersion { version: String },

    #[error("invalid capability for tool '{tool_id}': {reason}")]
    InvalidCapability { tool_id: String, reason: String },

    #[error("tool '{tool_id}' version {version} is already registered")]
    DuplicateVersion { tool_id: String, version: String },

    #[error("tool '{tool_id}' is not registered")]
    UnknownTool { tool_id: String },

    #[error("checksum mismatch for tool '{tool_id}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        tool_id: String,
        expected: String,
        actual: String,
    },

    #[error("no checksum presented for tool '{tool_id}'")]
    ChecksumMissing { tool_id: String },
}

/// Proposal lifecycle failures. Returned directly to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("proposal not found: {0}")]
    NotFound(String),

    #[error("illegal transition for proposal {id}: {from} -> {to}")]
    IllegalTransition { id: String, from: String, to: String },

    #[error("merge blocked for proposal {id}: {}", reasons.join("; "))]
    MergeBlocked { id: String, reasons: Vec<String> },

    #[error("reviewer {reviewer} already reviewed proposal {id}")]
    DuplicateReview { id: String, reviewer: String },

    #[error("proposal {id} was modified concurrently (expected status {expected})")]
    ConcurrentModification { id: String, expected: String },

    #[error("cannot {operation} proposal {id} in status {status}")]
    InvalidState {
        id: String,
        status: String,
        operation: String,
    },

    #[error("proposal has no file changes")]
    EmptyChangeSet,

    #[error("invalid change for '{path}': {reason}")]
    InvalidChange { path: String, reason: String },

    #[error("vcs error: {0}")]
    Vcs(String),
}

/// Coarse category of a [`GuardianError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authorization,
    Policy,
    Validation,
    Integrity,
    Workflow,
    Tool,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Authorization => "authorization",
            Self::Policy => "policy",
            Self::Validation => "validation",
            Self::Integrity => "integrity",
            Self::Workflow => "workflow",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// Top-level Guardian error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardianError {
    #[error("authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("tool '{tool_id}' failed: {message}")]
    ToolFailure { tool_id: String, message: String },
}

impl GuardianError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authorization(_) => ErrorCategory::Authorization,
            Self::Policy(_) => ErrorCategory::Policy,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Integrity(_) => ErrorCategory::Integrity,
            Self::Workflow(_) => ErrorCategory::Workflow,
            Self::ToolFailure { .. } => ErrorCategory::Tool,
        }
    }

    /// Whether this failure must be reported at warn-or-higher to the audit sink.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            Self::Authorization(
                AuthorizationError::Replayed { .. }
                    | AuthorizationError::Revoked { .. }
                    | AuthorizationError::InvalidSignature(_)
                    | AuthorizationError::WrongIssuer { .. }
            ) | Self::Integrity(
                IntegrityError::ChecksumMismatch { .. } | IntegrityError::ChecksumMissing { .. }
            ) | Self::Policy(PolicyViolation::DomainNotAllowed { .. })
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::Policy(v) => v.retry_after_ms(),
            _ => None,
        }
    }
}

/// Result type for Guardian operations.
pub type Result<T> = std::result::Result<T, GuardianError>;
