//! Guardian Core Library
//!
//! Trust-and-execution layer for automated remediation tools: a capability
//! registry, short-lived scoped tokens, schema-locked I/O, a resource-governed
//! sandbox and a propose-don't-push change workflow, composed by [`Guardian`].

pub mod audit;
pub mod auth;
pub mod config;
pub mod domain;
pub mod guardian;
pub mod metrics;
pub mod obs;
pub mod propose;
pub mod registry;
pub mod sandbox;
pub mod telemetry;
pub mod validation;
pub mod vcs;

pub use guardian::{Guardian, GuardianBuilder, InitError};

pub use config::{ConfigError, GuardianConfig, TelemetryConfig};

pub use domain::{
    ActionStep, AuthorizationError, ErrorCategory, GuardianError, IntegrityError, Issue,
    IssueCategory, IssueKind, PolicyViolation, RemediationAction, Result, Scope, Severity,
    StepAction, StepTarget, StepVerb, Strategy, ValidationError, ValidationIssue, WorkflowError,
};

pub use audit::{AuditEvent, AuditEventKind, AuditSeverity, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use metrics::{Metrics, MetricsSnapshot};

pub use registry::{
    compute_checksum, is_valid_checksum, CapabilityKind, ToolCapabilities, ToolLimits,
    ToolMetadata, ToolRegistry,
};

pub use auth::{
    determine_scopes_for_action, IssuedToken, JwkSet, KeyManager, MintOptions, TokenAuthenticator,
    TokenClaims, TokenConfig, TokenValidation,
};

pub use validation::{
    ContentPolicy, FieldSpec, FieldType, ObjectSchema, PhiDetector, PhiType, RiskLevel, Schema,
    SchemaLockedTool, SchemaStage, SchemaValidator, SqlInjectionDetector, ThreatReport,
    ValidationReport, XssDetector,
};

pub use sandbox::{
    ExecutionContext, ExecutionPolicy, ExecutionResult, ExecutionSandbox, ExecutionStats,
    HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient, StaticHttpClient, ToolIo,
};

pub use propose::{
    ChangeKind, FileChange, MergeReadiness, Proposal, ProposalStatus, ProposeWorkflow,
    TestResult, WorkflowConfig,
};

pub use vcs::{GitHubClient, GitHubConfig, MemoryVcs, VcsClient, VcsError};
