//! Domain models for Guardian.
//!
//! - `Issue` / `RemediationAction`: caller-supplied work descriptions
//! - `Scope`: permission strings carried in tokens
//! - error taxonomy shared by every component

pub mod action;
pub mod error;
pub mod scope;

pub use action::{
    ActionStep, Issue, IssueCategory, RemediationAction, Severity, StepAction, StepTarget,
    StepVerb, Strategy,
};
pub use error::{
    AuthorizationError, ErrorCategory, GuardianError, IntegrityError, IssueKind, PolicyViolation,
    Result, ValidationError, ValidationIssue, WorkflowError,
};
pub use scope::Scope;
