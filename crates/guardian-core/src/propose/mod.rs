//! Human-gated change proposals.
//!
//! - [`proposal`]:    proposal state, file changes and lifecycle edges
//! - [`description`]: pull-request title and markdown body
//! - [`merge`]:       merge readiness over reviews and check runs
//! - [`workflow`]:    [`ProposeWorkflow`], the lifecycle driver

pub mod description;
pub mod merge;
pub mod proposal;
pub mod workflow;

pub use description::{pr_title, render_description};
pub use merge::{evaluate, MergeReadiness};
pub use proposal::{
    branch_name, ChangeKind, FileChange, Proposal, ProposalStatus, PullRequestRef,
    ReviewDecision, TestResult,
};
pub use workflow::{ProposeWorkflow, WorkflowConfig};
