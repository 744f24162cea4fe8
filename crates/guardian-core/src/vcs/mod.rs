//! Version-control host integration used by the propose workflow.
//!
//! - [`VcsClient`]:         branch, file, pull-request, check and review calls
//! - [`github::GitHubClient`]: REST implementation over `reqwest`
//! - [`memory::MemoryVcs`]: in-memory fake for tests and dry runs

pub mod github;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::WorkflowError;

pub use github::{GitHubClient, GitHubConfig, GITHUB_API_VERSION};
pub use memory::MemoryVcs;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VcsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<VcsError> for WorkflowError {
    fn from(err: VcsError) -> Self {
        WorkflowError::Vcs(err.to_string())
    }
}

pub type VcsResult<T> = std::result::Result<T, VcsError>;

/// A file as stored on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// Blob hash; pass it back when updating or deleting the file.
    pub sha: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSpec {
    pub title: String,
    pub body: String,
    /// Source branch.
    pub head: String,
    /// Target branch.
    pub base: String,
    #[serde(default)]
    pub draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub state: PullRequestState,
    pub head_sha: Option<String>,
    /// `None` while the host is still computing mergeability.
    pub mergeable: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMethod {
    Merge,
    Squash,
    Rebase,
}

impl MergeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Squash => "squash",
            Self::Rebase => "rebase",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Neutral,
    Skipped,
    Failure,
    Cancelled,
    TimedOut,
    ActionRequired,
    Stale,
    #[serde(other)]
    Unknown,
}

impl CheckConclusion {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Neutral => "neutral",
            Self::Skipped => "skipped",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
            Self::ActionRequired => "action_required",
            Self::Stale => "stale",
            Self::Unknown => "unknown",
        }
    }
}

/// One CI check run on a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckRun {
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
}

impl CheckRun {
    pub fn completed(name: impl Into<String>, conclusion: CheckConclusion) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Completed,
            conclusion: Some(conclusion),
        }
    }

    pub fn in_progress(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::InProgress,
            conclusion: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == CheckStatus::Completed
    }

    pub fn is_passing(&self) -> bool {
        self.is_complete()
            && matches!(
                self.conclusion,
                Some(CheckConclusion::Success | CheckConclusion::Neutral | CheckConclusion::Skipped)
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    #[serde(other)]
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub reviewer: String,
    pub state: ReviewState,
}

/// Calls the propose workflow makes against a repository host.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Head commit of `branch`.
    async fn get_ref(&self, branch: &str) -> VcsResult<String>;

    async fn create_branch(&self, branch: &str, from_sha: &str) -> VcsResult<()>;

    async fn delete_branch(&self, branch: &str) -> VcsResult<()>;

    async fn get_file(&self, path: &str, branch: &str) -> VcsResult<Option<FileContent>>;

    /// Create or update a file in one commit; returns the new blob hash.
    ///
    /// `prior_sha` must match the current blob when the file exists.
    async fn put_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        prior_sha: Option<&str>,
    ) -> VcsResult<String>;

    async fn delete_file(&self, path: &str, message: &str, branch: &str, sha: &str)
        -> VcsResult<()>;

    async fn create_pull_request(&self, spec: &PullRequestSpec) -> VcsResult<PullRequest>;

    async fn get_pull_request(&self, number: u64) -> VcsResult<PullRequest>;

    /// Merge and return the merge commit.
    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> VcsResult<String>;

    async fn close_pull_request(&self, number: u64) -> VcsResult<()>;

    async fn list_check_runs(&self, git_ref: &str) -> VcsResult<Vec<CheckRun>>;

    async fn list_reviews(&self, number: u64) -> VcsResult<Vec<Review>>;

    async fn add_labels(&self, number: u64, labels: &[String]) -> VcsResult<()>;

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> VcsResult<()>;
}
