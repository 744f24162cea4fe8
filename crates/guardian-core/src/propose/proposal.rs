//! Proposal state and its lifecycle rules.

use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::WorkflowError;
use crate::domain::{Issue, RemediationAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Proposed,
    Approved,
    Rejected,
    Merged,
    Closed,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Proposed => "proposed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Merged => "merged",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Merged | Self::Closed)
    }

    /// Legal edges of the lifecycle graph.
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Draft, Proposed)
                | (Draft, Closed)
                | (Proposed, Approved)
                | (Proposed, Rejected)
                | (Proposed, Closed)
                | (Approved, Merged)
                | (Approved, Closed)
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// One file change, committed on its own with `reason` in the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default)]
    pub content: Option<String>,
    pub reason: String,
    /// Blob hash the change was authored against, for optimistic concurrency.
    #[serde(default)]
    pub prior_sha: Option<String>,
}

impl FileChange {
    pub fn create(path: impl Into<String>, content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Create,
            content: Some(content.into()),
            reason: reason.into(),
            prior_sha: None,
        }
    }

    pub fn update(path: impl Into<String>, content: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Update,
            content: Some(content.into()),
            reason: reason.into(),
            prior_sha: None,
        }
    }

    pub fn delete(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: ChangeKind::Delete,
            content: None,
            reason: reason.into(),
            prior_sha: None,
        }
    }

    pub fn with_prior_sha(mut self, sha: impl Into<String>) -> Self {
        self.prior_sha = Some(sha.into());
        self
    }

    /// Repository-relative path, no `..`, content present unless deleting.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let invalid = |reason: &str| WorkflowError::InvalidChange {
            path: self.path.clone(),
            reason: reason.to_string(),
        };

        if self.path.trim().is_empty() {
            return Err(invalid("path is empty"));
        }
        let path = Path::new(&self.path);
        if path.is_absolute() {
            return Err(invalid("path must be repository-relative"));
        }
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(invalid("path must not contain '.' or '..' segments"));
        }
        if self.reason.trim().is_empty() {
            return Err(invalid("reason is required"));
        }
        match (self.kind, &self.content) {
            (ChangeKind::Delete, Some(_)) => Err(invalid("delete carries no content")),
            (ChangeKind::Create | ChangeKind::Update, None) => Err(invalid("content is required")),
            _ => Ok(()),
        }
    }

    pub fn commit_message(&self, proposal_id: &str, issue_id: &str) -> String {
        format!(
            "{} {}: {}\n\nGuardian proposal {proposal_id} for issue {issue_id}",
            self.kind.as_str(),
            self.path,
            self.reason
        )
    }
}

/// Pull request backing a proposal. Dry-run proposals carry a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
    pub placeholder: bool,
}

impl PullRequestRef {
    pub fn placeholder(branch: &str) -> Self {
        Self {
            number: 0,
            url: format!("dry-run://{branch}"),
            placeholder: true,
        }
    }
}

/// An immutable approval or rejection entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewDecision {
    pub reviewer: String,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub details: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl TestResult {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            details: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            details: Some(details.into()),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub issue: Issue,
    pub action: RemediationAction,
    pub changes: Vec<FileChange>,
    pub branch: String,
    pub status: ProposalStatus,
    pub pull_request: Option<PullRequestRef>,
    pub reviewers: Vec<String>,
    pub approvals: Vec<ReviewDecision>,
    pub rejections: Vec<ReviewDecision>,
    pub test_results: Vec<TestResult>,
    pub merge_sha: Option<String>,
    pub closed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn is_dry_run(&self) -> bool {
        self.pull_request.as_ref().is_some_and(|pr| pr.placeholder)
    }

    pub fn has_approval_from(&self, reviewer: &str) -> bool {
        self.approvals.iter().any(|a| a.reviewer == reviewer)
    }

    pub fn failed_tests(&self) -> Vec<&str> {
        self.test_results
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.name.as_str())
            .collect()
    }
}

/// `guardian/<category>/<issue-id>-<unix-ms>`.
///
/// Characters outside `[A-Za-z0-9._-]` in the issue id become `-`.
pub fn branch_name(issue: &Issue, now: DateTime<Utc>) -> String {
    let slug: String = issue
        .id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!(
        "guardian/{}/{}-{}",
        issue.category.as_str(),
        slug,
        now.timestamp_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueCategory, Severity};
    use chrono::TimeZone;

    fn issue(id: &str) -> Issue {
        Issue {
            id: id.into(),
            category: IssueCategory::Configuration,
            severity: Severity::Low,
            title: "t".into(),
            description: String::new(),
            affected_resources: vec![],
        }
    }

    #[test]
    fn test_branch_name() {
        let now = Utc.timestamp_millis_opt(1_767_225_600_123).unwrap();
        assert_eq!(
            branch_name(&issue("ISS-42"), now),
            "guardian/configuration/ISS-42-1767225600123"
        );
        assert_eq!(
            branch_name(&issue("a b/c"), now),
            "guardian/configuration/a-b-c-1767225600123"
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        use ProposalStatus::*;
        for from in [Rejected, Merged, Closed] {
            assert!(from.is_terminal());
            for to in [Draft, Proposed, Approved, Rejected, Merged, Closed] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(!Draft.can_transition_to(Merged));
        assert!(!Proposed.can_transition_to(Merged));
        assert!(Approved.can_transition_to(Merged));
        assert!(Approved.can_transition_to(Closed));
        assert!(!Approved.can_transition_to(Rejected));
    }

    #[test]
    fn test_change_validation() {
        assert!(FileChange::update("config/a.toml", "x", "fix").validate().is_ok());
        assert!(FileChange::delete("old.txt", "unused").validate().is_ok());
        assert!(FileChange::update("../etc/passwd", "x", "r").validate().is_err());
        assert!(FileChange::update("/abs", "x", "r").validate().is_err());
        assert!(FileChange::update("a.txt", "x", " ").validate().is_err());

        let mut no_content = FileChange::create("a.txt", "", "r");
        no_content.content = None;
        assert!(no_content.validate().is_err());
    }

    #[test]
    fn test_commit_message_carries_reason() {
        let msg = FileChange::update("a.toml", "x", "raise pool size").commit_message("p1", "i1");
        assert!(msg.starts_with("update a.toml: raise pool size"));
        assert!(msg.contains("p1"));
    }
}
