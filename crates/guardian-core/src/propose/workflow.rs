//! Proposal lifecycle driven against an optional VCS host.
//!
//! Without a [`VcsClient`] the workflow runs in dry-run mode: every
//! transition happens, but the pull request is a placeholder.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::error::WorkflowError;
use crate::domain::{Issue, RemediationAction};
use crate::metrics::Metrics;
use crate::obs;
use crate::vcs::{MergeMethod, PullRequestSpec, VcsClient};

use super::description::{pr_title, render_description};
use super::merge::{evaluate, MergeReadiness};
use super::proposal::{
    branch_name, ChangeKind, FileChange, Proposal, ProposalStatus, PullRequestRef,
    ReviewDecision, TestResult,
};

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Workflow settings, loaded from the `[workflow]` config section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub base_branch: String,
    pub required_approvals: usize,
    pub labels: Vec<String>,
    pub reviewers: Vec<String>,
    pub check_poll_interval_ms: u64,
    pub check_timeout_ms: u64,
    pub delete_branch_on_merge: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            required_approvals: 1,
            labels: vec!["guardian".to_string(), "automated-remediation".to_string()],
            reviewers: Vec::new(),
            check_poll_interval_ms: 10_000,
            check_timeout_ms: 600_000,
            delete_branch_on_merge: true,
        }
    }
}

impl WorkflowConfig {
    pub fn with_required_approvals(mut self, n: usize) -> Self {
        self.required_approvals = n;
        self
    }

    pub fn with_reviewers<const N: usize>(mut self, reviewers: [&str; N]) -> Self {
        self.reviewers = reviewers.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn with_check_polling(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.check_poll_interval_ms = interval_ms;
        self.check_timeout_ms = timeout_ms;
        self
    }
}

pub struct ProposeWorkflow {
    config: WorkflowConfig,
    vcs: Option<Arc<dyn VcsClient>>,
    proposals: RwLock<HashMap<String, Proposal>>,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<Metrics>,
}

impl ProposeWorkflow {
    pub fn new(config: WorkflowConfig, audit: Arc<dyn AuditSink>, metrics: Arc<Metrics>) -> Self {
        Self {
            config,
            vcs: None,
            proposals: RwLock::new(HashMap::new()),
            audit,
            metrics,
        }
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VcsClient>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn is_dry_run(&self) -> bool {
        self.vcs.is_none()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub fn create_proposal(
        &self,
        issue: Issue,
        action: RemediationAction,
        changes: Vec<FileChange>,
    ) -> Result<Proposal> {
        self.create_proposal_at(issue, action, changes, Utc::now())
    }

    /// Build a draft. No VCS calls are made until submit.
    pub fn create_proposal_at(
        &self,
        issue: Issue,
        action: RemediationAction,
        changes: Vec<FileChange>,
        now: DateTime<Utc>,
    ) -> Result<Proposal> {
        if changes.is_empty() {
            return Err(WorkflowError::EmptyChangeSet);
        }
        for change in &changes {
            change.validate()?;
        }

        let proposal = Proposal {
            id: Uuid::new_v4().to_string(),
            branch: branch_name(&issue, now),
            issue,
            action,
            changes,
            status: ProposalStatus::Draft,
            pull_request: None,
            reviewers: self.config.reviewers.clone(),
            approvals: Vec::new(),
            rejections: Vec::new(),
            test_results: Vec::new(),
            merge_sha: None,
            closed_reason: None,
            created_at: now,
            updated_at: now,
        };

        obs::emit_proposal_transition(&proposal.id, "none", ProposalStatus::Draft.as_str());
        self.audit.record(AuditEvent::new(
            AuditEventKind::ProposalTransition,
            &proposal.id,
            json!({
                "from": null,
                "to": ProposalStatus::Draft,
                "issue_id": proposal.issue.id,
                "branch": proposal.branch,
                "changes": proposal.changes.len(),
            }),
        ));

        self.write()
            .insert(proposal.id.clone(), proposal.clone());
        Ok(proposal)
    }

    /// Push the branch and open the pull request, then move to `proposed`.
    pub async fn submit_proposal(&self, id: &str) -> Result<Proposal> {
        let snapshot = self.require(id)?;
        if snapshot.status != ProposalStatus::Draft {
            return Err(illegal(&snapshot, ProposalStatus::Proposed));
        }

        let pull_request = match &self.vcs {
            Some(vcs) => self.open_pull_request(vcs.as_ref(), &snapshot).await?,
            None => {
                info!(proposal_id = %id, branch = %snapshot.branch, "no VCS configured, dry-run submit");
                PullRequestRef::placeholder(&snapshot.branch)
            }
        };

        self.commit(id, ProposalStatus::Draft, |p| {
            p.pull_request = Some(pull_request);
            self.transition(p, ProposalStatus::Proposed)
        })
    }

    /// Record an approval. Reaching the required count moves the proposal
    /// to `approved`.
    pub fn approve_proposal(
        &self,
        id: &str,
        reviewer: &str,
        comment: Option<String>,
    ) -> Result<Proposal> {
        let mut proposals = self.write();
        let proposal = proposals
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if !matches!(
            proposal.status,
            ProposalStatus::Proposed | ProposalStatus::Approved
        ) {
            return Err(invalid_state(proposal, "approve"));
        }
        if proposal.has_approval_from(reviewer) {
            return Err(WorkflowError::DuplicateReview {
                id: id.to_string(),
                reviewer: reviewer.to_string(),
            });
        }

        proposal.approvals.push(ReviewDecision {
            reviewer: reviewer.to_string(),
            at: Utc::now(),
            comment,
        });
        proposal.updated_at = Utc::now();
        debug!(proposal_id = %id, reviewer = %reviewer, approvals = proposal.approvals.len(), "approval recorded");

        if proposal.status == ProposalStatus::Proposed
            && proposal.approvals.len() >= self.config.required_approvals
        {
            self.transition(proposal, ProposalStatus::Approved)?;
        }
        Ok(proposal.clone())
    }

    /// Reject and close the pull request. Nothing reaches the base branch.
    pub async fn reject_proposal(
        &self,
        id: &str,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<Proposal> {
        let rejected = {
            let mut proposals = self.write();
            let proposal = proposals
                .get_mut(id)
                .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
            if !proposal.status.can_transition_to(ProposalStatus::Rejected) {
                return Err(illegal(proposal, ProposalStatus::Rejected));
            }
            proposal.rejections.push(ReviewDecision {
                reviewer: reviewer.to_string(),
                at: Utc::now(),
                comment: reason,
            });
            self.transition(proposal, ProposalStatus::Rejected)?;
            proposal.clone()
        };

        self.close_pull_request_quietly(&rejected).await;
        Ok(rejected)
    }

    pub fn record_test_result(&self, id: &str, result: TestResult) -> Result<Proposal> {
        let mut proposals = self.write();
        let proposal = proposals
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if !matches!(
            proposal.status,
            ProposalStatus::Proposed | ProposalStatus::Approved
        ) {
            return Err(invalid_state(proposal, "record test results for"));
        }
        debug!(proposal_id = %id, test = %result.name, passed = result.passed, "test result recorded");
        proposal.test_results.push(result);
        proposal.updated_at = Utc::now();
        Ok(proposal.clone())
    }

    /// Merge an approved proposal whose recorded tests all passed.
    ///
    /// With a VCS configured the pull request must also pass
    /// [`Self::safe_merge_pr`]; it is squash-merged and its branch deleted.
    pub async fn merge_proposal(&self, id: &str) -> Result<Proposal> {
        let snapshot = self.require(id)?;
        if snapshot.status.is_terminal() {
            return Err(illegal(&snapshot, ProposalStatus::Merged));
        }

        let mut reasons = Vec::new();
        if snapshot.status != ProposalStatus::Approved {
            reasons.push(format!(
                "status is {}, merge requires approved",
                snapshot.status
            ));
        }
        if snapshot.test_results.is_empty() {
            reasons.push("no test results recorded".to_string());
        }
        let failed = snapshot.failed_tests();
        if !failed.is_empty() {
            reasons.push(format!("failed tests: {}", failed.join(", ")));
        }
        if !reasons.is_empty() {
            return Err(self.merge_blocked(id, reasons));
        }

        let merge_sha = match (&self.vcs, &snapshot.pull_request) {
            (Some(vcs), Some(pr)) if !pr.placeholder => {
                let readiness = self.poll_readiness(vcs.as_ref(), &snapshot).await?;
                if !readiness.is_ready() {
                    return Err(self.merge_blocked(id, readiness.reasons()));
                }
                let sha = vcs
                    .merge_pull_request(pr.number, MergeMethod::Squash, &pr_title(&snapshot.issue))
                    .await?;
                if self.config.delete_branch_on_merge {
                    if let Err(err) = vcs.delete_branch(&snapshot.branch).await {
                        warn!(proposal_id = %id, branch = %snapshot.branch, error = %err, "branch cleanup after merge failed");
                    }
                }
                Some(sha)
            }
            _ => None,
        };

        let merged = self.commit(id, ProposalStatus::Approved, |p| {
            p.merge_sha = merge_sha.clone();
            self.transition(p, ProposalStatus::Merged)
        })?;

        self.metrics.inc_proposals_merged();
        self.audit.record(AuditEvent::new(
            AuditEventKind::Merged,
            id,
            json!({
                "issue_id": merged.issue.id,
                "branch": merged.branch,
                "merge_sha": merged.merge_sha,
                "dry_run": merged.is_dry_run(),
            }),
        ));
        Ok(merged)
    }

    /// Abandon a proposal from any non-terminal state.
    pub async fn close_proposal(&self, id: &str, reason: &str) -> Result<Proposal> {
        let closed = {
            let mut proposals = self.write();
            let proposal = proposals
                .get_mut(id)
                .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
            if !proposal.status.can_transition_to(ProposalStatus::Closed) {
                return Err(illegal(proposal, ProposalStatus::Closed));
            }
            proposal.closed_reason = Some(reason.to_string());
            self.transition(proposal, ProposalStatus::Closed)?;
            proposal.clone()
        };

        self.close_pull_request_quietly(&closed).await;
        Ok(closed)
    }

    // ------------------------------------------------------------------
    // Merge gating
    // ------------------------------------------------------------------

    /// Evaluate merge readiness once, without waiting on CI.
    pub async fn can_merge(&self, id: &str) -> Result<MergeReadiness> {
        let proposal = self.require(id)?;
        match &self.vcs {
            Some(vcs) => self.readiness(vcs.as_ref(), &proposal).await,
            None => Ok(self.local_readiness(&proposal)),
        }
    }

    /// Poll CI until every check completes, something blocks, or the
    /// configured timeout passes.
    pub async fn safe_merge_pr(&self, id: &str) -> Result<MergeReadiness> {
        let proposal = self.require(id)?;
        match &self.vcs {
            Some(vcs) => self.poll_readiness(vcs.as_ref(), &proposal).await,
            None => Ok(self.local_readiness(&proposal)),
        }
    }

    async fn poll_readiness(
        &self,
        vcs: &dyn VcsClient,
        proposal: &Proposal,
    ) -> Result<MergeReadiness> {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.check_timeout_ms);
        let interval = Duration::from_millis(self.config.check_poll_interval_ms.max(1));

        loop {
            let readiness = self.readiness(vcs, proposal).await?;
            let elapsed = started.elapsed();
            if readiness.is_settled() || elapsed >= timeout {
                return Ok(readiness);
            }
            debug!(
                proposal_id = %proposal.id,
                pending = readiness.pending_checks.len(),
                "waiting for checks"
            );
            tokio::time::sleep(interval.min(timeout - elapsed)).await;
        }
    }

    async fn readiness(&self, vcs: &dyn VcsClient, proposal: &Proposal) -> Result<MergeReadiness> {
        let pr = match &proposal.pull_request {
            Some(pr) if !pr.placeholder => pr,
            _ => return Ok(self.local_readiness(proposal)),
        };
        let reviews = vcs.list_reviews(pr.number).await?;
        let checks = vcs.list_check_runs(&proposal.branch).await?;
        Ok(evaluate(
            self.config.required_approvals,
            &local_approvers(proposal),
            &reviews,
            &checks,
        ))
    }

    fn local_readiness(&self, proposal: &Proposal) -> MergeReadiness {
        evaluate(
            self.config.required_approvals,
            &local_approvers(proposal),
            &[],
            &[],
        )
    }

    fn merge_blocked(&self, id: &str, reasons: Vec<String>) -> WorkflowError {
        obs::emit_merge_blocked(id, &reasons);
        self.audit.record(AuditEvent::warn(
            AuditEventKind::MergeBlocked,
            id,
            json!({ "reasons": reasons }),
        ));
        WorkflowError::MergeBlocked {
            id: id.to_string(),
            reasons,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Proposal> {
        self.read().get(id).cloned()
    }

    /// All proposals, oldest first.
    pub fn list(&self) -> Vec<Proposal> {
        self.filtered(|_| true)
    }

    pub fn list_by_status(&self, status: ProposalStatus) -> Vec<Proposal> {
        self.filtered(|p| p.status == status)
    }

    pub fn list_for_issue(&self, issue_id: &str) -> Vec<Proposal> {
        self.filtered(|p| p.issue.id == issue_id)
    }

    fn filtered(&self, keep: impl Fn(&Proposal) -> bool) -> Vec<Proposal> {
        let mut out: Vec<Proposal> = self.read().values().filter(|p| keep(p)).cloned().collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    // ------------------------------------------------------------------
    // VCS plumbing
    // ------------------------------------------------------------------

    async fn open_pull_request(
        &self,
        vcs: &dyn VcsClient,
        proposal: &Proposal,
    ) -> Result<PullRequestRef> {
        let base_sha = vcs.get_ref(&self.config.base_branch).await?;
        vcs.create_branch(&proposal.branch, &base_sha).await?;

        match self.push_and_open(vcs, proposal).await {
            Ok(pr) => {
                info!(proposal_id = %proposal.id, pr = pr.number, url = %pr.url, "pull request opened");
                Ok(pr)
            }
            Err(err) => {
                if let Err(cleanup) = vcs.delete_branch(&proposal.branch).await {
                    warn!(proposal_id = %proposal.id, branch = %proposal.branch, error = %cleanup, "branch cleanup failed");
                }
                Err(err)
            }
        }
    }

    async fn push_and_open(&self, vcs: &dyn VcsClient, proposal: &Proposal) -> Result<PullRequestRef> {
        for change in &proposal.changes {
            let message = change.commit_message(&proposal.id, &proposal.issue.id);
            match change.kind {
                ChangeKind::Create | ChangeKind::Update => {
                    let prior_sha = match (&change.prior_sha, change.kind) {
                        (Some(sha), _) => Some(sha.clone()),
                        (None, ChangeKind::Update) => vcs
                            .get_file(&change.path, &proposal.branch)
                            .await?
                            .map(|f| f.sha),
                        (None, _) => None,
                    };
                    let content = change.content.as_deref().unwrap_or_default();
                    vcs.put_file(
                        &change.path,
                        content,
                        &message,
                        &proposal.branch,
                        prior_sha.as_deref(),
                    )
                    .await?;
                }
                ChangeKind::Delete => {
                    let sha = match &change.prior_sha {
                        Some(sha) => sha.clone(),
                        None => vcs
                            .get_file(&change.path, &proposal.branch)
                            .await?
                            .map(|f| f.sha)
                            .ok_or_else(|| WorkflowError::InvalidChange {
                                path: change.path.clone(),
                                reason: "file does not exist".to_string(),
                            })?,
                    };
                    vcs.delete_file(&change.path, &message, &proposal.branch, &sha)
                        .await?;
                }
            }
            debug!(proposal_id = %proposal.id, path = %change.path, kind = change.kind.as_str(), "change committed");
        }

        let spec = PullRequestSpec {
            title: pr_title(&proposal.issue),
            body: render_description(&proposal.id, &proposal.issue, &proposal.action, &proposal.changes),
            head: proposal.branch.clone(),
            base: self.config.base_branch.clone(),
            draft: false,
        };
        let pr = vcs.create_pull_request(&spec).await?;

        let mut labels = self.config.labels.clone();
        labels.push(format!("guardian:{}", proposal.issue.category.as_str()));
        vcs.add_labels(pr.number, &labels).await?;
        if !proposal.reviewers.is_empty() {
            vcs.request_reviewers(pr.number, &proposal.reviewers).await?;
        }

        Ok(PullRequestRef {
            number: pr.number,
            url: pr.url,
            placeholder: false,
        })
    }

    async fn close_pull_request_quietly(&self, proposal: &Proposal) {
        let (Some(vcs), Some(pr)) = (&self.vcs, &proposal.pull_request) else {
            return;
        };
        if pr.placeholder {
            return;
        }
        if let Err(err) = vcs.close_pull_request(pr.number).await {
            warn!(proposal_id = %proposal.id, pr = pr.number, error = %err, "closing pull request failed");
        }
    }

    // ------------------------------------------------------------------
    // State helpers
    // ------------------------------------------------------------------

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Proposal>> {
        self.proposals.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Proposal>> {
        self.proposals.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn require(&self, id: &str) -> Result<Proposal> {
        self.get(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    /// Compare-and-set: apply `update` only if the proposal is still in
    /// `expected`.
    fn commit(
        &self,
        id: &str,
        expected: ProposalStatus,
        update: impl FnOnce(&mut Proposal) -> Result<()>,
    ) -> Result<Proposal> {
        let mut proposals = self.write();
        let proposal = proposals
            .get_mut(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if proposal.status != expected {
            return Err(WorkflowError::ConcurrentModification {
                id: id.to_string(),
                expected: expected.to_string(),
            });
        }
        update(proposal)?;
        Ok(proposal.clone())
    }

    fn transition(&self, proposal: &mut Proposal, to: ProposalStatus) -> Result<()> {
        let from = proposal.status;
        if !from.can_transition_to(to) {
            return Err(illegal(proposal, to));
        }
        proposal.status = to;
        proposal.updated_at = Utc::now();

        obs::emit_proposal_transition(&proposal.id, from.as_str(), to.as_str());
        self.audit.record(AuditEvent::new(
            AuditEventKind::ProposalTransition,
            &proposal.id,
            json!({
                "from": from,
                "to": to,
                "issue_id": proposal.issue.id,
            }),
        ));
        Ok(())
    }
}

fn local_approvers(proposal: &Proposal) -> Vec<String> {
    proposal
        .approvals
        .iter()
        .map(|a| a.reviewer.clone())
        .collect()
}

fn illegal(proposal: &Proposal, to: ProposalStatus) -> WorkflowError {
    WorkflowError::IllegalTransition {
        id: proposal.id.clone(),
        from: proposal.status.to_string(),
        to: to.to_string(),
    }
}

fn invalid_state(proposal: &Proposal, operation: &str) -> WorkflowError {
    WorkflowError::InvalidState {
        id: proposal.id.clone(),
        status: proposal.status.to_string(),
        operation: operation.to_string(),
    }
}
