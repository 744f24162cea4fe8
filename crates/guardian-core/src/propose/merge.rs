//! Merge gating against host-side reviews and CI check runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::vcs::{CheckConclusion, CheckRun, Review, ReviewState};

/// Itemized answer to "can this pull request merge now?".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReadiness {
    /// Conditions that polling cannot fix.
    pub blocking: Vec<String>,
    /// Checks that have not completed yet.
    pub pending_checks: Vec<String>,
    pub approvals: usize,
    pub checks: Vec<CheckRun>,
}

impl MergeReadiness {
    pub fn is_ready(&self) -> bool {
        self.blocking.is_empty() && self.pending_checks.is_empty()
    }

    /// Whether waiting could still change the answer.
    pub fn is_settled(&self) -> bool {
        !self.blocking.is_empty() || self.pending_checks.is_empty()
    }

    /// Blocking reasons followed by one line per pending check.
    pub fn reasons(&self) -> Vec<String> {
        let mut reasons = self.blocking.clone();
        reasons.extend(
            self.pending_checks
                .iter()
                .map(|name| format!("check '{name}' has not completed")),
        );
        reasons
    }
}

/// Evaluate merge readiness.
///
/// Approvals are counted over distinct reviewers from `local_approvals` and
/// the latest host review of each reviewer. A reviewer whose latest host
/// review requests changes blocks the merge even if they approved locally.
pub fn evaluate(
    required_approvals: usize,
    local_approvals: &[String],
    reviews: &[Review],
    checks: &[CheckRun],
) -> MergeReadiness {
    let mut latest: BTreeMap<&str, ReviewState> = BTreeMap::new();
    for review in reviews {
        // Comments do not change a reviewer's standing.
        if matches!(review.state, ReviewState::Commented | ReviewState::Pending) {
            continue;
        }
        latest.insert(review.reviewer.as_str(), review.state);
    }

    let mut blocking = Vec::new();
    let changes_requested: Vec<&str> = latest
        .iter()
        .filter(|(_, state)| **state == ReviewState::ChangesRequested)
        .map(|(reviewer, _)| *reviewer)
        .collect();
    for reviewer in &changes_requested {
        blocking.push(format!("{reviewer} requested changes"));
    }

    let mut approvers: Vec<&str> = local_approvals
        .iter()
        .map(String::as_str)
        .filter(|r| !changes_requested.contains(r))
        .collect();
    for (reviewer, state) in &latest {
        if *state == ReviewState::Approved && !approvers.contains(reviewer) {
            approvers.push(reviewer);
        }
    }
    let approvals = approvers.len();
    if approvals < required_approvals {
        blocking.push(format!(
            "needs {required_approvals} approval(s), has {approvals}"
        ));
    }

    let mut pending_checks = Vec::new();
    for check in checks {
        if !check.is_complete() {
            pending_checks.push(check.name.clone());
        } else if !check.is_passing() {
            let conclusion = check
                .conclusion
                .map_or("unknown", CheckConclusion::as_str);
            blocking.push(format!("check '{}' concluded {conclusion}", check.name));
        }
    }

    MergeReadiness {
        blocking,
        pending_checks,
        approvals,
        checks: checks.to_vec(),
    }
}
