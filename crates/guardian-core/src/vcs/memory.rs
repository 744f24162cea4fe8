//! In-memory [`VcsClient`] for tests and local runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{
    CheckRun, FileContent, MergeMethod, PullRequest, PullRequestSpec, PullRequestState, Review,
    VcsClient, VcsError, VcsResult,
};

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Default)]
struct Branch {
    head: String,
    /// path -> (content, blob sha)
    files: BTreeMap<String, (String, String)>,
}

/// A pull request as the fake host stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPullRequest {
    pub spec: PullRequestSpec,
    pub state: PullRequestState,
    pub labels: Vec<String>,
    pub reviewers: Vec<String>,
    pub merge_method: Option<MergeMethod>,
}

/// A commit recorded by the fake host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub branch: String,
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Default)]
struct State {
    branches: HashMap<String, Branch>,
    pulls: BTreeMap<u64, StoredPullRequest>,
    next_pull: u64,
    checks: HashMap<String, Vec<CheckRun>>,
    reviews: HashMap<u64, Vec<Review>>,
    commits: Vec<Commit>,
}

impl State {
    fn branch_mut(&mut self, name: &str) -> VcsResult<&mut Branch> {
        self.branches
            .get_mut(name)
            .ok_or_else(|| VcsError::NotFound(format!("branch {name}")))
    }

    fn pull_mut(&mut self, number: u64) -> VcsResult<&mut StoredPullRequest> {
        self.pulls
            .get_mut(&number)
            .ok_or_else(|| VcsError::NotFound(format!("pull request #{number}")))
    }

    fn commit(&mut self, branch: &str, message: &str) -> VcsResult<String> {
        let parent = self.branch_mut(branch)?.head.clone();
        let sha = digest(&[parent.as_str(), branch, message]);
        self.branch_mut(branch)?.head = sha.clone();
        self.commits.push(Commit {
            branch: branch.to_string(),
            sha: sha.clone(),
            message: message.to_string(),
        });
        Ok(sha)
    }
}

/// Single-repository host kept in memory. Starts with one empty base branch.
#[derive(Debug)]
pub struct MemoryVcs {
    base_branch: String,
    state: Mutex<State>,
}

impl Default for MemoryVcs {
    fn default() -> Self {
        Self::new("main")
    }
}

impl MemoryVcs {
    pub fn new(base_branch: impl Into<String>) -> Self {
        let base_branch = base_branch.into();
        let mut state = State {
            next_pull: 1,
            ..State::default()
        };
        state.branches.insert(
            base_branch.clone(),
            Branch {
                head: digest(&["root", base_branch.as_str()]),
                files: BTreeMap::new(),
            },
        );
        Self {
            base_branch,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Seed a file on the base branch.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        {
            let mut state = self.lock();
            if let Some(base) = state.branches.get_mut(&self.base_branch) {
                base.files
                    .insert(path.to_string(), (content.to_string(), digest(&[content])));
            }
        }
        self
    }

    pub fn set_check_runs(&self, git_ref: &str, runs: Vec<CheckRun>) {
        self.lock().checks.insert(git_ref.to_string(), runs);
    }

    pub fn add_review(&self, number: u64, review: Review) {
        self.lock().reviews.entry(number).or_default().push(review);
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.lock().branches.contains_key(branch)
    }

    pub fn file(&self, branch: &str, path: &str) -> Option<String> {
        self.lock()
            .branches
            .get(branch)
            .and_then(|b| b.files.get(path))
            .map(|(content, _)| content.clone())
    }

    pub fn commits(&self) -> Vec<Commit> {
        self.lock().commits.clone()
    }

    pub fn pull_request(&self, number: u64) -> Option<StoredPullRequest> {
        self.lock().pulls.get(&number).cloned()
    }
}

#[async_trait]
impl VcsClient for MemoryVcs {
    async fn get_ref(&self, branch: &str) -> VcsResult<String> {
        Ok(self.lock().branch_mut(branch)?.head.clone())
    }

    async fn create_branch(&self, branch: &str, from_sha: &str) -> VcsResult<()> {
        let mut state = self.lock();
        if state.branches.contains_key(branch) {
            return Err(VcsError::Conflict(format!("branch {branch} already exists")));
        }
        let source = state
            .branches
            .values()
            .find(|b| b.head == from_sha)
            .cloned()
            .ok_or_else(|| VcsError::NotFound(format!("commit {from_sha}")))?;
        state.branches.insert(branch.to_string(), source);
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> VcsResult<()> {
        self.lock()
            .branches
            .remove(branch)
            .map(|_| ())
            .ok_or_else(|| VcsError::NotFound(format!("branch {branch}")))
    }

    async fn get_file(&self, path: &str, branch: &str) -> VcsResult<Option<FileContent>> {
        let mut state = self.lock();
        Ok(state
            .branch_mut(branch)?
            .files
            .get(path)
            .map(|(content, sha)| FileContent {
                path: path.to_string(),
                content: content.clone(),
                sha: sha.clone(),
            }))
    }

    async fn put_file(
        &self,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        prior_sha: Option<&str>,
    ) -> VcsResult<String> {
        let mut state = self.lock();
        let files = &mut state.branch_mut(branch)?.files;
        match (files.get(path), prior_sha) {
            (Some((_, current)), Some(prior)) if current != prior => {
                return Err(VcsError::Conflict(format!(
                    "{path} changed: expected {prior}, found {current}"
                )));
            }
            (Some(_), None) => {
                return Err(VcsError::Conflict(format!("{path} exists; sha required")));
            }
            (None, Some(_)) => {
                return Err(VcsError::NotFound(format!("file {path}")));
            }
            _ => {}
        }
        let sha = digest(&[content]);
        files.insert(path.to_string(), (content.to_string(), sha.clone()));
        state.commit(branch, message)?;
        Ok(sha)
    }

    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        branch: &str,
        sha: &str,
    ) -> VcsResult<()> {
        let mut state = self.lock();
        let files = &mut state.branch_mut(branch)?.files;
        match files.get(path) {
            None => return Err(VcsError::NotFound(format!("file {path}"))),
            Some((_, current)) if current != sha => {
                return Err(VcsError::Conflict(format!(
                    "{path} changed: expected {sha}, found {current}"
                )));
            }
            Some(_) => {}
        }
        files.remove(path);
        state.commit(branch, message)?;
        Ok(())
    }

    async fn create_pull_request(&self, spec: &PullRequestSpec) -> VcsResult<PullRequest> {
        let mut state = self.lock();
        for name in [&spec.head, &spec.base] {
            if !state.branches.contains_key(name.as_str()) {
                return Err(VcsError::NotFound(format!("branch {name}")));
            }
        }
        let number = state.next_pull;
        state.next_pull += 1;
        let head_sha = state.branch_mut(&spec.head)?.head.clone();
        state.pulls.insert(
            number,
            StoredPullRequest {
                spec: spec.clone(),
                state: PullRequestState::Open,
                labels: Vec::new(),
                reviewers: Vec::new(),
                merge_method: None,
            },
        );
        Ok(PullRequest {
            number,
            url: format!("memory://pulls/{number}"),
            state: PullRequestState::Open,
            head_sha: Some(head_sha),
            mergeable: Some(true),
        })
    }

    async fn get_pull_request(&self, number: u64) -> VcsResult<PullRequest> {
        let mut state = self.lock();
        let pull = state.pull_mut(number)?.clone();
        let head_sha = state.branches.get(&pull.spec.head).map(|b| b.head.clone());
        Ok(PullRequest {
            number,
            url: format!("memory://pulls/{number}"),
            state: pull.state,
            head_sha,
            mergeable: Some(pull.state == PullRequestState::Open),
        })
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> VcsResult<String> {
        let mut state = self.lock();
        let pull = state.pull_mut(number)?;
        if pull.state != PullRequestState::Open {
            return Err(VcsError::Conflict(format!("pull request #{number} is not open")));
        }
        pull.state = PullRequestState::Merged;
        pull.merge_method = Some(method);
        let (head, base) = (pull.spec.head.clone(), pull.spec.base.clone());

        let files = state.branch_mut(&head)?.files.clone();
        state.branch_mut(&base)?.files = files;
        state.commit(&base, commit_title)
    }

    async fn close_pull_request(&self, number: u64) -> VcsResult<()> {
        let mut state = self.lock();
        let pull = state.pull_mut(number)?;
        if pull.state == PullRequestState::Merged {
            return Err(VcsError::Conflict(format!("pull request #{number} is merged")));
        }
        pull.state = PullRequestState::Closed;
        Ok(())
    }

    async fn list_check_runs(&self, git_ref: &str) -> VcsResult<Vec<CheckRun>> {
        Ok(self.lock().checks.get(git_ref).cloned().unwrap_or_default())
    }

    async fn list_reviews(&self, number: u64) -> VcsResult<Vec<Review>> {
        let mut state = self.lock();
        state.pull_mut(number)?;
        Ok(state.reviews.get(&number).cloned().unwrap_or_default())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> VcsResult<()> {
        let mut state = self.lock();
        let pull = state.pull_mut(number)?;
        for label in labels {
            if !pull.labels.contains(label) {
                pull.labels.push(label.clone());
            }
        }
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> VcsResult<()> {
        let mut state = self.lock();
        let pull = state.pull_mut(number)?;
        for reviewer in reviewers {
            if !pull.reviewers.contains(reviewer) {
                pull.reviewers.push(reviewer.clone());
            }
        }
        Ok(())
    }
}
