//! GitHub REST implementation of [`VcsClient`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{
    CheckRun, FileContent, MergeMethod, PullRequest, PullRequestSpec, PullRequestState, Review,
    ReviewState, VcsClient, VcsError, VcsResult,
};

/// REST API version sent with every request.
pub const GITHUB_API_VERSION: &str = "2022-11-28";

const DEFAULT_API_BASE: &str = "https://api.github.com";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    /// Bearer token with contents and pull-request write access.
    pub token: String,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base: default_api_base(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo,
            suffix.trim_start_matches('/')
        )
    }
}

pub struct GitHubClient {
    config: GitHubConfig,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> VcsResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("guardian/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| VcsError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn request(&self, method: Method, suffix: &str) -> RequestBuilder {
        self.http
            .request(method, self.config.repo_url(suffix))
            .bearer_auth(&self.config.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> VcsResult<reqwest::Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| VcsError::Transport(e.to_string()))?;
        let status = response.status();
        debug!(status = status.as_u16(), what, "github response");
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => VcsError::NotFound(what.to_string()),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                VcsError::Conflict(format!("{what}: {}", api_message(&message)))
            }
            _ => VcsError::Api {
                status: status.as_u16(),
                message: api_message(&message),
            },
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder, what: &str) -> VcsResult<T> {
        self.send(builder, what)
            .await?
            .json::<T>()
            .await
            .map_err(|e| VcsError::Decode(format!("{what}: {e}")))
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("api_base", &self.config.api_base)
            .field("owner", &self.config.owner)
            .field("repo", &self.config.repo)
            .finish_non_exhaustive()
    }
}

/// The `message` field of a GitHub error body, or the raw body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

// ---- Wire types -----------------------------------------------------------

#[derive(Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Deserialize)]
struct GitRef {
    object: RefObject,
}

#[derive(Deserialize)]
struct ContentsFile {
    path: String,
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct ContentsWrite {
    content: ContentsWriteFile,
}

#[derive(Deserialize)]
struct ContentsWriteFile {
    sha: String,
}

#[derive(Deserialize)]
struct PullHead {
    sha: String,
}

#[derive(Deserialize)]
struct Pull {
    number: u64,
    html_url: String,
    state: String,
    #[serde(default)]
    merged: bool,
    head: Option<PullHead>,
    mergeable: Option<bool>,
}

impl From<Pull> for PullRequest {
    fn from(p: Pull) -> Self {
        let state = match (p.merged, p.state.as_str()) {
            (true, _) => PullRequestState::Merged,
            (false, "open") => PullRequestState::Open,
            _ => PullRequestState::Closed,
        };
        Self {
            number: p.number,
            url: p.html_url,
            state,
            head_sha: p.head.map(|h| h.sha),
            mergeable: p.mergeable,
        }
    }
}

#[derive(Deserialize)]
struct MergeResult {
    sha: String,
}

#[derive(Deserialize)]
struct CheckRuns {
    check_runs: Vec<CheckRun>,
}

#[derive(Deserialize)]
struct ReviewUser {
    login: String,
}

#[derive(Deserialize)]
struct WireReview {
    user: Option<ReviewUser>,
    state: ReviewState,
}

fn decode_content(file: &ContentsFile) -> VcsResult<String> {
    if file.encoding != "base64" {
        return Ok(file.content.clone());
    }
    let compact: String = file.content.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| VcsError::Decode(format!("{}: {e}", file.path)))?;
    String::from_utf8(bytes).map_err(|e| VcsError::Decode(format!("{}: {e}", file.path)))
}

#[async_trait]
impl VcsClient for GitHubClient {
    async fn get_ref(&self, branch: &str) -> VcsResult<String> {
        let git_ref: GitRef = self
            .send_json(
                self.request(Method::GET, &format!("git/ref/heads/{branch}")),
                &format!("branch {branch}"),
            )
            .await?;
        Ok(git_ref.object.sha)
    }

    async fn create_branch(&self, branch: &str, from_sha: &str) -> VcsResult<()> {
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": from_sha });
        self.send(
            self.request(Method::POST, "git/refs").json(&body),
            &format!("create branch {branch}"),
        )
        .await?;
        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> VcsResult<()> {
        self.send(
            self.request(Method::DELETE, &format!("git/refs/heads/{branch}")),
            &format!("branch {branch}"),
        )
        .await?;
        Ok(())
    }

    async fn get_file(&self, path: &str, branch: &str) -> VcsResult<Option<FileContent>> {
        let builder = self
            .request(Method::GET, &format!("contents/{path}"))
            .query(&[("ref", branch)]);
        let file: ContentsFile = match self.send_json(builder, &format!("file {path}")).await {
            Ok(file) => file,
            Err(VcsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let content = decode_content(&file)?;
        Ok(Some(FileContent {
            path: file.path,
            content,
            sha: file.sha,
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
        let mut body = json!({
            "message": message,
            "content": STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = prior_sha {
            body["sha"] = json!(sha);
        }
        let written: ContentsWrite = self
            .send_json(
                self.request(Method::PUT, &format!("contents/{path}")).json(&body),
                &format!("write {path}"),
            )
            .await?;
        Ok(written.content.sha)
    }

    async fn delete_file(
        &self,
        path: &str,
        message: &str,
        branch: &str,
        sha: &str,
    ) -> VcsResult<()> {
        let body = json!({ "message": message, "branch": branch, "sha": sha });
        self.send(
            self.request(Method::DELETE, &format!("contents/{path}")).json(&body),
            &format!("delete {path}"),
        )
        .await?;
        Ok(())
    }

    async fn create_pull_request(&self, spec: &PullRequestSpec) -> VcsResult<PullRequest> {
        let pull: Pull = self
            .send_json(
                self.request(Method::POST, "pulls").json(spec),
                &format!("pull request from {}", spec.head),
            )
            .await?;
        Ok(pull.into())
    }

    async fn get_pull_request(&self, number: u64) -> VcsResult<PullRequest> {
        let pull: Pull = self
            .send_json(
                self.request(Method::GET, &format!("pulls/{number}")),
                &format!("pull request #{number}"),
            )
            .await?;
        Ok(pull.into())
    }

    async fn merge_pull_request(
        &self,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> VcsResult<String> {
        let body = json!({ "merge_method": method.as_str(), "commit_title": commit_title });
        let merged: MergeResult = self
            .send_json(
                self.request(Method::PUT, &format!("pulls/{number}/merge")).json(&body),
                &format!("merge #{number}"),
            )
            .await?;
        Ok(merged.sha)
    }

    async fn close_pull_request(&self, number: u64) -> VcsResult<()> {
        self.send(
            self.request(Method::PATCH, &format!("pulls/{number}"))
                .json(&json!({ "state": "closed" })),
            &format!("pull request #{number}"),
        )
        .await?;
        Ok(())
    }

    async fn list_check_runs(&self, git_ref: &str) -> VcsResult<Vec<CheckRun>> {
        let runs: CheckRuns = self
            .send_json(
                self.request(Method::GET, &format!("commits/{git_ref}/check-runs")),
                &format!("check runs for {git_ref}"),
            )
            .await?;
        Ok(runs.check_runs)
    }

    async fn list_reviews(&self, number: u64) -> VcsResult<Vec<Review>> {
        let reviews: Vec<WireReview> = self
            .send_json(
                self.request(Method::GET, &format!("pulls/{number}/reviews")),
                &format!("reviews for #{number}"),
            )
            .await?;
        Ok(reviews
            .into_iter()
            .map(|r| Review {
                reviewer: r.user.map(|u| u.login).unwrap_or_default(),
                state: r.state,
            })
            .collect())
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> VcsResult<()> {
        if labels.is_empty() {
            return Ok(());
        }
        self.send(
            self.request(Method::POST, &format!("issues/{number}/labels"))
                .json(&json!({ "labels": labels })),
            &format!("labels for #{number}"),
        )
        .await?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> VcsResult<()> {
        if reviewers.is_empty() {
            return Ok(());
        }
        self.send(
            self.request(Method::POST, &format!("pulls/{number}/requested_reviewers"))
                .json(&json!({ "reviewers": reviewers })),
            &format!("reviewers for #{number}"),
        )
        .await?;
        Ok(())
    }
}
