//! Guardian configuration.
//!
//! Loaded from TOML, then overridden by `GUARDIAN_*` environment variables.
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::auth::{TokenConfig, MAX_TTL_SECS, MIN_TTL_SECS};
use crate::propose::WorkflowConfig;
use crate::telemetry::parse_level;
use crate::vcs::GitHubConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// `[telemetry]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    pub level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    pub fn level(&self) -> Level {
        parse_level(&self.level)
    }
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardianConfig {
    pub token: TokenConfig,
    pub workflow: WorkflowConfig,
    /// Repository host. Absent means proposals run in dry-run mode.
    pub vcs: Option<GitHubConfig>,
    pub telemetry: TelemetryConfig,
    /// Hex-encoded Ed25519 secret. A fresh key is generated when absent.
    pub signing_key_hex: Option<String>,
}

impl std::fmt::Debug for GuardianConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardianConfig")
            .field("token", &self.token)
            .field("workflow", &self.workflow)
            .field("vcs", &self.vcs)
            .field("telemetry", &self.telemetry)
            .field(
                "signing_key_hex",
                &self.signing_key_hex.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl GuardianConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default()
            .with_env_overrides(|key| std::env::var(key).ok())
            .validate()
    }

    /// Apply `GUARDIAN_*` overrides read through `lookup`.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GUARDIAN_TOKEN_ISSUER") {
            self.token.issuer = v;
        }
        if let Some(v) = get("GUARDIAN_TOKEN_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.token.ttl_secs = v;
        }
        if let Some(v) = get("GUARDIAN_TOKEN_REFRESH_RATIO").and_then(|v| v.parse().ok()) {
            self.token.refresh_ratio = v;
        }
        if let Some(v) = get("GUARDIAN_SIGNING_KEY") {
            self.signing_key_hex = Some(v);
        }

        if let Some(v) = get("GUARDIAN_BASE_BRANCH") {
            self.workflow.base_branch = v;
        }
        if let Some(v) = get("GUARDIAN_REQUIRED_APPROVALS").and_then(|v| v.parse().ok()) {
            self.workflow.required_approvals = v;
        }
        if let Some(v) = get("GUARDIAN_REVIEWERS") {
            self.workflow.reviewers = split_list(&v);
        }
        if let Some(v) = get("GUARDIAN_LABELS") {
            self.workflow.labels = split_list(&v);
        }

        if let (Some(owner), Some(repo), Some(token)) = (
            get("GUARDIAN_GITHUB_OWNER"),
            get("GUARDIAN_GITHUB_REPO"),
            get("GUARDIAN_GITHUB_TOKEN"),
        ) {
            let mut github = GitHubConfig::new(owner, repo, token);
            if let Some(base) = get("GUARDIAN_GITHUB_API") {
                github = github.with_api_base(base);
            }
            self.vcs = Some(github);
        } else if let (Some(github), Some(token)) = (self.vcs.as_mut(), get("GUARDIAN_GITHUB_TOKEN")) {
            github.token = token;
        }

        if let Some(v) = get("GUARDIAN_LOG_JSON") {
            self.telemetry.json = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("GUARDIAN_LOG_LEVEL") {
            self.telemetry.level = v;
        }
        self
    }

    /// Clamp recoverable values and reject the rest.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        let ttl = self.token.ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        if ttl != self.token.ttl_secs {
            tracing::warn!(
                requested = self.token.ttl_secs,
                clamped = ttl,
                "token TTL outside allowed range"
            );
            self.token.ttl_secs = ttl;
        }
        if self.token.issuer.trim().is_empty() {
            return Err(invalid("token.issuer", "must not be empty"));
        }
        if self.workflow.required_approvals == 0 {
            return Err(invalid("workflow.required_approvals", "must be at least 1"));
        }
        if self.workflow.base_branch.trim().is_empty() {
            return Err(invalid("workflow.base_branch", "must not be empty"));
        }
        if self.workflow.check_poll_interval_ms == 0 {
            return Err(invalid("workflow.check_poll_interval_ms", "must be positive"));
        }
        if let Some(vcs) = &self.vcs {
            for (key, value) in [
                ("vcs.owner", &vcs.owner),
                ("vcs.repo", &vcs.repo),
                ("vcs.token", &vcs.token),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(key, "must not be empty"));
                }
            }
            if url::Url::parse(&vcs.api_base).is_err() {
                return Err(invalid("vcs.api_base", "not a valid URL"));
            }
        }
        if !matches!(
            self.telemetry.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(invalid(
                "telemetry.level",
                "expected trace, debug, info, warn or error",
            ));
        }
        Ok(self)
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
