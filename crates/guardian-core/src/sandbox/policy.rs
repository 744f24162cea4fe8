//! Per-tool execution policy: allow-lists and resource ceilings.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::registry::ToolMetadata;

/// Limits and allow-lists the sandbox enforces for one tool.
///
/// A tool without a policy cannot execute. Defaults are restrictive: empty
/// allow-lists with both isolation flags on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionPolicy {
    /// Hosts reachable through the guarded HTTP client: exact or `*.suffix`.
    pub allowed_domains: Vec<String>,
    pub allowed_tables: Vec<String>,
    /// Path prefixes reachable through the file-system gate.
    pub allowed_paths: Vec<String>,
    pub max_concurrency: u32,
    pub max_executions_per_minute: u32,
    pub max_payload_bytes: usize,
    pub max_response_bytes: usize,
    pub max_execution_time_ms: u64,
    pub network_isolation: bool,
    pub fs_isolation: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            allowed_domains: Vec::new(),
            allowed_tables: Vec::new(),
            allowed_paths: Vec::new(),
            max_concurrency: 1,
            max_executions_per_minute: 10,
            max_payload_bytes: 1024 * 1024,
            max_response_bytes: 5 * 1024 * 1024,
            max_execution_time_ms: 30_000,
            network_isolation: true,
            fs_isolation: true,
        }
    }
}

impl ExecutionPolicy {
    /// Policy derived from a tool's declared capabilities and limits.
    pub fn for_tool(tool: &ToolMetadata) -> Self {
        Self {
            allowed_domains: tool.capabilities.egress_domains(),
            allowed_tables: tool.capabilities.db_tables.clone(),
            allowed_paths: tool.capabilities.fs_paths.clone(),
            max_concurrency: tool.limits.max_concurrency,
            max_execution_time_ms: tool.limits.timeout_ms,
            ..Self::default()
        }
    }

    pub fn with_domains<const N: usize>(mut self, domains: [&str; N]) -> Self {
        self.allowed_domains = domains.iter().map(|d| (*d).to_string()).collect();
        self
    }

    pub fn with_tables<const N: usize>(mut self, tables: [&str; N]) -> Self {
        self.allowed_tables = tables.iter().map(|t| (*t).to_string()).collect();
        self
    }

    pub fn with_paths<const N: usize>(mut self, paths: [&str; N]) -> Self {
        self.allowed_paths = paths.iter().map(|p| (*p).to_string()).collect();
        self
    }

    pub fn with_rate_limit(mut self, per_minute: u32) -> Self {
        self.max_executions_per_minute = per_minute;
        self
    }

    pub fn with_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.max_execution_time_ms = ms;
        self
    }

    pub fn with_payload_limit(mut self, bytes: usize) -> Self {
        self.max_payload_bytes = bytes;
        self
    }

    pub fn with_response_limit(mut self, bytes: usize) -> Self {
        self.max_response_bytes = bytes;
        self
    }

    pub fn allows_domain(&self, host: &str) -> bool {
        !self.network_isolation || domain_allowed(&self.allowed_domains, host)
    }

    pub fn allows_table(&self, table: &str) -> bool {
        self.allowed_tables.iter().any(|t| t == table)
    }

    pub fn allows_path(&self, path: &str) -> bool {
        !self.fs_isolation || path_allowed(&self.allowed_paths, path)
    }
}

/// Exact host match, or `*.suffix` matching any strict subdomain of `suffix`.
///
/// The apex itself does not match a wildcard entry.
pub fn domain_allowed(allow_list: &[String], host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return false;
    }
    allow_list.iter().any(|entry| {
        let entry = entry.to_ascii_lowercase();
        match entry.strip_prefix("*.") {
            Some(suffix) => host
                .strip_suffix(suffix)
                .is_some_and(|head| head.len() > 1 && head.ends_with('.')),
            None => host == entry,
        }
    })
}

/// Component-wise prefix match; any `..` component is refused.
pub fn path_allowed(allow_list: &[String], path: &str) -> bool {
    let candidate = Path::new(path);
    if candidate
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }
    allow_list
        .iter()
        .any(|prefix| candidate.starts_with(Path::new(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_exact_and_wildcard_domains() {
        let allow = list(&["api.example.com", "*.fhir.org"]);
        assert!(domain_allowed(&allow, "api.example.com"));
        assert!(domain_allowed(&allow, "API.Example.com."));
        assert!(domain_allowed(&allow, "r4.fhir.org"));
        assert!(domain_allowed(&allow, "a.b.fhir.org"));
        assert!(!domain_allowed(&allow, "fhir.org"));
        assert!(!domain_allowed(&allow, "evilfhir.org"));
        assert!(!domain_allowed(&allow, "example.com"));
        assert!(!domain_allowed(&allow, "api.example.com.evil.net"));
        assert!(!domain_allowed(&allow, ""));
    }

    #[test]
    fn test_paths() {
        let allow = list(&["/var/guardian/reports"]);
        assert!(path_allowed(&allow, "/var/guardian/reports/a.json"));
        assert!(path_allowed(&allow, "/var/guardian/reports"));
        assert!(!path_allowed(&allow, "/var/guardian/reports-old/a.json"));
        assert!(!path_allowed(&allow, "/var/guardian/reports/../secrets"));
        assert!(!path_allowed(&allow, "/etc/passwd"));
    }

    #[test]
    fn test_isolation_flags() {
        let mut policy = ExecutionPolicy::default();
        assert!(!policy.allows_domain("example.com"));
        policy.network_isolation = false;
        assert!(policy.allows_domain("example.com"));

        assert!(!policy.allows_path("/tmp/x"));
        policy.fs_isolation = false;
        assert!(policy.allows_path("/tmp/x"));

        // Tables have no isolation switch.
        assert!(!policy.allows_table("patients"));
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: ExecutionPolicy = toml::from_str(
            r#"
            allowed_domains = ["*.fhir.org"]
            max_executions_per_minute = 3
            "#,
        )
        .unwrap();
        assert_eq!(policy.max_executions_per_minute, 3);
        assert_eq!(policy.max_concurrency, 1);
        assert!(policy.network_isolation);
    }
}
