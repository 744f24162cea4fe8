//! Tool metadata: identity, version, declared capabilities and checksum.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::domain::error::IntegrityError;
use crate::domain::Scope;

use super::semver::Version;

/// Declared resource footprint of a tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCapabilities {
    /// Logical resources the tool reads (e.g. `Observation`).
    #[serde(default)]
    pub reads: Vec<String>,
    /// Logical resources the tool writes. Wildcards are forbidden.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Outbound endpoints: absolute URLs or `*.suffix` host patterns.
    #[serde(default)]
    pub egress: Vec<String>,
    #[serde(default)]
    pub db_tables: Vec<String>,
    #[serde(default)]
    pub fs_paths: Vec<String>,
}

/// Capability axis, for registry queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Read,
    Write,
    Egress,
    DbTable,
    FsPath,
}

impl ToolCapabilities {
    pub fn entries(&self, kind: CapabilityKind) -> &[String] {
        match kind {
            CapabilityKind::Read => &self.reads,
            CapabilityKind::Write => &self.writes,
            CapabilityKind::Egress => &self.egress,
            CapabilityKind::DbTable => &self.db_tables,
            CapabilityKind::FsPath => &self.fs_paths,
        }
    }

    /// Host patterns derived from the egress entries (`host` or `*.suffix`).
    pub fn egress_domains(&self) -> Vec<String> {
        self.egress.iter().filter_map(|e| egress_host(e)).collect()
    }
}

/// Per-tool execution limits declared at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolLimits {
    pub timeout_ms: u64,
    pub max_concurrency: u32,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_concurrency: 1,
        }
    }
}

/// A registered remediation tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: ToolCapabilities,
    /// Lowercase SHA-256 hex of the tool implementation artifact.
    pub checksum: String,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    pub limits: ToolLimits,
    /// Scopes a token must carry to execute this tool.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    #[serde(default)]
    pub input_schema: Option<String>,
    #[serde(default)]
    pub output_schema: Option<String>,
}

impl ToolMetadata {
    /// Run the registration checks: checksum, semver, capabilities, scopes.
    pub fn validate(&self) -> Result<(), IntegrityError> {
        if self.id.trim().is_empty() {
            return Err(IntegrityError::InvalidCapability {
                tool_id: self.id.clone(),
                reason: "tool id must not be empty".into(),
            });
        }

        if !is_valid_checksum(&self.checksum) {
            return Err(IntegrityError::MalformedChecksum {
                len: self.checksum.len(),
            });
        }

        if Version::parse(&self.version).is_none() {
            return Err(IntegrityError::InvalidVersion {
                version: self.version.clone(),
            });
        }

        self.validate_capabilities()?;

        for scope in &self.required_scopes {
            if Scope::parse(scope).is_none() {
                return Err(self.capability_error(format!("invalid required scope '{scope}'")));
            }
        }

        if self.limits.max_concurrency == 0 || self.limits.timeout_ms == 0 {
            return Err(self.capability_error("limits must be non-zero".into()));
        }

        Ok(())
    }

    fn validate_capabilities(&self) -> Result<(), IntegrityError> {
        let caps = &self.capabilities;

        for write in &caps.writes {
            if write.contains('*') {
                return Err(self.capability_error(format!("wildcard write '{write}' is forbidden")));
            }
        }

        for kind in [
            CapabilityKind::Read,
            CapabilityKind::Write,
            CapabilityKind::DbTable,
            CapabilityKind::FsPath,
        ] {
            if caps.entries(kind).iter().any(|e| e.trim().is_empty()) {
                return Err(self.capability_error(format!("empty {kind:?} entry")));
            }
        }

        for entry in &caps.egress {
            if egress_host(entry).is_none() {
                return Err(self.capability_error(format!("egress entry '{entry}' is not a URL")));
            }
        }

        Ok(())
    }

    fn capability_error(&self, reason: String) -> IntegrityError {
        IntegrityError::InvalidCapability {
            tool_id: self.id.clone(),
            reason,
        }
    }

    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version)
    }
}

/// 64 lowercase-or-uppercase hex characters.
pub fn is_valid_checksum(checksum: &str) -> bool {
    checksum.len() == 64 && checksum.chars().all(|c| c.is_ascii_hexdigit())
}

/// SHA-256 hex digest of a tool artifact.
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Host pattern for an egress entry: the URL host, or `*.suffix` kept as is.
fn egress_host(entry: &str) -> Option<String> {
    if let Some(suffix) = entry.strip_prefix("*.") {
        let url = Url::parse(&format!("https://{suffix}")).ok()?;
        let host = url.host_str()?;
        if host != suffix.to_ascii_lowercase() {
            return None;
        }
        return Some(format!("*.{host}"));
    }
    let url = Url::parse(entry).ok()?;
    url.host_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tool(id: &str) -> ToolMetadata {
        ToolMetadata {
            id: id.into(),
            name: format!("{id} tool"),
            version: "1.0.0".into(),
            description: String::new(),
            capabilities: ToolCapabilities {
                reads: vec!["Observation".into()],
                writes: vec!["Observation".into()],
                egress: vec!["https://api.example.com/v1".into(), "*.fhir.org".into()],
                db_tables: vec!["observations".into()],
                fs_paths: vec!["/tmp/guardian".into()],
            },
            checksum: compute_checksum(id.as_bytes()),
            approved: false,
            limits: ToolLimits::default(),
            required_scopes: vec!["fhir.read:Observation".into()],
            input_schema: None,
            output_schema: None,
        }
    }

    #[test]
    fn test_valid_tool_passes() {
        assert!(sample_tool("fixer").validate().is_ok());
    }

    #[test]
    fn test_short_checksum_rejected() {
        let mut tool = sample_tool("fixer");
        tool.checksum = "abcdef0123".into();
        assert_eq!(
            tool.validate(),
            Err(IntegrityError::MalformedChecksum { len: 10 })
        );
    }

    #[test]
    fn test_non_hex_checksum_rejected() {
        let mut tool = sample_tool("fixer");
        tool.checksum = "z".repeat(64);
        assert!(matches!(
            tool.validate(),
            Err(IntegrityError::MalformedChecksum { len: 64 })
        ));
    }

    #[test]
    fn test_bad_semver_rejected() {
        let mut tool = sample_tool("fixer");
        tool.version = "1.0".into();
        assert!(matches!(
            tool.validate(),
            Err(IntegrityError::InvalidVersion { .. })
        ));
    }

    #[test]
    fn test_wildcard_write_rejected() {
        let mut tool = sample_tool("fixer");
        tool.capabilities.writes.push("*".into());
        let err = tool.validate().unwrap_err();
        assert!(err.to_string().contains("wildcard"));
    }

    #[test]
    fn test_bad_egress_rejected() {
        let mut tool = sample_tool("fixer");
        tool.capabilities.egress = vec!["not a url".into()];
        assert!(matches!(
            tool.validate(),
            Err(IntegrityError::InvalidCapability { .. })
        ));
    }

    #[test]
    fn test_egress_domains() {
        let tool = sample_tool("fixer");
        assert_eq!(
            tool.capabilities.egress_domains(),
            vec!["api.example.com".to_string(), "*.fhir.org".to_string()]
        );
    }

    #[test]
    fn test_invalid_required_scope_rejected() {
        let mut tool = sample_tool("fixer");
        tool.required_scopes = vec!["everything".into()];
        assert!(tool.validate().is_err());
    }

    #[test]
    fn test_compute_checksum_is_sha256() {
        assert_eq!(
            compute_checksum(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
