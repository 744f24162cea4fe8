//! In-memory tool catalog: the "can this tool exist" gate.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::audit::{AuditEvent, AuditEventKind, AuditSink};
use crate::domain::error::IntegrityError;

use super::tool::{CapabilityKind, ToolMetadata};

/// Catalog of registered tools.
///
/// Registration validates eagerly and leaves the catalog untouched on
/// failure. Read queries never fail; unknown ids yield `None`, `false` or an
/// empty list.
pub struct ToolRegistry {
    tools: HashMap<String, ToolMetadata>,
    history: HashMap<String, Vec<ToolMetadata>>,
    audit: Arc<dyn AuditSink>,
}

impl ToolRegistry {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            tools: HashMap::new(),
            history: HashMap::new(),
            audit,
        }
    }

    /// Register a tool, or a new version of an existing tool.
    ///
    /// # Errors
    ///
    /// Returns `IntegrityError::MalformedChecksum`, `InvalidVersion` or
    /// `InvalidCapability` when the metadata is malformed, and
    /// `DuplicateVersion` when this (id, version) pair was seen before.
    pub fn register(&mut self, metadata: ToolMetadata) -> Result<(), IntegrityError> {
        metadata.validate()?;

        if self
            .versions(&metadata.id)
            .iter()
            .any(|v| v == &metadata.version)
        {
            return Err(IntegrityError::DuplicateVersion {
                tool_id: metadata.id,
                version: metadata.version,
            });
        }

        if let Some(previous) = self.tools.remove(&metadata.id) {
            self.history
                .entry(metadata.id.clone())
                .or_default()
                .push(previous);
        }

        self.audit.record(AuditEvent::new(
            AuditEventKind::ToolRegistered,
            &metadata.id,
            json!({
                "version": metadata.version,
                "checksum": metadata.checksum,
                "approved": metadata.approved,
            }),
        ));
        tracing::info!(tool_id = %metadata.id, version = %metadata.version, "tool registered");

        self.tools.insert(metadata.id.clone(), metadata);
        Ok(())
    }

    /// Mark the current version of a tool as approved. Returns `false` if unknown.
    pub fn approve(&mut self, tool_id: &str) -> bool {
        match self.tools.get_mut(tool_id) {
            Some(tool) => {
                tool.approved = true;
                self.audit.record(AuditEvent::new(
                    AuditEventKind::ToolApproved,
                    tool_id,
                    json!({ "version": tool.version }),
                ));
                true
            }
            None => false,
        }
    }

    /// Compare a presented checksum with the registered one.
    ///
    /// A mismatch is treated as tampering and is audited at warn level.
    pub fn verify_integrity(&self, tool_id: &str, checksum: &str) -> Result<(), IntegrityError> {
        let tool = self
            .tools
            .get(tool_id)
            .ok_or_else(|| IntegrityError::UnknownTool {
                tool_id: tool_id.to_string(),
            })?;

        if tool.checksum.eq_ignore_ascii_case(checksum) {
            return Ok(());
        }

        self.audit.record(AuditEvent::warn(
            AuditEventKind::IntegrityViolation,
            tool_id,
            json!({ "expected": tool.checksum, "actual": checksum }),
        ));
        tracing::warn!(tool_id = %tool_id, "checksum mismatch, possible tampering");

        Err(IntegrityError::ChecksumMismatch {
            tool_id: tool_id.to_string(),
            expected: tool.checksum.clone(),
            actual: checksum.to_string(),
        })
    }

    /// [`verify_integrity`](Self::verify_integrity) for an execution request.
    /// A request without a checksum is refused and audited like a mismatch.
    pub fn verify_presented(
        &self,
        tool_id: &str,
        checksum: Option<&str>,
    ) -> Result<(), IntegrityError> {
        if let Some(checksum) = checksum {
            return self.verify_integrity(tool_id, checksum);
        }
        let tool = self
            .tools
            .get(tool_id)
            .ok_or_else(|| IntegrityError::UnknownTool {
                tool_id: tool_id.to_string(),
            })?;

        self.audit.record(AuditEvent::warn(
            AuditEventKind::IntegrityViolation,
            tool_id,
            json!({ "expected": tool.checksum, "actual": null }),
        ));
        tracing::warn!(tool_id = %tool_id, "execution requested without a checksum");

        Err(IntegrityError::ChecksumMissing {
            tool_id: tool_id.to_string(),
        })
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolMetadata> {
        self.tools.get(tool_id)
    }

    pub fn is_approved(&self, tool_id: &str) -> bool {
        self.tools.get(tool_id).is_some_and(|t| t.approved)
    }

    /// All current tool versions, sorted by id.
    pub fn list(&self) -> Vec<&ToolMetadata> {
        let mut tools: Vec<&ToolMetadata> = self.tools.values().collect();
        tools.sort_by(|a, b| a.id.cmp(&b.id));
        tools
    }

    /// Tools that declare at least one entry of the given capability kind.
    pub fn list_by_capability(&self, kind: CapabilityKind) -> Vec<&ToolMetadata> {
        self.list()
            .into_iter()
            .filter(|t| !t.capabilities.entries(kind).is_empty())
            .collect()
    }

    /// Whether a tool declares `resource` under the given capability kind.
    pub fn has_capability(&self, tool_id: &str, kind: CapabilityKind, resource: &str) -> bool {
        self.tools.get(tool_id).is_some_and(|t| {
            t.capabilities
                .entries(kind)
                .iter()
                .any(|entry| entry == resource)
        })
    }

    /// Tools whose required scopes include `scope`.
    pub fn tools_requiring_scope(&self, scope: &str) -> Vec<&ToolMetadata> {
        self.list()
            .into_iter()
            .filter(|t| t.required_scopes.iter().any(|s| s == scope))
            .collect()
    }

    /// Every version ever registered for a tool, oldest first.
    pub fn versions(&self, tool_id: &str) -> Vec<String> {
        let mut versions: Vec<String> = self
            .history
            .get(tool_id)
            .map(|h| h.iter().map(|t| t.version.clone()).collect())
            .unwrap_or_default();
        if let Some(current) = self.tools.get(tool_id) {
            versions.push(current.version.clone());
        }
        versions
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::registry::tool::{compute_checksum, ToolCapabilities, ToolLimits};

    fn tool(id: &str, version: &str) -> ToolMetadata {
        ToolMetadata {
            id: id.into(),
            name: id.into(),
            version: version.into(),
            description: String::new(),
            capabilities: ToolCapabilities {
                reads: vec!["Observation".into()],
                db_tables: vec!["observations".into()],
                ..Default::default()
            },
            checksum: compute_checksum(format!("{id}@{version}").as_bytes()),
            approved: false,
            limits: ToolLimits::default(),
            required_scopes: vec!["fhir.read:Observation".into()],
            input_schema: None,
            output_schema: None,
        }
    }

    fn registry() -> (ToolRegistry, Arc<MemoryAuditSink>) {
        let sink = Arc::new(MemoryAuditSink::new());
        (ToolRegistry::new(sink.clone()), sink)
    }

    #[test]
    fn test_register_and_get() {
        let (mut reg, sink) = registry();
        reg.register(tool("a", "1.0.0")).unwrap();
        assert!(reg.get("a").is_some());
        assert_eq!(reg.len(), 1);
        assert_eq!(sink.events_of(AuditEventKind::ToolRegistered).len(), 1);
    }

    #[test]
    fn test_failed_registration_leaves_registry_empty() {
        let (mut reg, _) = registry();
        let mut bad = tool("a", "1.0.0");
        bad.checksum = "0123456789".into();
        assert!(reg.register(bad).is_err());
        assert!(reg.list().is_empty());
        assert!(reg.get("a").is_none());
    }

    #[test]
    fn test_new_version_replaces_and_keeps_history() {
        let (mut reg, _) = registry();
        reg.register(tool("a", "1.0.0")).unwrap();
        reg.register(tool("a", "1.1.0")).unwrap();
        assert_eq!(reg.get("a").unwrap().version, "1.1.0");
        assert_eq!(reg.versions("a"), vec!["1.0.0", "1.1.0"]);
    }

    #[test]
    fn test_duplicate_version_rejected() {
        let (mut reg, _) = registry();
        reg.register(tool("a", "1.0.0")).unwrap();
        reg.register(tool("a", "1.1.0")).unwrap();
        let err = reg.register(tool("a", "1.0.0")).unwrap_err();
        assert!(matches!(err, IntegrityError::DuplicateVersion { .. }));
    }

    #[test]
    fn test_verify_integrity() {
        let (mut reg, sink) = registry();
        let t = tool("a", "1.0.0");
        let checksum = t.checksum.clone();
        reg.register(t).unwrap();

        assert!(reg.verify_integrity("a", &checksum).is_ok());
        assert!(reg
            .verify_integrity("a", &checksum.to_ascii_uppercase())
            .is_ok());

        let err = reg.verify_integrity("a", &"0".repeat(64)).unwrap_err();
        assert!(matches!(err, IntegrityError::ChecksumMismatch { .. }));
        assert_eq!(sink.events_of(AuditEventKind::IntegrityViolation).len(), 1);

        let err = reg.verify_integrity("missing", &checksum).unwrap_err();
        assert!(matches!(err, IntegrityError::UnknownTool { .. }));
    }

    #[test]
    fn test_execution_without_checksum_is_refused() {
        let (mut reg, sink) = registry();
        let t = tool("a", "1.0.0");
        let checksum = t.checksum.clone();
        reg.register(t).unwrap();

        assert!(reg.verify_presented("a", Some(&checksum)).is_ok());
        assert_eq!(
            reg.verify_presented("a", None),
            Err(IntegrityError::ChecksumMissing {
                tool_id: "a".into()
            })
        );
        let events = sink.events_of(AuditEventKind::IntegrityViolation);
        assert_eq!(events.len(), 1);
        assert!(events[0].details["actual"].is_null());
    }

    #[test]
    fn test_read_queries_never_fail_on_unknown() {
        let (reg, _) = registry();
        assert!(!reg.is_approved("nope"));
        assert!(!reg.has_capability("nope", CapabilityKind::Read, "x"));
        assert!(reg.versions("nope").is_empty());
        assert!(reg.tools_requiring_scope("fhir.read:Observation").is_empty());
    }

    #[test]
    fn test_capability_queries() {
        let (mut reg, _) = registry();
        reg.register(tool("a", "1.0.0")).unwrap();
        let mut writer = tool("b", "1.0.0");
        writer.capabilities.writes = vec!["Observation".into()];
        writer.required_scopes = vec!["fhir.write:Observation".into()];
        reg.register(writer).unwrap();

        let writers: Vec<&str> = reg
            .list_by_capability(CapabilityKind::Write)
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(writers, vec!["b"]);

        assert!(reg.has_capability("a", CapabilityKind::DbTable, "observations"));
        assert!(!reg.has_capability("a", CapabilityKind::DbTable, "patients"));

        let needing = reg.tools_requiring_scope("fhir.write:Observation");
        assert_eq!(needing.len(), 1);
        assert_eq!(needing[0].id, "b");
    }

    #[test]
    fn test_approve() {
        let (mut reg, _) = registry();
        reg.register(tool("a", "1.0.0")).unwrap();
        assert!(!reg.is_approved("a"));
        assert!(reg.approve("a"));
        assert!(reg.is_approved("a"));
        assert!(!reg.approve("missing"));
    }
}
