//! Registration, integrity verification and capability queries.

use std::sync::Arc;

use serde_json::json;

use guardian_core::audit::{AuditEventKind, AuditSeverity, MemoryAuditSink};
use guardian_core::domain::IntegrityError;
use guardian_core::registry::{
    compute_checksum, CapabilityKind, ToolCapabilities, ToolLimits, ToolMetadata, ToolRegistry,
};

const ARTIFACT: &[u8] = b"fn remediate(observation) { /* fill units */ }";

fn tool(id: &str, version: &str) -> ToolMetadata {
    ToolMetadata {
        id: id.into(),
        name: format!("{id} tool"),
        version: version.into(),
        description: "fills missing observation units".into(),
        capabilities: ToolCapabilities {
            reads: vec!["Observation".into()],
            writes: vec!["Observation".into()],
            egress: vec!["https://terminology.hl7.org/CodeSystem".into()],
            db_tables: vec!["observations".into()],
            fs_paths: vec![],
        },
        checksum: compute_checksum(ARTIFACT),
        approved: false,
        limits: ToolLimits::default(),
        required_scopes: vec!["fhir.write:Observation".into()],
        input_schema: None,
        output_schema: None,
    }
}

fn registry() -> (ToolRegistry, Arc<MemoryAuditSink>) {
    let audit = Arc::new(MemoryAuditSink::new());
    (ToolRegistry::new(audit.clone()), audit)
}

#[test]
fn short_checksum_is_rejected_and_not_listed() {
    let (mut reg, audit) = registry();
    let mut bad = tool("unit-filler", "1.0.0");
    bad.checksum = "abcdef0123".into();

    assert_eq!(
        reg.register(bad),
        Err(IntegrityError::MalformedChecksum { len: 10 })
    );
    assert!(reg.list().is_empty());
    assert!(reg.get("unit-filler").is_none());
    assert!(audit.is_empty());
}

#[test]
fn malformed_registrations_leave_catalog_untouched() {
    let (mut reg, _) = registry();
    reg.register(tool("unit-filler", "1.0.0")).unwrap();

    let mut bad_version = tool("other", "one");
    bad_version.version = "1.0".into();
    assert!(matches!(
        reg.register(bad_version),
        Err(IntegrityError::InvalidVersion { .. })
    ));

    let mut wildcard = tool("other", "1.0.0");
    wildcard.capabilities.writes = vec!["*".into()];
    assert!(matches!(
        reg.register(wildcard),
        Err(IntegrityError::InvalidCapability { .. })
    ));

    let mut bad_egress = tool("other", "1.0.0");
    bad_egress.capabilities.egress = vec!["not a url".into()];
    assert!(reg.register(bad_egress).is_err());

    assert_eq!(reg.len(), 1);
    assert_eq!(
        reg.register(tool("unit-filler", "1.0.0")),
        Err(IntegrityError::DuplicateVersion {
            tool_id: "unit-filler".into(),
            version: "1.0.0".into(),
        })
    );
}

#[test]
fn integrity_mismatch_is_audited_at_warn() {
    let (mut reg, audit) = registry();
    reg.register(tool("unit-filler", "1.0.0")).unwrap();

    assert!(reg
        .verify_integrity("unit-filler", &compute_checksum(ARTIFACT))
        .is_ok());
    // Case-insensitive comparison of the hex digest.
    assert!(reg
        .verify_integrity("unit-filler", &compute_checksum(ARTIFACT).to_uppercase())
        .is_ok());

    let tampered = compute_checksum(b"fn remediate() { exfiltrate() }");
    assert!(matches!(
        reg.verify_integrity("unit-filler", &tampered),
        Err(IntegrityError::ChecksumMismatch { .. })
    ));
    let violations = audit.events_of(AuditEventKind::IntegrityViolation);
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, AuditSeverity::Warn);

    assert!(matches!(
        reg.verify_integrity("ghost", &tampered),
        Err(IntegrityError::UnknownTool { .. })
    ));
}

#[test]
fn approval_and_version_history() {
    let (mut reg, audit) = registry();
    reg.register(tool("unit-filler", "1.0.0")).unwrap();
    assert!(!reg.is_approved("unit-filler"));
    assert!(reg.approve("unit-filler"));
    assert!(reg.is_approved("unit-filler"));
    assert!(!reg.approve("ghost"));

    reg.register(tool("unit-filler", "1.1.0")).unwrap();
    assert_eq!(reg.versions("unit-filler"), vec!["1.0.0", "1.1.0"]);
    assert_eq!(reg.get("unit-filler").unwrap().version, "1.1.0");
    // A new version must be approved on its own.
    assert!(!reg.is_approved("unit-filler"));

    assert_eq!(audit.events_of(AuditEventKind::ToolRegistered).len(), 2);
    assert_eq!(audit.events_of(AuditEventKind::ToolApproved).len(), 1);
}

#[test]
fn capability_queries() {
    let (mut reg, _) = registry();
    reg.register(tool("unit-filler", "1.0.0")).unwrap();
    let mut reader = tool("obs-reader", "0.3.1");
    reader.capabilities = ToolCapabilities {
        reads: vec!["Observation".into()],
        ..ToolCapabilities::default()
    };
    reader.required_scopes = vec!["fhir.read:Observation".into()];
    reg.register(reader).unwrap();

    let ids = |tools: Vec<&ToolMetadata>| tools.iter().map(|t| t.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids(reg.list()), vec!["obs-reader", "unit-filler"]);
    assert_eq!(ids(reg.list_by_capability(CapabilityKind::Egress)), vec!["unit-filler"]);
    assert!(reg.has_capability("unit-filler", CapabilityKind::DbTable, "observations"));
    assert!(!reg.has_capability("obs-reader", CapabilityKind::Write, "Observation"));
    assert!(!reg.has_capability("ghost", CapabilityKind::Read, "Observation"));
    assert_eq!(
        ids(reg.tools_requiring_scope("fhir.read:Observation")),
        vec!["obs-reader"]
    );
}

#[test]
fn manifest_file_round_trips_through_registration() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    let manifest = json!({
        "id": "cache-buster",
        "name": "Cache buster",
        "version": "2.0.0-rc.1",
        "checksum": compute_checksum(b"artifact"),
        "capabilities": { "egress": ["*.internal.example"] },
        "required_scopes": ["cache.delete:patient_summary"]
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    let metadata: ToolMetadata = serde_json::from_str(&raw).unwrap();
    assert!(!metadata.approved);
    assert_eq!(metadata.limits, ToolLimits::default());

    let (mut reg, _) = registry();
    reg.register(metadata).unwrap();
    assert_eq!(
        reg.get("cache-buster").unwrap().capabilities.egress_domains(),
        vec!["*.internal.example".to_string()]
    );
}
