//! Schema-locked execution and content detectors end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use guardian_core::domain::{IssueKind, ValidationError};
use guardian_core::validation::{
    ContentPolicy, FieldType, ObjectSchema, PhiDetector, PhiType, RiskLevel, Schema,
    SchemaLockedTool, SchemaValidator, SqlInjectionDetector, XssDetector,
};

fn validator() -> Arc<SchemaValidator> {
    let validator = Arc::new(SchemaValidator::new());
    validator
        .register_input(Schema::new(
            "unit_fix.input",
            ObjectSchema::new()
                .required("observation_id", FieldType::pattern("obs-[0-9]{1,8}"))
                .required("unit", FieldType::enumeration(["mg/dL", "mmol/L"]))
                .optional("note", FieldType::bounded_string(0, 200)),
        ))
        .unwrap();
    validator
        .register_output(Schema::new(
            "unit_fix.output",
            ObjectSchema::new()
                .required("updated", FieldType::Boolean)
                .required("rows", FieldType::integer(Some(0), Some(1000))),
        ))
        .unwrap();
    validator
}

fn locked(validator: Arc<SchemaValidator>) -> SchemaLockedTool {
    SchemaLockedTool::new("unit-fix", "unit_fix.input", "unit_fix.output", validator)
}

#[tokio::test]
async fn executor_sees_only_validated_input() {
    let tool = locked(validator());
    let out = tool
        .execute(&json!({"observation_id": "obs-42", "unit": "mg/dL"}), |input| async move {
            assert_eq!(input["observation_id"], "obs-42");
            Ok::<_, String>(json!({"updated": true, "rows": 1}))
        })
        .await
        .unwrap();
    assert_eq!(out, json!({"updated": true, "rows": 1}));
}

#[tokio::test]
async fn no_side_effects_when_input_fails() {
    let tool = locked(validator());
    let calls = Arc::new(AtomicUsize::new(0));

    let bad_inputs = [
        json!({"observation_id": "obs-42"}),
        json!({"observation_id": "obs-42", "unit": "furlongs"}),
        json!({"observation_id": "42; DROP TABLE observations", "unit": "mg/dL"}),
        json!({"observation_id": "obs-1", "unit": "mg/dL", "invented": true}),
        json!({"observation_id": "obs-1", "unit": "mg/dL", "note": "patient SSN 123-45-6789"}),
        json!({"observation_id": "obs-1", "unit": "mg/dL", "note": "<script>alert(1)</script>"}),
    ];

    for input in &bad_inputs {
        let calls = calls.clone();
        let result = tool
            .execute(input, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!({"updated": true, "rows": 1}))
            })
            .await;
        assert!(
            matches!(result, Err(ValidationError::SchemaViolation { .. })),
            "{input} should be rejected, got {result:?}"
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn output_is_locked_too() {
    let tool = locked(validator());
    let err = tool
        .execute(&json!({"observation_id": "obs-1", "unit": "mmol/L"}), |_| async {
            Ok::<_, String>(json!({"updated": true, "rows": 5000, "debug": "x"}))
        })
        .await
        .unwrap_err();

    let kinds: Vec<IssueKind> = err.issues().iter().map(|i| i.kind).collect();
    assert!(kinds.contains(&IssueKind::OutOfRange));
    assert!(kinds.contains(&IssueKind::UnknownField));
}

#[tokio::test]
async fn executor_errors_are_reshaped() {
    let tool = locked(validator());
    let err = tool
        .execute(&json!({"observation_id": "obs-1", "unit": "mmol/L"}), |_| async {
            Err::<Value, _>("database unavailable")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ValidationError::ExecutorFailed { .. }));
    assert_eq!(err.issues()[0].kind, IssueKind::Executor);
}

#[test]
fn report_lists_every_violated_path() {
    let v = validator();
    let report = v.validate_input(
        "unit_fix.input",
        &json!({"observation_id": 7, "unit": "kg", "extra": 1}),
    );
    assert!(!report.valid);
    assert!(report.data.is_none());
    let mut paths: Vec<&str> = report.errors.iter().map(|e| e.path.as_str()).collect();
    paths.sort();
    assert_eq!(paths, vec!["$.extra", "$.observation_id", "$.unit"]);

    let unknown = v.validate_input("nope", &json!({}));
    assert!(!unknown.valid);
    assert_eq!(unknown.errors[0].kind, IssueKind::UnknownSchema);
}

#[test]
fn phi_allowed_schema_passes_phi() {
    let v = SchemaValidator::new();
    v.register_input(
        Schema::new(
            "contact",
            ObjectSchema::new().required("email", FieldType::string()),
        )
        .with_content_policy(ContentPolicy::default().allowing_phi()),
    )
    .unwrap();
    assert!(v.validate_input("contact", &json!({"email": "a@b.org"})).valid);
}

#[test]
fn redaction_is_idempotent() {
    let phi = PhiDetector::new();
    let samples = [
        "SSN 123-45-6789, call (555) 123-4567 or mail jane.doe@example.org",
        "MRN: 00123456 seen at 10.0.0.12, DOB: 04/12/1961",
        "zip 94110-1234 vin 1HGCM82633A004352 see https://portal.example/chart",
        "retinal scan on file",
    ];
    for text in samples {
        let once = phi.redact(text);
        assert!(!phi.contains_phi(&once), "{once}");
        assert_eq!(phi.redact(&once), once);
    }
    assert!(phi.types("SSN 123-45-6789").contains(&PhiType::Ssn));
}

#[test]
fn risk_is_bucketed_by_signature_count() {
    let sql = SqlInjectionDetector::new();
    assert_eq!(sql.detect("select name from patients").risk, RiskLevel::None);
    let single = sql.detect("1; DROP TABLE users");
    assert!(single.detected());
    let compound = sql.detect("' OR '1'='1' -- UNION SELECT password FROM information_schema.tables; DROP TABLE x");
    assert!(compound.risk > single.risk);

    let xss = XssDetector::new();
    assert_eq!(xss.detect("blood pressure 120/80").risk, RiskLevel::None);
    assert!(xss.detect("<img src=x onerror=alert(1)>").detected());
    assert!(!xss.sanitize("<script>x</script>").contains('<'));
}
