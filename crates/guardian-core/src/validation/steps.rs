//! Schemas for typed remediation steps.
//!
//! Every [`StepAction`](crate::domain::StepAction) variant has an input
//! schema named `step.<variant>`, checked by
//! [`SchemaValidator::validate_action`].

use crate::domain::error::{IssueKind, ValidationError, ValidationIssue};
use crate::domain::RemediationAction;

use super::schema::{ContentPolicy, FieldType, ObjectSchema, Schema};
use super::validator::{SchemaStage, SchemaValidator};

pub const STEP_SCHEMA_PREFIX: &str = "step.";

const IDENT: &str = "[A-Za-z][A-Za-z0-9_]{0,63}";
const NAMESPACE: &str = "[A-Za-z0-9_.:-]{1,128}";
const FILE_PATH: &str = "[A-Za-z0-9_./-]{1,256}";
const RECORD_ID: &str = "[A-Za-z0-9._:-]{1,128}";

pub fn step_schema_name(kind: &str) -> String {
    format!("{STEP_SCHEMA_PREFIX}{kind}")
}

fn target() -> FieldType {
    FieldType::object(
        ObjectSchema::new()
            .required(
                "kind",
                FieldType::enumeration(["fhir", "table", "cache", "file"]),
            )
            .optional("resource_type", FieldType::pattern(IDENT))
            .optional("name", FieldType::pattern(IDENT))
            .optional("namespace", FieldType::pattern(NAMESPACE))
            .optional("path", FieldType::pattern(FILE_PATH)),
    )
}

fn step(kind: &str) -> ObjectSchema {
    ObjectSchema::new()
        .required("type", FieldType::Enum {
            values: vec![kind.to_string()],
        })
        .required("target", target())
}

/// One schema per step variant.
pub fn step_schemas() -> Vec<Schema> {
    // Record bodies legitimately carry patient data.
    let records = ContentPolicy::default().allowing_phi();

    vec![
        Schema::new(
            step_schema_name("read_record"),
            step("read_record").optional("id", FieldType::pattern(RECORD_ID)),
        ),
        Schema::new(
            step_schema_name("query_records"),
            step("query_records")
                .optional(
                    "filter",
                    FieldType::map(FieldType::bounded_string(0, 256), Some(32)),
                )
                .optional("limit", FieldType::integer(Some(1), Some(10_000))),
        ),
        Schema::new(
            step_schema_name("update_record"),
            step("update_record")
                .required("id", FieldType::pattern(RECORD_ID))
                .required("changes", FieldType::map(FieldType::Scalar, Some(64))),
        )
        .with_content_policy(records),
        Schema::new(
            step_schema_name("create_record"),
            step("create_record").required("body", FieldType::map(FieldType::Any, Some(128))),
        )
        .with_content_policy(records),
        Schema::new(
            step_schema_name("delete_record"),
            step("delete_record").required("id", FieldType::pattern(RECORD_ID)),
        ),
        Schema::new(
            step_schema_name("invalidate_cache"),
            step("invalidate_cache").required("key", FieldType::bounded_string(1, 256)),
        ),
        Schema::new(
            step_schema_name("edit_file"),
            step("edit_file").required("summary", FieldType::bounded_string(1, 500)),
        ),
    ]
}

impl SchemaValidator {
    /// Install the built-in step schemas.
    pub fn register_step_schemas(&self) -> Result<(), ValidationError> {
        for schema in step_schemas() {
            self.register(SchemaStage::Input, schema)?;
        }
        Ok(())
    }

    /// Validate every step of an action against its variant schema.
    ///
    /// Issue paths are rewritten to `$.steps[i].action...`.
    pub fn validate_action(&self, action: &RemediationAction) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        for (i, step) in action.steps.iter().enumerate() {
            let prefix = format!("$.steps[{i}].action");
            let value = match serde_json::to_value(&step.action) {
                Ok(v) => v,
                Err(e) => {
                    issues.push(ValidationIssue::new(
                        prefix,
                        IssueKind::TypeMismatch,
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let name = step_schema_name(step.action.kind());
            if let Err(err) = self.validate(SchemaStage::Input, &name, &value) {
                for mut issue in err.issues() {
                    issue.path = issue.path.replacen('$', &prefix, 1);
                    issues.push(issue);
                }
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::SchemaViolation {
                schema: format!("action:{}", action.id),
                stage: SchemaStage::Input.to_string(),
                issues,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ActionStep, StepAction, StepTarget, Strategy};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn validator() -> SchemaValidator {
        let v = SchemaValidator::new();
        v.register_step_schemas().unwrap();
        v
    }

    fn action(steps: Vec<StepAction>) -> RemediationAction {
        RemediationAction {
            id: "a1".into(),
            issue_id: "i1".into(),
            strategy: Strategy::DataCorrection,
            steps: steps
                .into_iter()
                .map(|action| ActionStep {
                    description: "step".into(),
                    action,
                    rollback: None,
                })
                .collect(),
        }
    }

    fn obs() -> StepTarget {
        StepTarget::Fhir {
            resource_type: "Observation".into(),
        }
    }

    #[test]
    fn test_every_variant_has_a_schema() {
        let v = validator();
        for kind in [
            "read_record",
            "query_records",
            "update_record",
            "create_record",
            "delete_record",
            "invalidate_cache",
            "edit_file",
        ] {
            assert!(
                v.has_schema(SchemaStage::Input, &step_schema_name(kind)),
                "{kind}"
            );
        }
    }

    #[test]
    fn test_well_formed_action_passes() {
        let v = validator();
        let mut changes = BTreeMap::new();
        changes.insert("valueQuantity".to_string(), json!(12.5));
        changes.insert("note".to_string(), json!("patient DOB: 01/02/1960"));
        let a = action(vec![
            StepAction::ReadRecord {
                target: obs(),
                id: Some("obs-1".into()),
            },
            StepAction::UpdateRecord {
                target: obs(),
                id: "obs-1".into(),
                changes,
            },
            StepAction::QueryRecords {
                target: StepTarget::Table {
                    name: "observations".into(),
                },
                filter: BTreeMap::from([("status".to_string(), "final".to_string())]),
                limit: Some(50),
            },
        ]);
        assert!(v.validate_action(&a).is_ok());
    }

    #[test]
    fn test_injection_in_step_rejected_with_step_path() {
        let v = validator();
        let a = action(vec![
            StepAction::ReadRecord {
                target: obs(),
                id: None,
            },
            StepAction::DeleteRecord {
                target: StepTarget::Table {
                    name: "observations".into(),
                },
                id: "1; DROP TABLE observations".into(),
            },
        ]);
        let err = v.validate_action(&a).unwrap_err();
        let issues = err.issues();
        assert!(issues.iter().all(|i| i.path.starts_with("$.steps[1].action")));
        assert!(issues.iter().any(|i| i.path == "$.steps[1].action.id"));
    }

    #[test]
    fn test_bad_target_name_rejected() {
        let v = validator();
        let a = action(vec![StepAction::InvalidateCache {
            target: StepTarget::Cache {
                namespace: "flags cache".into(),
            },
            key: "k".into(),
        }]);
        let err = v.validate_action(&a).unwrap_err();
        assert_eq!(err.issues()[0].path, "$.steps[0].action.target.namespace");
    }

    #[test]
    fn test_limit_out_of_range() {
        let v = validator();
        let a = action(vec![StepAction::QueryRecords {
            target: obs(),
            filter: BTreeMap::new(),
            limit: Some(0),
        }]);
        let err = v.validate_action(&a).unwrap_err();
        assert_eq!(err.issues()[0].kind, IssueKind::OutOfRange);
    }
}
