//! Symmetric input/output schema lock around a tool executor.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::error::ValidationError;

use super::validator::{SchemaStage, SchemaValidator};

/// Binds a tool to an input and an output schema.
///
/// The executor only ever sees validated input, and its output only leaves
/// through the output schema.
#[derive(Clone)]
pub struct SchemaLockedTool {
    name: String,
    input_schema: String,
    output_schema: String,
    validator: Arc<SchemaValidator>,
}

impl SchemaLockedTool {
    pub fn new(
        name: impl Into<String>,
        input_schema: impl Into<String>,
        output_schema: impl Into<String>,
        validator: Arc<SchemaValidator>,
    ) -> Self {
        Self {
            name: name.into(),
            input_schema: input_schema.into(),
            output_schema: output_schema.into(),
            validator,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Validate input, run `executor`, validate output.
    ///
    /// Returns the first failure at either boundary. The executor is not
    /// called when input validation fails. Executor errors come back as
    /// [`ValidationError::ExecutorFailed`].
    pub async fn execute<F, Fut, E>(&self, input: &Value, executor: F) -> Result<Value, ValidationError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: std::fmt::Display,
    {
        let validated = self
            .validator
            .validate(SchemaStage::Input, &self.input_schema, input)?;

        let output = executor(validated)
            .await
            .map_err(|e| ValidationError::ExecutorFailed {
                schema: self.name.clone(),
                message: e.to_string(),
            })?;

        self.validator
            .validate(SchemaStage::Output, &self.output_schema, &output)
    }
}

impl std::fmt::Debug for SchemaLockedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaLockedTool")
            .field("name", &self.name)
            .field("input_schema", &self.input_schema)
            .field("output_schema", &self.output_schema)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::schema::{FieldType, ObjectSchema, Schema};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn locked() -> SchemaLockedTool {
        let v = Arc::new(SchemaValidator::new());
        v.register_input(Schema::new(
            "lookup.in",
            ObjectSchema::new().required("id", FieldType::pattern("p-[0-9]+")),
        ))
        .unwrap();
        v.register_output(Schema::new(
            "lookup.out",
            ObjectSchema::new().required("status", FieldType::enumeration(["ok", "missing"])),
        ))
        .unwrap();
        SchemaLockedTool::new("lookup", "lookup.in", "lookup.out", v)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let tool = locked();
        let out = tool
            .execute(&json!({"id": "p-1"}), |input| async move {
                assert_eq!(input["id"], "p-1");
                Ok::<_, String>(json!({"status": "ok"}))
            })
            .await
            .unwrap();
        assert_eq!(out, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_executor_never_runs_on_bad_input() {
        let tool = locked();
        let calls = AtomicUsize::new(0);
        let err = tool
            .execute(&json!({"id": "nope", "extra": 1}), |_| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(json!({"status": "ok"}))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ValidationError::SchemaViolation { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_bad_output_rejected() {
        let tool = locked();
        let err = tool
            .execute(&json!({"id": "p-1"}), |_| async {
                Ok::<_, String>(json!({"status": "ok", "ssn": "123-45-6789"}))
            })
            .await
            .unwrap_err();
        match err {
            ValidationError::SchemaViolation { stage, issues, .. } => {
                assert_eq!(stage, "output");
                assert_eq!(issues[0].path, "$.ssn");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_executor_error_reshaped() {
        let tool = locked();
        let err = tool
            .execute(&json!({"id": "p-1"}), |_| async {
                Err::<Value, _>("backend unavailable")
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::ExecutorFailed {
                schema: "lookup".into(),
                message: "backend unavailable".into(),
            }
        );
    }
}
