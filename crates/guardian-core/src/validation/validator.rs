//! Schema registry and validation walker.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{IssueKind, ValidationError, ValidationIssue};

use super::injection::SqlInjectionDetector;
use super::phi::{PhiDetector, PhiMatch};
use super::risk::ThreatReport;
use super::schema::{FieldType, ObjectSchema, Schema};
use super::xss::XssDetector;

/// Input or output validation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStage {
    Input,
    Output,
}

impl std::fmt::Display for SchemaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
        })
    }
}

/// `{valid, data}` on success, `{valid: false, errors}` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub schema: String,
    pub stage: SchemaStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationIssue>,
    #[serde(skip)]
    error: Option<ValidationError>,
}

impl ValidationReport {
    fn from_result(
        stage: SchemaStage,
        schema: &str,
        result: Result<Value, ValidationError>,
    ) -> Self {
        match result {
            Ok(data) => Self {
                valid: true,
                schema: schema.to_string(),
                stage,
                data: Some(data),
                errors: Vec::new(),
                error: None,
            },
            Err(err) => Self {
                valid: false,
                schema: schema.to_string(),
                stage,
                data: None,
                errors: err.issues(),
                error: Some(err),
            },
        }
    }

    pub fn into_result(self) -> Result<Value, ValidationError> {
        match (self.valid, self.data, self.error) {
            (true, Some(data), _) => Ok(data),
            (_, _, Some(err)) => Err(err),
            (_, _, None) => Err(ValidationError::SchemaViolation {
                schema: self.schema,
                stage: self.stage.to_string(),
                issues: self.errors,
            }),
        }
    }
}

/// Output of running every detector over one string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentScan {
    pub phi: Vec<PhiMatch>,
    pub sql_injection: ThreatReport,
    pub xss: ThreatReport,
}

impl ContentScan {
    pub fn is_clean(&self) -> bool {
        self.phi.is_empty() && !self.sql_injection.detected() && !self.xss.detected()
    }
}

struct CompiledSchema {
    schema: Schema,
    patterns: HashMap<String, Regex>,
}

/// Validates payloads against named schemas and scans every string leaf.
pub struct SchemaValidator {
    schemas: RwLock<HashMap<(SchemaStage, String), Arc<CompiledSchema>>>,
    phi: PhiDetector,
    sql: SqlInjectionDetector,
    xss: XssDetector,
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaValidator {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            phi: PhiDetector::new(),
            sql: SqlInjectionDetector::new(),
            xss: XssDetector::new(),
        }
    }

    /// Register (or replace) a schema for a stage.
    ///
    /// Field patterns are compiled here, anchored to the whole value.
    pub fn register(&self, stage: SchemaStage, schema: Schema) -> Result<(), ValidationError> {
        let mut patterns = HashMap::new();
        for pattern in schema.patterns() {
            let anchored = format!("^(?:{pattern})$");
            let re = Regex::new(&anchored).map_err(|e| ValidationError::InvalidSchema {
                name: schema.name.clone(),
                reason: format!("pattern '{pattern}': {e}"),
            })?;
            patterns.insert(pattern.to_string(), re);
        }

        let key = (stage, schema.name.clone());
        tracing::debug!(schema = %schema.name, %stage, "schema registered");
        self.schemas
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(CompiledSchema { schema, patterns }));
        Ok(())
    }

    pub fn register_input(&self, schema: Schema) -> Result<(), ValidationError> {
        self.register(SchemaStage::Input, schema)
    }

    pub fn register_output(&self, schema: Schema) -> Result<(), ValidationError> {
        self.register(SchemaStage::Output, schema)
    }

    pub fn has_schema(&self, stage: SchemaStage, name: &str) -> bool {
        self.schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(stage, name.to_string()))
    }

    pub fn schema_names(&self, stage: SchemaStage) -> Vec<String> {
        let mut names: Vec<String> = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|(s, _)| *s == stage)
            .map(|(_, n)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Validate `data` against the schema registered under (`stage`, `name`).
    pub fn validate(
        &self,
        stage: SchemaStage,
        name: &str,
        data: &Value,
    ) -> Result<Value, ValidationError> {
        let compiled = self
            .schemas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(stage, name.to_string()))
            .cloned()
            .ok_or_else(|| ValidationError::UnknownSchema {
                name: name.to_string(),
            })?;

        let mut walk = Walk {
            compiled: compiled.as_ref(),
            validator: self,
            issues: Vec::new(),
        };
        walk.object(&compiled.schema.root, data, "$");

        if walk.issues.is_empty() {
            Ok(data.clone())
        } else {
            tracing::debug!(
                schema = %name,
                %stage,
                issues = walk.issues.len(),
                "schema validation failed"
            );
            Err(ValidationError::SchemaViolation {
                schema: name.to_string(),
                stage: stage.to_string(),
                issues: walk.issues,
            })
        }
    }

    pub fn validate_input(&self, name: &str, data: &Value) -> ValidationReport {
        let result = self.validate(SchemaStage::Input, name, data);
        ValidationReport::from_result(SchemaStage::Input, name, result)
    }

    pub fn validate_output(&self, name: &str, data: &Value) -> ValidationReport {
        let result = self.validate(SchemaStage::Output, name, data);
        ValidationReport::from_result(SchemaStage::Output, name, result)
    }

    /// Run every detector over free text, independent of any schema.
    pub fn scan_text(&self, text: &str) -> ContentScan {
        ContentScan {
            phi: self.phi.detect(text),
            sql_injection: self.sql.detect(text),
            xss: self.xss.detect(text),
        }
    }

    pub fn phi(&self) -> &PhiDetector {
        &self.phi
    }

    pub fn sql(&self) -> &SqlInjectionDetector {
        &self.sql
    }

    pub fn xss(&self) -> &XssDetector {
        &self.xss
    }
}

// ---------------------------------------------------------------------------
// Walker
// ---------------------------------------------------------------------------

struct Walk<'a> {
    compiled: &'a CompiledSchema,
    validator: &'a SchemaValidator,
    issues: Vec<ValidationIssue>,
}

impl Walk<'_> {
    fn push(&mut self, path: &str, kind: IssueKind, message: String) {
        self.issues.push(ValidationIssue::new(path, kind, message));
    }

    fn mismatch(&mut self, path: &str, expected: &str, value: &Value) {
        let actual = match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        };
        self.push(
            path,
            IssueKind::TypeMismatch,
            format!("expected {expected}, got {actual}"),
        );
    }

    fn object(&mut self, schema: &ObjectSchema, value: &Value, path: &str) {
        let Some(obj) = value.as_object() else {
            self.mismatch(path, "object", value);
            return;
        };

        for key in obj.keys() {
            if !schema.fields.contains_key(key) {
                self.push(
                    &format!("{path}.{key}"),
                    IssueKind::UnknownField,
                    format!("field '{key}' is not declared"),
                );
            }
        }

        for (name, spec) in &schema.fields {
            let field_path = format!("{path}.{name}");
            match obj.get(name) {
                None | Some(Value::Null) if spec.required => {
                    self.push(
                        &field_path,
                        IssueKind::Missing,
                        format!("required field '{name}' is missing"),
                    );
                }
                None | Some(Value::Null) => {}
                Some(v) => self.value(&spec.ty, v, &field_path),
            }
        }
    }

    fn value(&mut self, ty: &FieldType, value: &Value, path: &str) {
        match ty {
            FieldType::String {
                min_len,
                max_len,
                pattern,
            } => {
                let Some(s) = value.as_str() else {
                    self.mismatch(path, "string", value);
                    return;
                };
                let len = s.chars().count();
                if min_len.is_some_and(|min| len < min) || max_len.is_some_and(|max| len > max) {
                    self.push(
                        path,
                        IssueKind::OutOfRange,
                        format!(
                            "length {len} outside [{}, {}]",
                            min_len.unwrap_or(0),
                            max_len.map_or("inf".to_string(), |m| m.to_string())
                        ),
                    );
                }
                if let Some(p) = pattern {
                    let matched = self.compiled.patterns.get(p).is_some_and(|re| re.is_match(s));
                    if !matched {
                        self.push(path, IssueKind::Pattern, format!("does not match /{p}/"));
                    }
                }
                self.scan(s, path);
            }
            FieldType::Integer { min, max } => {
                let n = match (value.as_i64(), value.as_u64()) {
                    (Some(n), _) => n,
                    (None, Some(_)) => {
                        self.push(path, IssueKind::OutOfRange, "integer overflows i64".into());
                        return;
                    }
                    _ => {
                        self.mismatch(path, "integer", value);
                        return;
                    }
                };
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    self.push(
                        path,
                        IssueKind::OutOfRange,
                        format!("{n} outside [{min:?}, {max:?}]"),
                    );
                }
            }
            FieldType::Number { min, max } => {
                let Some(n) = value.as_f64() else {
                    self.mismatch(path, "number", value);
                    return;
                };
                if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                    self.push(
                        path,
                        IssueKind::OutOfRange,
                        format!("{n} outside [{min:?}, {max:?}]"),
                    );
                }
            }
            FieldType::Boolean => {
                if !value.is_boolean() {
                    self.mismatch(path, "boolean", value);
                }
            }
            FieldType::Enum { values } => {
                let Some(s) = value.as_str() else {
                    self.mismatch(path, "enum string", value);
                    return;
                };
                if !values.iter().any(|v| v == s) {
                    self.push(
                        path,
                        IssueKind::OutOfRange,
                        format!("not one of [{}]", values.join(", ")),
                    );
                }
            }
            FieldType::Array { items, max_items } => {
                let Some(arr) = value.as_array() else {
                    self.mismatch(path, "array", value);
                    return;
                };
                if let Some(max) = max_items {
                    if arr.len() > *max {
                        self.push(
                            path,
                            IssueKind::OutOfRange,
                            format!("{} items exceeds max {max}", arr.len()),
                        );
                    }
                }
                for (i, item) in arr.iter().enumerate() {
                    self.value(items, item, &format!("{path}[{i}]"));
                }
            }
            FieldType::Object { schema } => self.object(schema, value, path),
            FieldType::Map {
                values,
                max_entries,
            } => {
                let Some(obj) = value.as_object() else {
                    self.mismatch(path, "map", value);
                    return;
                };
                if let Some(max) = max_entries {
                    if obj.len() > *max {
                        self.push(
                            path,
                            IssueKind::OutOfRange,
                            format!("{} entries exceeds max {max}", obj.len()),
                        );
                    }
                }
                for (key, v) in obj {
                    let entry_path = format!("{path}.{key}");
                    self.scan(key, &entry_path);
                    self.value(values, v, &entry_path);
                }
            }
            FieldType::Scalar => match value {
                Value::String(s) => self.scan(s, path),
                Value::Array(_) | Value::Object(_) => self.mismatch(path, "scalar", value),
                _ => {}
            },
            FieldType::Any => self.scan_nested(value, path),
        }
    }

    /// Scan every string inside an arbitrary value, iteratively.
    fn scan_nested(&mut self, value: &Value, path: &str) {
        let mut stack: Vec<(&Value, String)> = vec![(value, path.to_string())];
        while let Some((v, p)) = stack.pop() {
            match v {
                Value::String(s) => self.scan(s, &p),
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        stack.push((item, format!("{p}[{i}]")));
                    }
                }
                Value::Object(obj) => {
                    for (k, item) in obj {
                        self.scan(k, &p);
                        stack.push((item, format!("{p}.{k}")));
                    }
                }
                _ => {}
            }
        }
    }

    /// Apply the schema's content policy to one string.
    fn scan(&mut self, text: &str, path: &str) {
        let policy = self.compiled.schema.content;

        if !policy.allow_phi {
            let types = self.validator.phi.types(text);
            if !types.is_empty() {
                let names: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                self.push(
                    path,
                    IssueKind::Phi,
                    format!("contains PHI: {}", names.join(", ")),
                );
            }
        }

        let sql = self.validator.sql.detect(text);
        if sql.risk > policy.max_sql_risk {
            self.push(
                path,
                IssueKind::SqlInjection,
                format!(
                    "SQL injection risk {} ({})",
                    sql.risk,
                    sql.signatures.join(", ")
                ),
            );
        }

        let xss = self.validator.xss.detect(text);
        if xss.risk > policy.max_xss_risk {
            self.push(
                path,
                IssueKind::Xss,
                format!("XSS risk {} ({})", xss.risk, xss.signatures.join(", ")),
            );
        }
    }
}
