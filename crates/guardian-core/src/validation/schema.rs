//! Closed, typed schema description for tool payloads.
//!
//! Schemas describe a JSON object whose fields are typed. Fields that are not
//! declared are rejected, so a caller cannot invent new fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::risk::RiskLevel;

/// Type of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    String {
        #[serde(default)]
        min_len: Option<usize>,
        #[serde(default)]
        max_len: Option<usize>,
        /// Regex the whole value must match.
        #[serde(default)]
        pattern: Option<String>,
    },
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Boolean,
    Enum {
        values: Vec<String>,
    },
    Array {
        items: Box<FieldType>,
        #[serde(default)]
        max_items: Option<usize>,
    },
    Object {
        schema: ObjectSchema,
    },
    /// Free-form keys with typed values.
    Map {
        values: Box<FieldType>,
        #[serde(default)]
        max_entries: Option<usize>,
    },
    /// Any JSON scalar (string, number, boolean, null).
    Scalar,
    /// Any JSON value. Nested strings are still scanned.
    Any,
}

impl FieldType {
    pub fn string() -> Self {
        Self::String {
            min_len: None,
            max_len: None,
            pattern: None,
        }
    }

    pub fn bounded_string(min_len: usize, max_len: usize) -> Self {
        Self::String {
            min_len: Some(min_len),
            max_len: Some(max_len),
            pattern: None,
        }
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::String {
            min_len: None,
            max_len: None,
            pattern: Some(pattern.into()),
        }
    }

    pub fn integer(min: Option<i64>, max: Option<i64>) -> Self {
        Self::Integer { min, max }
    }

    pub fn number(min: Option<f64>, max: Option<f64>) -> Self {
        Self::Number { min, max }
    }

    pub fn enumeration<const N: usize>(values: [&str; N]) -> Self {
        Self::Enum {
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    pub fn array(items: FieldType, max_items: Option<usize>) -> Self {
        Self::Array {
            items: Box::new(items),
            max_items,
        }
    }

    pub fn object(schema: ObjectSchema) -> Self {
        Self::Object { schema }
    }

    pub fn map(values: FieldType, max_entries: Option<usize>) -> Self {
        Self::Map {
            values: Box::new(values),
            max_entries,
        }
    }

    /// Short name used in type-mismatch messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Integer { .. } => "integer",
            Self::Number { .. } => "number",
            Self::Boolean => "boolean",
            Self::Enum { .. } => "enum",
            Self::Array { .. } => "array",
            Self::Object { .. } => "object",
            Self::Map { .. } => "map",
            Self::Scalar => "scalar",
            Self::Any => "any",
        }
    }

    /// Every regex pattern used by this type, recursively.
    pub(crate) fn collect_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::String {
                pattern: Some(p), ..
            } => out.push(p),
            Self::Array { items, .. } => items.collect_patterns(out),
            Self::Map { values, .. } => values.collect_patterns(out),
            Self::Object { schema } => schema.collect_patterns(out),
            _ => {}
        }
    }
}

/// One declared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(flatten)]
    pub ty: FieldType,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn required(ty: FieldType) -> Self {
        Self { ty, required: true }
    }

    pub fn optional(ty: FieldType) -> Self {
        Self {
            ty,
            required: false,
        }
    }
}

/// A JSON object with declared fields only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    pub fn required(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(name, FieldSpec::required(ty))
    }

    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(name, FieldSpec::optional(ty))
    }

    pub(crate) fn collect_patterns<'a>(&'a self, out: &mut Vec<&'a str>) {
        for spec in self.fields.values() {
            spec.ty.collect_patterns(out);
        }
    }
}

/// What the content detectors may let through for a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPolicy {
    pub allow_phi: bool,
    /// Highest tolerated SQL-injection risk. `None` rejects any match.
    pub max_sql_risk: RiskLevel,
    pub max_xss_risk: RiskLevel,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            allow_phi: false,
            max_sql_risk: RiskLevel::None,
            max_xss_risk: RiskLevel::None,
        }
    }
}

impl ContentPolicy {
    pub fn allowing_phi(mut self) -> Self {
        self.allow_phi = true;
        self
    }
}

/// A named schema: root object plus content policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub root: ObjectSchema,
    #[serde(default)]
    pub content: ContentPolicy,
}

impl Schema {
    pub fn new(name: impl Into<String>, root: ObjectSchema) -> Self {
        Self {
            name: name.into(),
            root,
            content: ContentPolicy::default(),
        }
    }

    pub fn with_content_policy(mut self, content: ContentPolicy) -> Self {
        self.content = content;
        self
    }

    pub fn patterns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.root.collect_patterns(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_patterns() {
        let schema = Schema::new(
            "observation.update",
            ObjectSchema::new()
                .required("id", FieldType::pattern("^obs-[0-9]+$"))
                .optional(
                    "tags",
                    FieldType::array(FieldType::pattern("^[a-z]+$"), Some(5)),
                ),
        );
        assert_eq!(schema.patterns().len(), 2);
        assert!(schema.root.fields["id"].required);
        assert!(!schema.root.fields["tags"].required);
    }

    #[test]
    fn test_schema_from_toml() {
        let raw = r#"
            name = "patient.lookup"

            [root.fields.patient_id]
            type = "string"
            pattern = "^p-[0-9]{4}$"
            required = true

            [root.fields.limit]
            type = "integer"
            min = 1
            max = 50

            [content]
            allow_phi = true
        "#;
        let schema: Schema = toml::from_str(raw).unwrap();
        assert_eq!(schema.name, "patient.lookup");
        assert!(schema.content.allow_phi);
        assert_eq!(schema.content.max_sql_risk, RiskLevel::None);
        assert_eq!(
            schema.root.fields["limit"].ty,
            FieldType::integer(Some(1), Some(50))
        );
    }
}
