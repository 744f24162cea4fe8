//! Schema validation with sensitive-data and attack detection.
//!
//! - [`schema`]:    closed field-type DSL and content policy
//! - [`validator`]: `SchemaValidator` (register, validate_input/output)
//! - [`locked`]:    `SchemaLockedTool`, the validate-execute-validate path
//! - [`steps`]:     built-in schemas for typed remediation steps
//! - [`phi`], [`injection`], [`xss`]: pattern batteries
//! - [`risk`]:      risk bucketing shared by the attack detectors

pub mod injection;
pub mod locked;
pub mod phi;
pub mod risk;
pub mod schema;
pub mod steps;
pub mod validator;
pub mod xss;

pub use injection::{SqlInjectionDetector, SQL_INJECTION_PATTERNS};
pub use locked::SchemaLockedTool;
pub use phi::{PhiDetector, PhiMatch, PhiType, PHI_PATTERNS};
pub use risk::{RiskLevel, SignatureSet, ThreatReport};
pub use schema::{ContentPolicy, FieldSpec, FieldType, ObjectSchema, Schema};
pub use steps::{step_schema_name, step_schemas};
pub use validator::{ContentScan, SchemaStage, SchemaValidator, ValidationReport};
pub use xss::{XssDetector, XSS_PATTERNS};
