//! Issues and remediation actions supplied by callers.
//!
//! Steps are a closed set of typed variants rather than free-form parameter
//! maps. Each variant carries a verb and a typed target, which is what scope
//! derivation and step schemas key on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Broad category of a detected issue. Drives branch naming and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    DataQuality,
    Performance,
    Configuration,
    Integration,
    Security,
    Bug,
}

impl IssueCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataQuality => "data-quality",
            Self::Performance => "performance",
            Self::Configuration => "configuration",
            Self::Integration => "integration",
            Self::Security => "security",
            Self::Bug => "bug",
        }
    }
}

impl std::fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A detected problem that a remediation action addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub category: IssueCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub affected_resources: Vec<String>,
}

/// Remediation strategy. Every variant has an explicit scope mapping in
/// [`crate::auth::scopes::determine_scopes_for_action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    DataCorrection,
    RecordCleanup,
    CacheRefresh,
    ConfigChange,
    Reindex,
    CodeChange,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DataCorrection => "data_correction",
            Self::RecordCleanup => "record_cleanup",
            Self::CacheRefresh => "cache_refresh",
            Self::ConfigChange => "config_change",
            Self::Reindex => "reindex",
            Self::CodeChange => "code_change",
        };
        f.write_str(s)
    }
}

/// Verb of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepVerb {
    Read,
    Query,
    Write,
    Delete,
}

impl StepVerb {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Query => "query",
            Self::Write => "write",
            Self::Delete => "delete",
        }
    }
}

/// What a step operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepTarget {
    /// A FHIR resource type such as `Observation`.
    Fhir { resource_type: String },
    /// A database table.
    Table { name: String },
    /// A cache namespace.
    Cache { namespace: String },
    /// A repository file path.
    File { path: String },
}

impl StepTarget {
    /// Scope domain for this kind of target.
    pub fn scope_domain(&self) -> &'static str {
        match self {
            Self::Fhir { .. } => "fhir",
            Self::Table { .. } => "db",
            Self::Cache { .. } => "cache",
            Self::File { .. } => "repo",
        }
    }

    /// Scope resource for this target.
    pub fn resource(&self) -> &str {
        match self {
            Self::Fhir { resource_type } => resource_type,
            Self::Table { name } => name,
            Self::Cache { namespace } => namespace,
            Self::File { path } => path,
        }
    }
}

impl std::fmt::Display for StepTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope_domain(), self.resource())
    }
}

/// Closed set of step actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    ReadRecord {
        target: StepTarget,
        #[serde(default)]
        id: Option<String>,
    },
    QueryRecords {
        target: StepTarget,
        #[serde(default)]
        filter: BTreeMap<String, String>,
        #[serde(default)]
        limit: Option<u32>,
    },
    UpdateRecord {
        target: StepTarget,
        id: String,
        changes: BTreeMap<String, Value>,
    },
    CreateRecord {
        target: StepTarget,
        body: BTreeMap<String, Value>,
    },
    DeleteRecord {
        target: StepTarget,
        id: String,
    },
    InvalidateCache {
        target: StepTarget,
        key: String,
    },
    EditFile {
        target: StepTarget,
        summary: String,
    },
}

impl StepAction {
    pub fn verb(&self) -> StepVerb {
        match self {
            Self::ReadRecord { .. } => StepVerb::Read,
            Self::QueryRecords { .. } => StepVerb::Query,
            Self::UpdateRecord { .. } | Self::CreateRecord { .. } | Self::EditFile { .. } => {
                StepVerb::Write
            }
            Self::DeleteRecord { .. } | Self::InvalidateCache { .. } => StepVerb::Delete,
        }
    }

    pub fn target(&self) -> &StepTarget {
        match self {
            Self::ReadRecord { target, .. }
            | Self::QueryRecords { target, .. }
            | Self::UpdateRecord { target, .. }
            | Self::CreateRecord { target, .. }
            | Self::DeleteRecord { target, .. }
            | Self::InvalidateCache { target, .. }
            | Self::EditFile { target, .. } => target,
        }
    }

    /// Snake-case variant name, used to pick the step schema.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadRecord { .. } => "read_record",
            Self::QueryRecords { .. } => "query_records",
            Self::UpdateRecord { .. } => "update_record",
            Self::CreateRecord { .. } => "create_record",
            Self::DeleteRecord { .. } => "delete_record",
            Self::InvalidateCache { .. } => "invalidate_cache",
            Self::EditFile { .. } => "edit_file",
        }
    }
}

/// One ordered step of a remediation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStep {
    pub description: String,
    pub action: StepAction,
    /// How to undo this step, if it can be undone.
    #[serde(default)]
    pub rollback: Option<String>,
}

/// A planned remediation for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub id: String,
    pub issue_id: String,
    pub strategy: Strategy,
    pub steps: Vec<ActionStep>,
}

impl RemediationAction {
    /// Distinct targets touched by this action, in first-seen order.
    pub fn affected_targets(&self) -> Vec<&StepTarget> {
        let mut seen: Vec<&StepTarget> = Vec::new();
        for step in &self.steps {
            let t = step.action.target();
            if !seen.contains(&t) {
                seen.push(t);
            }
        }
        seen
    }
}
