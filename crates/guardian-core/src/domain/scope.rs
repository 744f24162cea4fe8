//! Scope strings of the form `{domain}.{action}:{resource}`.

use serde::{Deserialize, Serialize};

/// A single permission scope, e.g. `fhir.read:Observation`.
///
/// Stored in canonical string form so it can travel in token claims unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

impl Scope {
    /// Build a scope from its three parts.
    pub fn new(domain: &str, action: &str, resource: &str) -> Self {
        Scope(format!("{domain}.{action}:{resource}"))
    }

    /// Parse and validate a scope string.
    pub fn parse(s: &str) -> Option<Self> {
        let (head, resource) = s.split_once(':')?;
        let (domain, action) = head.split_once('.')?;
        let valid_part = |p: &str| {
            !p.is_empty()
                && p.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'))
        };
        if !valid_part(domain) || !valid_part(action) {
            return None;
        }
        if resource.is_empty() || resource.chars().any(char::is_whitespace) {
            return None;
        }
        Some(Scope(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    pub fn action(&self) -> &str {
        self.0
            .split_once('.')
            .and_then(|(_, rest)| rest.split_once(':'))
            .map(|(action, _)| action)
            .unwrap_or_default()
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(_, r)| r).unwrap_or_default()
    }
}

impl TryFrom<String> for Scope {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Scope::parse(&s).ok_or_else(|| format!("invalid scope '{s}'"))
    }
}

impl From<Scope> for String {
    fn from(s: Scope) -> Self {
        s.0
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
