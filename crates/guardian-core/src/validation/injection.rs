//! SQL-injection signature battery.

use super::risk::{SignatureSet, ThreatReport};

pub const SQL_INJECTION_PATTERNS: &[(&str, &str)] = &[
    ("union_select", r"(?i)\bunion\b(?:\s+all)?\s+select\b"),
    ("tautology", r"(?i)\bor\s+'?(\w+)'?\s*=\s*'?\w+'?|'\s*or\s*'[^']*'\s*=\s*'"),
    ("quote_break", r"(?i)'\s*(?:and|or)\s+['\d(]"),
    ("comment_terminator", r"(?:'\s*--|;\s*--|/\*.*?\*/|'\s*#)"),
    (
        "stacked_query",
        r"(?i);\s*(?:drop|delete|insert|update|alter|create|truncate|exec)\b",
    ),
    ("drop_statement", r"(?i)\bdrop\s+(?:table|database|schema)\b"),
    (
        "time_delay",
        r"(?i)\b(?:sleep|benchmark|pg_sleep)\s*\(|\bwaitfor\s+delay\b",
    ),
    (
        "schema_probe",
        r"(?i)\binformation_schema\b|\bsys(?:objects|columns)\b|\bpg_catalog\b",
    ),
    ("extended_proc", r"(?i)\b(?:exec|execute)\s+(?:xp_|sp_)\w+"),
    ("hex_literal", r"(?i)\b0x[0-9a-f]{8,}\b"),
    ("char_encoding", r"(?i)\b(?:char|nchar|chr)\s*\(\s*\d+"),
];

/// Detects SQL-injection attack signatures in free text.
#[derive(Debug, Clone)]
pub struct SqlInjectionDetector {
    signatures: SignatureSet,
}

impl Default for SqlInjectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlInjectionDetector {
    pub fn new() -> Self {
        Self {
            signatures: SignatureSet::compile(SQL_INJECTION_PATTERNS),
        }
    }

    pub fn detect(&self, text: &str) -> ThreatReport {
        self.signatures.scan(text)
    }

    /// Neutralize SQL metacharacters: quotes doubled, comment markers and
    /// statement separators removed, NUL bytes dropped.
    pub fn sanitize(&self, text: &str) -> String {
        let stripped = text
            .replace("--", "")
            .replace("/*", "")
            .replace("*/", "");
        let mut out = String::with_capacity(stripped.len());
        for c in stripped.chars() {
            match c {
                '\'' => out.push_str("''"),
                ';' | '\0' => {}
                '\\' => out.push_str("\\\\"),
                _ => out.push(c),
            }
        }
        out
    }
}
