//! Risk levels and compiled attack-signature batteries.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Risk bucket derived from the number of distinct matched signatures.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// 0 → none, 1 → low, 2–3 → medium, 4–5 → high, more → critical.
    ///
    /// Severity of the individual signature is not considered.
    pub fn from_match_count(count: usize) -> Self {
        match count {
            0 => Self::None,
            1 => Self::Low,
            2..=3 => Self::Medium,
            4..=5 => Self::High,
            _ => Self::Critical,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of scanning one string against a signature battery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ThreatReport {
    pub risk: RiskLevel,
    /// Names of the distinct signatures that matched, in table order.
    pub signatures: Vec<&'static str>,
}

impl ThreatReport {
    pub fn detected(&self) -> bool {
        !self.signatures.is_empty()
    }
}

/// A named pattern table compiled once.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    patterns: Vec<(&'static str, Regex)>,
}

impl SignatureSet {
    /// Compile a `(name, pattern)` table. Patterns that fail to compile are
    /// skipped with a warning.
    pub fn compile(table: &[(&'static str, &'static str)]) -> Self {
        let patterns = table
            .iter()
            .filter_map(|(name, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((*name, re)),
                Err(e) => {
                    tracing::warn!(signature = %name, error = %e, "signature failed to compile");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn scan(&self, text: &str) -> ThreatReport {
        let signatures: Vec<&'static str> = self
            .patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(name, _)| *name)
            .collect();
        ThreatReport {
            risk: RiskLevel::from_match_count(signatures.len()),
            signatures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucketing() {
        let expected = [
            (0, RiskLevel::None),
            (1, RiskLevel::Low),
            (2, RiskLevel::Medium),
            (3, RiskLevel::Medium),
            (4, RiskLevel::High),
            (5, RiskLevel::High),
            (6, RiskLevel::Critical),
            (40, RiskLevel::Critical),
        ];
        for (count, level) in expected {
            assert_eq!(RiskLevel::from_match_count(count), level, "count {count}");
        }
    }

    #[test]
    fn test_ordering() {
        assert!(RiskLevel::None < RiskLevel::Low);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_bad_pattern_skipped() {
        let set = SignatureSet::compile(&[("ok", r"abc"), ("broken", r"(unclosed")]);
        assert_eq!(set.len(), 1);
        let report = set.scan("xxabcxx");
        assert_eq!(report.signatures, vec!["ok"]);
        assert_eq!(report.risk, RiskLevel::Low);
    }
}
