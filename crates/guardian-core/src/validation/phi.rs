//! Protected Health Information detection and redaction.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhiType {
    Ssn,
    Phone,
    Email,
    Mrn,
    IpAddress,
    DateOfBirth,
    ZipPlus4,
    Vin,
    Url,
    Biometric,
}

impl PhiType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ssn => "ssn",
            Self::Phone => "phone",
            Self::Email => "email",
            Self::Mrn => "mrn",
            Self::IpAddress => "ip_address",
            Self::DateOfBirth => "date_of_birth",
            Self::ZipPlus4 => "zip_plus4",
            Self::Vin => "vin",
            Self::Url => "url",
            Self::Biometric => "biometric",
        }
    }

    pub fn placeholder(self) -> &'static str {
        match self {
            Self::Ssn => "[REDACTED_SSN]",
            Self::Phone => "[REDACTED_PHONE]",
            Self::Email => "[REDACTED_EMAIL]",
            Self::Mrn => "[REDACTED_MRN]",
            Self::IpAddress => "[REDACTED_IP]",
            Self::DateOfBirth => "[REDACTED_DOB]",
            Self::ZipPlus4 => "[REDACTED_ZIP]",
            Self::Vin => "[REDACTED_VIN]",
            Self::Url => "[REDACTED_URL]",
            Self::Biometric => "[REDACTED_BIOMETRIC]",
        }
    }
}

impl std::fmt::Display for PhiType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const PHI_PATTERNS: &[(PhiType, &str)] = &[
    (PhiType::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
    (
        PhiType::Phone,
        r"(?:\+?1[-.\s]?)?(?:\(\d{3}\)\s?|\b\d{3}[-.\s])\d{3}[-.\s]\d{4}\b",
    ),
    (
        PhiType::Email,
        r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
    ),
    (PhiType::Mrn, r"(?i)\bMRN[:#\s-]*\d{6,10}\b"),
    (
        PhiType::IpAddress,
        r"\b(?:(?:25[0-5]|2[0-4]\d|1?\d?\d)\.){3}(?:25[0-5]|2[0-4]\d|1?\d?\d)\b",
    ),
    (
        PhiType::DateOfBirth,
        r"(?i)\b(?:DOB|date of birth|born(?: on)?)[:\s]*\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b",
    ),
    (PhiType::ZipPlus4, r"\b\d{5}-\d{4}\b"),
    (PhiType::Vin, r"\b[A-HJ-NPR-Z0-9]{17}\b"),
    (PhiType::Url, r#"\bhttps?://[^\s<>"']+"#),
    (
        PhiType::Biometric,
        r"(?i)\b(?:fingerprints?|retinal? scans?|iris scans?|voice ?prints?|face ?prints?|facial recognition|dna (?:profile|sequence))\b",
    ),
];

/// One detected span, as byte offsets into the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhiMatch {
    pub phi_type: PhiType,
    pub start: usize,
    pub end: usize,
}

/// Fixed PHI pattern battery.
#[derive(Debug, Clone)]
pub struct PhiDetector {
    patterns: Vec<(PhiType, Regex)>,
}

impl Default for PhiDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PhiDetector {
    pub fn new() -> Self {
        let patterns = PHI_PATTERNS
            .iter()
            .filter_map(|(kind, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((*kind, re)),
                Err(e) => {
                    tracing::warn!(phi_type = %kind, error = %e, "PHI pattern failed to compile");
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// All matches, ordered by start offset (longest first on ties).
    pub fn detect(&self, text: &str) -> Vec<PhiMatch> {
        let mut matches: Vec<PhiMatch> = self
            .patterns
            .iter()
            .flat_map(|(kind, re)| {
                re.find_iter(text).map(move |m| PhiMatch {
                    phi_type: *kind,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();
        matches.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));
        matches
    }

    pub fn contains_phi(&self, text: &str) -> bool {
        self.patterns.iter().any(|(_, re)| re.is_match(text))
    }

    /// Distinct PHI types present in `text`.
    pub fn types(&self, text: &str) -> BTreeSet<PhiType> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Replace every detected span with its typed placeholder.
    ///
    /// Overlapping spans are merged first, keeping the type of the span that
    /// starts earliest. Replacement runs back-to-front so earlier offsets stay
    /// valid. Placeholders never match a pattern, so redaction is idempotent.
    pub fn redact(&self, text: &str) -> String {
        let mut merged: Vec<PhiMatch> = Vec::new();
        for m in self.detect(text) {
            match merged.last_mut() {
                Some(last) if m.start < last.end => last.end = last.end.max(m.end),
                _ => merged.push(m),
            }
        }

        let mut out = text.to_string();
        for m in merged.iter().rev() {
            out.replace_range(m.start..m.end, m.phi_type.placeholder());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for (kind, pattern) in PHI_PATTERNS {
            assert!(Regex::new(pattern).is_ok(), "{kind} does not compile");
        }
        assert_eq!(PhiDetector::new().patterns.len(), PHI_PATTERNS.len());
    }

    #[test]
    fn test_detects_each_type() {
        let d = PhiDetector::new();
        let cases = [
            ("SSN 123-45-6789 on file", PhiType::Ssn),
            ("call (555) 123-4567 today", PhiType::Phone),
            ("call 555-123-4567 today", PhiType::Phone),
            ("mail jane.doe@example.org now", PhiType::Email),
            ("MRN: 00123456", PhiType::Mrn),
            ("from 192.168.10.4", PhiType::IpAddress),
            ("DOB: 04/12/1961", PhiType::DateOfBirth),
            ("zip 02139-4307", PhiType::ZipPlus4),
            ("car 1HGCM82633A004352", PhiType::Vin),
            ("see https://portal.example.org/p/9", PhiType::Url),
            ("fingerprint enrolled", PhiType::Biometric),
        ];
        for (text, expected) in cases {
            assert!(d.types(text).contains(&expected), "{text} -> {expected}");
        }
    }

    #[test]
    fn test_no_false_positive_on_clinical_text() {
        let d = PhiDetector::new();
        assert!(!d.contains_phi("HbA1c 7.2 percent, dose 500 mg twice daily"));
    }

    #[test]
    fn test_spans_are_offsets() {
        let d = PhiDetector::new();
        let text = "ssn 123-45-6789";
        let m = d.detect(text);
        assert_eq!(m.len(), 1);
        assert_eq!(&text[m[0].start..m[0].end], "123-45-6789");
    }

    #[test]
    fn test_redact() {
        let d = PhiDetector::new();
        let out = d.redact("Patient 123-45-6789 emailed jane@example.org");
        assert_eq!(out, "Patient [REDACTED_SSN] emailed [REDACTED_EMAIL]");
    }

    #[test]
    fn test_redact_is_idempotent() {
        let d = PhiDetector::new();
        let inputs = [
            "SSN 123-45-6789, phone 555-123-4567, MRN 1234567",
            "visit https://x.example.org/u?mail=a@b.co from 10.0.0.1",
            "DOB 1/2/1990 zip 12345-6789 fingerprint",
            "no phi here at all",
        ];
        for input in inputs {
            let once = d.redact(input);
            assert_eq!(d.redact(&once), once, "{input}");
        }
    }

    #[test]
    fn test_overlapping_spans_merge() {
        let d = PhiDetector::new();
        // The URL contains an email address; one placeholder covers both.
        let out = d.redact("go to https://x.example.org/u?mail=a@b.co now");
        assert_eq!(out, "go to [REDACTED_URL] now");
    }
}
