//! Minimal semver parsing for tool versions (no external dep).

use std::cmp::Ordering;

/// Parsed `MAJOR.MINOR.PATCH[-pre][+build]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl Version {
    pub fn parse(input: &str) -> Option<Self> {
        // Build metadata never affects identity or ordering.
        let without_build = match input.split_once('+') {
            Some((v, build)) => {
                if !valid_identifiers(build) {
                    return None;
                }
                v
            }
            None => input,
        };

        let (core, pre) = match without_build.split_once('-') {
            Some((v, p)) => {
                if !valid_identifiers(p) {
                    return None;
                }
                (v, Some(p.to_string()))
            }
            None => (without_build, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return None;
        }

        Some(Self {
            major: numeric(parts[0])?,
            minor: numeric(parts[1])?,
            patch: numeric(parts[2])?,
            pre,
        })
    }

    /// Pre-release sorts below the release with the same numbers.
    pub fn cmp_version(&self, other: &Self) -> Ordering {
        let tuple_cmp =
            (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch));
        if tuple_cmp != Ordering::Equal {
            return tuple_cmp;
        }
        match (&self.pre, &other.pre) {
            (None, None) => Ordering::Equal,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }
}

fn numeric(part: &str) -> Option<u64> {
    if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if part.len() > 1 && part.starts_with('0') {
        return None;
    }
    part.parse().ok()
}

fn valid_identifiers(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|id| {
            !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
