//! Cross-site scripting signature battery.

use super::risk::{SignatureSet, ThreatReport};

pub const XSS_PATTERNS: &[(&str, &str)] = &[
    ("script_tag", r"(?i)<\s*/?\s*script\b"),
    ("event_handler", r"(?i)<[^>]*\bon[a-z]+\s*="),
    ("javascript_uri", r"(?i)javascript\s*:"),
    ("vbscript_uri", r"(?i)vbscript\s*:"),
    ("embedded_frame", r"(?i)<\s*(?:iframe|frame|object|embed|applet)\b"),
    ("svg_tag", r"(?i)<\s*svg\b"),
    ("data_html_uri", r"(?i)data\s*:\s*text/html"),
    ("css_expression", r"(?i)expression\s*\("),
    ("dom_sink", r"(?i)\bdocument\s*\.\s*(?:cookie|write|location|domain)\b"),
    ("eval_call", r"(?i)\b(?:eval|settimeout|setinterval)\s*\("),
    ("encoded_angle", r"(?i)&#(?:x0*3c|0*60);?|%3c\s*script"),
    ("meta_refresh", r#"(?i)<\s*meta\b[^>]*http-equiv\s*=\s*["']?refresh"#),
];

/// Detects XSS attack signatures in free text.
#[derive(Debug, Clone)]
pub struct XssDetector {
    signatures: SignatureSet,
}

impl Default for XssDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl XssDetector {
    pub fn new() -> Self {
        Self {
            signatures: SignatureSet::compile(XSS_PATTERNS),
        }
    }

    pub fn detect(&self, text: &str) -> ThreatReport {
        self.signatures.scan(text)
    }

    /// HTML-escape every character that can open markup or break out of an
    /// attribute.
    pub fn sanitize(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '"' => out.push_str("&quot;"),
                '\'' => out.push_str("&#x27;"),
                '/' => out.push_str("&#x2F;"),
                '`' => out.push_str("&#x60;"),
                _ => out.push(c),
            }
        }
        out
    }
}
