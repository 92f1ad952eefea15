use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// A named kind of backend service a provider may support.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Scan a buffer and report findings.
    Diagnostics,
    /// Produce a prose explanation for a code snippet.
    Explain,
    /// Produce completion candidates for a buffer.
    Complete,
}

/// Immutable snapshot handed to backends.
///
/// Built on the loop thread at schedule time and moved into the worker
/// closure, so a backend can never observe edits that arrive while its
/// call is in flight.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub uri: lsp_types::Uri,
    pub version: i32,
    pub text: String,
    pub capability: Capability,
}

impl AnalysisRequest {
    pub fn new(uri: lsp_types::Uri, version: i32, text: String, capability: Capability) -> Self {
        Self {
            uri,
            version,
            text,
            capability,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    Warning,
    #[strum(serialize = "info", serialize = "information")]
    Information,
    Hint,
}

/// One analysis finding, in editor coordinates: 0-based line, UTF-16
/// code unit columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub line: u32,
    pub start_col: u32,
    pub end_col: u32,
    pub severity: FindingSeverity,
    pub message: String,
    pub code: Option<String>,
}

impl Finding {
    pub fn new(
        line: u32,
        start_col: u32,
        end_col: u32,
        severity: FindingSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            line,
            start_col,
            end_col,
            severity,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// A completion candidate produced by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub label: String,
    pub detail: Option<String>,
}

impl Suggestion {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

// Lets the completion handler feed suggestions straight into the fuzzy
// matcher, which ranks anything string-like.
impl AsRef<str> for Suggestion {
    fn as_ref(&self) -> &str {
        &self.label
    }
}

/// What a backend returned for one request. The pipeline treats the
/// content as opaque; only the publisher and the request handlers look
/// inside.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityResult {
    Diagnostics(Vec<Finding>),
    Explanation(String),
    Completions(Vec<Suggestion>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn capability_tag_round_trip() {
        assert_eq!(Capability::Diagnostics.to_string(), "diagnostics");
        assert_eq!(
            Capability::from_str("explain").unwrap(),
            Capability::Explain
        );
        assert!(Capability::from_str("telemetry").is_err());
    }

    #[test]
    fn capability_deserializes_from_config_json() {
        let caps: Vec<Capability> =
            serde_json::from_str(r#"["diagnostics", "complete"]"#).unwrap();
        assert_eq!(caps, vec![Capability::Diagnostics, Capability::Complete]);
    }

    #[test]
    fn severity_parses_tool_spellings() {
        assert_eq!(
            FindingSeverity::from_str("warning").unwrap(),
            FindingSeverity::Warning
        );
        assert_eq!(
            FindingSeverity::from_str("info").unwrap(),
            FindingSeverity::Information
        );
        assert_eq!(
            FindingSeverity::from_str("information").unwrap(),
            FindingSeverity::Information
        );
    }

    #[test]
    fn finding_builder() {
        let finding = Finding::new(3, 0, 5, FindingSeverity::Warning, "too long")
            .with_code("long-line");
        assert_eq!(finding.line, 3);
        assert_eq!(finding.code.as_deref(), Some("long-line"));
    }
}
