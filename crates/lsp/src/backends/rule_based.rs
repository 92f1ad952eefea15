use super::{
    AnalysisBackend, AnalysisRequest, Capability, CapabilityResult, Finding, FindingSeverity,
    Suggestion,
};
use anyhow::Result;
use itertools::Itertools;
use std::sync::LazyLock;
use tracing::debug;

/// Task markers flagged for the learner's attention.
static MARKER_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\b(TODO|FIXME|HACK|XXX)\b").expect("Failed to compile marker regex")
});

/// Identifier-shaped words, three characters or longer.
static IDENTIFIER_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").expect("Failed to compile identifier regex")
});

/// The built-in companion backend: plain string-matching heuristics over
/// the buffer. Always available, serves every capability, and sits at the
/// bottom of the fallback chain by default so configured external
/// analyzers win when they are healthy.
#[derive(Debug, Clone)]
pub struct RuleBasedBackend {
    max_line_length: usize,
}

impl RuleBasedBackend {
    pub fn new() -> Self {
        Self {
            max_line_length: 100,
        }
    }

    /// Scans the buffer line by line for marker, length, and whitespace
    /// findings.
    fn scan(&self, text: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line_idx = idx as u32;

            for m in MARKER_REGEX.find_iter(line) {
                findings.push(
                    Finding::new(
                        line_idx,
                        utf16_len(&line[..m.start()]),
                        utf16_len(&line[..m.end()]),
                        FindingSeverity::Information,
                        format!("unresolved {} marker", m.as_str()),
                    )
                    .with_code("task-marker"),
                );
            }

            let line_units = utf16_len(line);
            if line_units as usize > self.max_line_length {
                findings.push(
                    Finding::new(
                        line_idx,
                        self.max_line_length as u32,
                        line_units,
                        FindingSeverity::Warning,
                        format!("line exceeds {} characters", self.max_line_length),
                    )
                    .with_code("long-line"),
                );
            }

            let trimmed = line.trim_end();
            if trimmed.len() != line.len() {
                findings.push(
                    Finding::new(
                        line_idx,
                        utf16_len(trimmed),
                        line_units,
                        FindingSeverity::Hint,
                        "line has trailing whitespace",
                    )
                    .with_code("trailing-whitespace"),
                );
            }
        }
        findings
    }

    /// Produces a short prose summary of a snippet. Deliberately naive;
    /// richer explanation sources plug in as higher-priority backends.
    fn explain(&self, text: &str) -> String {
        let line_count = text.lines().count();
        let word_count = text.split_whitespace().count();
        let marker_count = MARKER_REGEX.find_iter(text).count();

        let mut explanation = if line_count > 1 {
            format!("This snippet spans {line_count} lines and {word_count} words.")
        } else {
            format!("This line contains {word_count} words.")
        };
        if marker_count > 0 {
            explanation.push_str(&format!(
                " It carries {marker_count} unresolved task marker(s) worth revisiting."
            ));
        }
        explanation
    }

    /// Harvests identifier-shaped words from the buffer as completion
    /// candidates, first occurrence first.
    fn harvest(&self, text: &str) -> Vec<Suggestion> {
        IDENTIFIER_REGEX
            .find_iter(text)
            .map(|m| m.as_str())
            .unique()
            .map(|word| Suggestion::new(word).with_detail("document identifier"))
            .collect()
    }
}

impl Default for RuleBasedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisBackend for RuleBasedBackend {
    fn analyze(&self, request: &AnalysisRequest) -> Result<CapabilityResult> {
        debug!(
            "rule_based::analyze - {} for {:?} v{}",
            request.capability, request.uri, request.version
        );
        Ok(match request.capability {
            Capability::Diagnostics => CapabilityResult::Diagnostics(self.scan(&request.text)),
            Capability::Explain => CapabilityResult::Explanation(self.explain(&request.text)),
            Capability::Complete => CapabilityResult::Completions(self.harvest(&request.text)),
        })
    }

    fn name(&self) -> &'static str {
        "builtin"
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}
