use super::{AnalysisBackend, AnalysisRequest, Capability, CapabilityResult, Finding, FindingSeverity};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

/// Static regex for parsing analyzer output.
/// Pattern: "[file:]line:col: severity: message", one finding per line.
static FINDING_LINE_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^(?:[^:]*:)?(\d+):(\d+):\s*([a-zA-Z]+):\s*(.*)$")
        .expect("Failed to compile finding line regex")
});

/// Diagnostics backend that shells out to a configured analyzer.
///
/// The buffer is piped over stdin (the authoritative text may be newer
/// than anything on disk), and stdout/stderr are parsed line by line for
/// findings. A non-zero exit status is normal for linters that found
/// something; only a failure to execute counts as a backend fault.
#[derive(Debug, Clone)]
pub struct ExternalCommandBackend {
    /// Path to the analyzer executable.
    command: PathBuf,
    /// Workspace root the analyzer runs in, so it can resolve its own
    /// configuration files.
    working_dir: PathBuf,
}

impl ExternalCommandBackend {
    /// Tilde in the configured command is expanded, same as user-supplied
    /// paths elsewhere in the configuration.
    pub fn new(command: impl AsRef<str>, working_dir: PathBuf) -> Self {
        Self {
            command: PathBuf::from(shellexpand::tilde(command.as_ref()).as_ref()),
            working_dir,
        }
    }

    fn run(&self, text: &str) -> Result<Vec<Finding>> {
        debug!(
            "external::run - piping {} bytes to {}",
            text.len(),
            self.command.display()
        );

        let mut child = Command::new(&self.command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| {
                format!("Failed to spawn analyzer: {}", self.command.display())
            })?;

        {
            let mut stdin = child
                .stdin
                .take()
                .context("analyzer child has no stdin handle")?;
            stdin
                .write_all(text.as_bytes())
                .context("Failed to write buffer to analyzer stdin")?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for analyzer: {}", self.command.display()))?;

        debug!(
            "external::run - analyzer exited with {}, {} stdout bytes, {} stderr bytes",
            output.status,
            output.stdout.len(),
            output.stderr.len()
        );

        let mut findings = parse_output(&output.stdout);
        findings.extend(parse_output(&output.stderr));
        Ok(findings)
    }
}

/// Parses raw analyzer output. Lines that do not match the expected shape
/// are skipped; analyzers interleave banners and summaries with findings.
fn parse_output(raw: &[u8]) -> Vec<Finding> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(err) => {
            debug!("external::parse_output - output is not UTF-8: {}", err);
            return Vec::new();
        }
    };

    let mut findings = Vec::new();
    for line in text.lines() {
        let Some(caps) = FINDING_LINE_REGEX.captures(line) else {
            continue;
        };
        // Analyzers report 1-based positions; the protocol wants 0-based.
        let Ok(line_number) = caps[1].parse::<u32>() else {
            continue;
        };
        let Ok(column) = caps[2].parse::<u32>() else {
            continue;
        };
        let severity =
            FindingSeverity::from_str(&caps[3].to_lowercase()).unwrap_or(FindingSeverity::Warning);
        let start_col = column.saturating_sub(1);
        findings.push(Finding::new(
            line_number.saturating_sub(1),
            start_col,
            start_col,
            severity,
            caps[4].trim().to_string(),
        ));
    }
    findings
}

impl AnalysisBackend for ExternalCommandBackend {
    fn analyze(&self, request: &AnalysisRequest) -> Result<CapabilityResult> {
        match request.capability {
            Capability::Diagnostics => Ok(CapabilityResult::Diagnostics(self.run(&request.text)?)),
            other => anyhow::bail!("external analyzer does not serve '{other}'"),
        }
    }

    fn name(&self) -> &'static str {
        "external"
    }

    fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_output_converts_to_zero_based() {
        let raw = b"3:5: warning: shadowed variable\n10:1: error: unbalanced brace\n";
        let findings = parse_output(raw);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].line, 2);
        assert_eq!(findings[0].start_col, 4);
        assert_eq!(findings[0].severity, FindingSeverity::Warning);
        assert_eq!(findings[0].message, "shadowed variable");
        assert_eq!(findings[1].line, 9);
        assert_eq!(findings[1].severity, FindingSeverity::Error);
    }

    #[test]
    fn parse_output_accepts_file_prefix() {
        let raw = b"<stdin>:7:2: hint: prefer a named constant\n";
        let findings = parse_output(raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 6);
        assert_eq!(findings[0].start_col, 1);
        assert_eq!(findings[0].severity, FindingSeverity::Hint);
    }

    #[test]
    fn parse_output_skips_unstructured_lines() {
        let raw = b"analyzing buffer...\n4:4: info: consider a doc comment\ndone, 1 issue\n";
        let findings = parse_output(raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, FindingSeverity::Information);
    }

    #[test]
    fn parse_output_defaults_unknown_severity_to_warning() {
        let raw = b"1:1: grumble: odd indentation\n";
        let findings = parse_output(raw);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, FindingSeverity::Warning);
    }

    #[test]
    fn missing_command_is_unavailable() {
        let backend = ExternalCommandBackend::new(
            "/nonexistent/analyzer/that/does/not/exist",
            PathBuf::from("."),
        );
        assert!(!backend.is_available());
    }

    #[test]
    fn missing_command_faults_the_analyze_call() {
        let backend = ExternalCommandBackend::new(
            "/nonexistent/analyzer/that/does/not/exist",
            PathBuf::from("."),
        );
        let request = AnalysisRequest::new(
            lsp_types::Uri::from_str("file:///demo.rs").unwrap(),
            1,
            "text".to_string(),
            Capability::Diagnostics,
        );
        assert!(backend.analyze(&request).is_err());
    }

    #[test]
    fn non_diagnostics_capability_is_a_fault() {
        let backend = ExternalCommandBackend::new("/bin/true", PathBuf::from("."));
        let request = AnalysisRequest::new(
            lsp_types::Uri::from_str("file:///demo.rs").unwrap(),
            1,
            "text".to_string(),
            Capability::Explain,
        );
        assert!(backend.analyze(&request).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_real_analyzer_script() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let script = dir.path().join("fake-analyzer.sh");
        fs::write(
            &script,
            "#!/bin/sh\ncat > /dev/null\necho '2:1: warning: from the fake analyzer'\nexit 1\n",
        )
        .expect("Failed to write script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");

        let backend =
            ExternalCommandBackend::new(script.to_str().unwrap(), dir.path().to_path_buf());
        assert!(backend.is_available());

        let request = AnalysisRequest::new(
            lsp_types::Uri::from_str("file:///demo.rs").unwrap(),
            1,
            "line one\nline two\n".to_string(),
            Capability::Diagnostics,
        );
        let result = backend.analyze(&request).unwrap();
        let CapabilityResult::Diagnostics(findings) = result else {
            panic!("expected diagnostics result");
        };
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].line, 1);
        assert_eq!(findings[0].message, "from the fake analyzer");
    }
}
