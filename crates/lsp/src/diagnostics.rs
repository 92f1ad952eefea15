use crate::backends::{
    AnalysisRequest, BackendRegistry, Capability, CapabilityResult, Finding, FindingSeverity,
};
use crate::document::DocumentStore;
use crate::server::{ServerState, Task};
use crossbeam_channel::Sender;
use lsp_types::notification::Notification;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Schedules one analysis cycle for the document's current version.
///
/// Called on the loop thread after every accepted mutation. With a
/// debounce window configured the cycle is deferred through a timer
/// wake-up, so a burst of keystrokes coalesces into a single trailing
/// run; the window is a policy knob, never a correctness requirement.
pub(crate) fn schedule(state: &mut ServerState, uri: lsp_types::Uri) {
    let Ok(doc) = state.documents.get(&uri) else {
        debug!("diagnostics::schedule - {:?} is not open", uri);
        return;
    };
    let version = doc.version;
    match state.config.debounce {
        Some(window) if !window.is_zero() => {
            debug!(
                "diagnostics::schedule - arming {:?} timer for {:?} v{}",
                window, uri, version
            );
            let sender = state.task_sender.clone();
            // A plain timer thread, not a pool job: a sleeping timer must
            // never occupy an analysis worker.
            thread::spawn(move || {
                thread::sleep(window);
                // The loop may already be gone on shutdown.
                let _ = sender.send(Task::AnalysisDue { uri, version });
            });
        }
        _ => spawn_analysis(state, uri, version),
    }
}

/// Debounce wake-up: only a still-current version gets its analysis job.
/// A superseded wake-up is dropped; the newer edit armed its own timer.
pub(crate) fn analysis_due(state: &mut ServerState, uri: lsp_types::Uri, version: i32) {
    match state.documents.get(&uri) {
        Ok(doc) if doc.version == version => spawn_analysis(state, uri, version),
        Ok(doc) => debug!(
            "diagnostics::analysis_due - wake-up for {:?} v{} superseded by v{}",
            uri, version, doc.version
        ),
        Err(_) => debug!(
            "diagnostics::analysis_due - {:?} closed before wake-up",
            uri
        ),
    }
}

/// Snapshots the buffer and hands the gateway call to the thread pool.
/// The dispatch path never blocks on analysis; in-flight jobs for older
/// versions are not preempted, their results die at the publisher.
pub(crate) fn spawn_analysis(state: &mut ServerState, uri: lsp_types::Uri, version: i32) {
    let Ok(doc) = state.documents.get(&uri) else {
        return;
    };
    let request = AnalysisRequest::new(
        uri,
        version,
        doc.text_string(),
        Capability::Diagnostics,
    );
    let backends = Arc::clone(&state.backends);
    let sender = state.task_sender.clone();
    state.thread_pool.execute(move || {
        run_analysis(backends, request, sender);
    });
}

/// Thread-pool job body: one gateway request, the outcome handed back to
/// the loop for the version-guarded publish.
fn run_analysis(backends: Arc<BackendRegistry>, request: AnalysisRequest, sender: Sender<Task>) {
    debug!(
        "diagnostics::run_analysis - {:?} v{}",
        request.uri, request.version
    );
    let uri = request.uri.clone();
    let version = request.version;
    let findings = match backends.request(&request) {
        Ok(CapabilityResult::Diagnostics(findings)) => findings,
        Ok(other) => {
            tracing::warn!(
                "diagnostics::run_analysis - backend returned a non-diagnostics result: {:?}",
                other
            );
            return;
        }
        Err(err) => {
            // Terminal for this cycle. Nothing is published, so the last
            // good diagnostics stay visible; the client just gets told.
            tracing::warn!("diagnostics::run_analysis - {}", err);
            let notification = lsp_server::Notification::new(
                lsp_types::notification::LogMessage::METHOD.to_owned(),
                lsp_types::LogMessageParams {
                    typ: lsp_types::MessageType::WARNING,
                    message: format!("analysis skipped for this revision: {err}"),
                },
            );
            let _ = sender.send(Task::Notify(notification));
            return;
        }
    };
    if sender
        .send(Task::Diagnostics {
            uri,
            version,
            findings,
        })
        .is_err()
    {
        debug!("diagnostics::run_analysis - server loop is gone, result dropped");
    }
}

/// Last version successfully published for a uri.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishRecord {
    pub version: i32,
}

/// Emits `textDocument/publishDiagnostics`, guarded so a set computed for
/// an outdated buffer can never replace a newer one.
#[derive(Default)]
pub struct DiagnosticsPublisher {
    published: HashMap<lsp_types::Uri, PublishRecord>,
}

impl DiagnosticsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The buffer version is re-read here, at publish time, because it may
    /// have advanced again while the analysis was in flight. A stale or
    /// closed-document result returns `None` and is dropped silently.
    pub fn publish(
        &mut self,
        documents: &DocumentStore,
        uri: lsp_types::Uri,
        analyzed_version: i32,
        findings: Vec<Finding>,
    ) -> Option<lsp_server::Notification> {
        let current = match documents.get(&uri) {
            Ok(doc) => doc.version,
            Err(_) => {
                debug!("diagnostics::publish - {:?} closed, result dropped", uri);
                return None;
            }
        };
        if current != analyzed_version {
            debug!(
                "diagnostics::publish - stale result for {:?}: analyzed v{}, buffer at v{}",
                uri, analyzed_version, current
            );
            return None;
        }
        let diagnostics = findings.into_iter().map(to_lsp_diagnostic).collect();
        self.published.insert(
            uri.clone(),
            PublishRecord {
                version: analyzed_version,
            },
        );
        Some(publish_notification(uri, diagnostics, Some(analyzed_version)))
    }

    /// Close-time cleanup: one empty set, emitted before the registry
    /// drops the buffer.
    pub fn clear(&mut self, uri: lsp_types::Uri) -> lsp_server::Notification {
        self.published.remove(&uri);
        publish_notification(uri, Vec::new(), None)
    }

    pub fn last_published(&self, uri: &lsp_types::Uri) -> Option<PublishRecord> {
        self.published.get(uri).copied()
    }
}

fn publish_notification(
    uri: lsp_types::Uri,
    diagnostics: Vec<lsp_types::Diagnostic>,
    version: Option<i32>,
) -> lsp_server::Notification {
    lsp_server::Notification::new(
        lsp_types::notification::PublishDiagnostics::METHOD.to_owned(),
        lsp_types::PublishDiagnosticsParams {
            uri,
            diagnostics,
            version,
        },
    )
}

fn to_lsp_diagnostic(finding: Finding) -> lsp_types::Diagnostic {
    lsp_types::Diagnostic {
        range: lsp_types::Range {
            start: lsp_types::Position {
                line: finding.line,
                character: finding.start_col,
            },
            end: lsp_types::Position {
                line: finding.line,
                character: finding.end_col,
            },
        },
        severity: Some(severity_to_lsp(finding.severity)),
        message: finding.message,
        source: Some("companion".to_string()),
        code: finding.code.map(lsp_types::NumberOrString::String),
        ..lsp_types::Diagnostic::default()
    }
}

fn severity_to_lsp(severity: FindingSeverity) -> lsp_types::DiagnosticSeverity {
    match severity {
        FindingSeverity::Error => lsp_types::DiagnosticSeverity::ERROR,
        FindingSeverity::Warning => lsp_types::DiagnosticSeverity::WARNING,
        FindingSeverity::Information => lsp_types::DiagnosticSeverity::INFORMATION,
        FindingSeverity::Hint => lsp_types::DiagnosticSeverity::HINT,
    }
}
