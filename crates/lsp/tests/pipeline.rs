//! End-to-end exercises of the document/diagnostics pipeline through the
//! public API: registry, applicator, gateway, publisher.

use companion_language_server::backends::{
    AnalysisBackend, AnalysisRequest, BackendRegistry, Capability, CapabilityResult, Finding,
    FindingSeverity,
};
use companion_language_server::diagnostics::DiagnosticsPublisher;
use companion_language_server::document::DocumentStore;
use companion_language_server::edits::{apply, Edit, EditBatch};
use std::str::FromStr;

fn uri(s: &str) -> lsp_types::Uri {
    lsp_types::Uri::from_str(s).unwrap()
}

fn range_edit(
    start_line: u32,
    start_col: u32,
    end_line: u32,
    end_col: u32,
    text: &str,
) -> Edit {
    Edit::Range {
        start_line,
        start_col,
        end_line,
        end_col,
        text: text.to_string(),
    }
}

fn published_params(
    notification: lsp_server::Notification,
) -> lsp_types::PublishDiagnosticsParams {
    serde_json::from_value(notification.params).unwrap()
}

/// Analyzes the document's current state the way a worker job would:
/// against a snapshot taken at schedule time.
fn analyze(
    registry: &BackendRegistry,
    store: &DocumentStore,
    uri: &lsp_types::Uri,
) -> (i32, Vec<Finding>) {
    let doc = store.get(uri).unwrap();
    let request = AnalysisRequest::new(
        uri.clone(),
        doc.version,
        doc.text_string(),
        Capability::Diagnostics,
    );
    match registry.request(&request).unwrap() {
        CapabilityResult::Diagnostics(findings) => (doc.version, findings),
        other => panic!("unexpected result: {:?}", other),
    }
}

fn builtin_registry() -> BackendRegistry {
    let config = companion_language_server::config::Config::new(std::path::PathBuf::new());
    BackendRegistry::from_config(&config)
}

#[test]
fn edits_accumulate_and_versions_count_batches() {
    let mut store = DocumentStore::new();
    let uri = uri("file:///notes.txt");
    store.open(uri.clone(), "hello world", 1);

    let batches = [
        EditBatch::new(2, vec![range_edit(0, 5, 0, 5, ",")]),
        EditBatch::new(3, vec![range_edit(0, 7, 0, 12, "there")]),
        EditBatch::new(4, vec![range_edit(0, 12, 0, 12, "\nsecond line")]),
    ];
    for batch in &batches {
        let doc = store.get(&uri).unwrap();
        let next = apply(doc, batch).unwrap();
        store.replace(&uri, next);
    }

    let doc = store.get(&uri).unwrap();
    assert_eq!(doc.version, 1 + batches.len() as i32);
    assert_eq!(doc.text_string(), "hello, there\nsecond line");
}

#[test]
fn analysis_of_current_version_publishes() {
    let mut store = DocumentStore::new();
    let registry = builtin_registry();
    let mut publisher = DiagnosticsPublisher::new();
    let uri = uri("file:///todo.rs");
    store.open(uri.clone(), "// TODO write tests\n", 1);

    let (version, findings) = analyze(&registry, &store, &uri);
    assert_eq!(findings.len(), 1);

    let notification = publisher
        .publish(&store, uri.clone(), version, findings)
        .expect("current analysis must publish");
    let params = published_params(notification);
    assert_eq!(params.version, Some(1));
    assert_eq!(params.diagnostics.len(), 1);
    assert_eq!(
        params.diagnostics[0].code,
        Some(lsp_types::NumberOrString::String("task-marker".to_string()))
    );
}

#[test]
fn late_analysis_for_an_old_version_is_dropped() {
    let mut store = DocumentStore::new();
    let registry = builtin_registry();
    let mut publisher = DiagnosticsPublisher::new();
    let uri = uri("file:///race.rs");
    store.open(uri.clone(), "// TODO v1\n", 1);

    // The v1 analysis reads its snapshot but its completion is delayed.
    let (v1, v1_findings) = analyze(&registry, &store, &uri);

    // Meanwhile an edit lands and the v2 analysis completes first.
    let doc = store.get(&uri).unwrap();
    let batch = EditBatch::new(2, vec![range_edit(0, 0, 0, 10, "// all clean")]);
    let next = apply(doc, &batch).unwrap();
    store.replace(&uri, next);

    let (v2, v2_findings) = analyze(&registry, &store, &uri);
    assert!(v2_findings.is_empty());
    let notification = publisher
        .publish(&store, uri.clone(), v2, v2_findings)
        .expect("v2 analysis must publish");
    assert!(published_params(notification).diagnostics.is_empty());

    // The v1 result arrives afterwards and must not overwrite v2.
    assert!(publisher.publish(&store, uri.clone(), v1, v1_findings).is_none());
    assert_eq!(publisher.last_published(&uri).unwrap().version, v2);
}

#[test]
fn closing_publishes_one_empty_set_before_removal() {
    let mut store = DocumentStore::new();
    let registry = builtin_registry();
    let mut publisher = DiagnosticsPublisher::new();
    let uri = uri("file:///closing.rs");
    store.open(uri.clone(), "// FIXME leftover\n", 1);

    let (version, findings) = analyze(&registry, &store, &uri);
    publisher
        .publish(&store, uri.clone(), version, findings)
        .expect("non-empty diagnostics published");

    // Close: empty set first, removal second.
    let params = published_params(publisher.clear(uri.clone()));
    assert!(params.diagnostics.is_empty());
    store.close(&uri).unwrap();

    // A straggler from before the close has nowhere to go.
    assert!(publisher
        .publish(
            &store,
            uri.clone(),
            version,
            vec![Finding::new(0, 0, 1, FindingSeverity::Warning, "ghost")]
        )
        .is_none());
    assert_eq!(publisher.last_published(&uri), None);
}

#[test]
fn malformed_batch_leaves_document_usable() {
    let mut store = DocumentStore::new();
    let uri = uri("file:///sturdy.rs");
    store.open(uri.clone(), "line one\nline two\n", 1);

    let doc = store.get(&uri).unwrap();
    let bad = EditBatch::new(2, vec![range_edit(1, 3, 0, 0, "x")]);
    assert!(apply(doc, &bad).is_err());

    // Buffer untouched, still editable.
    let doc = store.get(&uri).unwrap();
    assert_eq!(doc.version, 1);
    assert_eq!(doc.text_string(), "line one\nline two\n");

    let good = EditBatch::new(2, vec![range_edit(0, 0, 0, 4, "row")]);
    let next = apply(doc, &good).unwrap();
    store.replace(&uri, next);
    assert_eq!(store.get(&uri).unwrap().text_string(), "row one\nline two\n");
}

/// Backend chain behavior across the trait boundary, the way external
/// collaborator providers plug in.
struct FlakyBackend {
    healthy: bool,
}

impl AnalysisBackend for FlakyBackend {
    fn analyze(&self, _request: &AnalysisRequest) -> anyhow::Result<CapabilityResult> {
        if self.healthy {
            Ok(CapabilityResult::Diagnostics(vec![Finding::new(
                0,
                0,
                1,
                FindingSeverity::Error,
                "from the healthy provider",
            )]))
        } else {
            anyhow::bail!("provider crashed")
        }
    }

    fn name(&self) -> &'static str {
        "flaky"
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[test]
fn chain_falls_through_faulted_providers() {
    let mut registry = BackendRegistry::new();
    registry.register(
        "primary",
        10,
        [Capability::Diagnostics],
        Box::new(FlakyBackend { healthy: false }),
    );
    registry.register(
        "secondary",
        5,
        [Capability::Diagnostics],
        Box::new(FlakyBackend { healthy: false }),
    );
    registry.register(
        "tertiary",
        1,
        [Capability::Diagnostics],
        Box::new(FlakyBackend { healthy: true }),
    );

    let request = AnalysisRequest::new(
        uri("file:///chain.rs"),
        1,
        "text".to_string(),
        Capability::Diagnostics,
    );
    let CapabilityResult::Diagnostics(findings) = registry.request(&request).unwrap() else {
        panic!("expected diagnostics");
    };
    assert_eq!(findings[0].message, "from the healthy provider");
}
