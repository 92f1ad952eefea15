pub mod text_document {
    use crate::backends::{AnalysisRequest, Capability, CapabilityResult, Suggestion};
    use crate::diagnostics;
    use crate::document::Document;
    use crate::edits::{self, EditBatch};
    use crate::lsp_ext;
    use crate::server::{ServerState, StateSnapshot};
    use anyhow::Result;
    use nucleo::pattern::{CaseMatching, Normalization, Pattern};
    use nucleo::Matcher;
    use std::collections::HashMap;
    use tracing::debug;

    /// handler for `textDocument/didOpen`.
    pub(crate) fn did_open(
        state: &mut ServerState,
        params: lsp_types::DidOpenTextDocumentParams,
    ) -> Result<()> {
        let uri = params.text_document.uri;
        debug!("text_document::did_open - {:?}", uri);
        state.documents.open(
            uri.clone(),
            &params.text_document.text,
            params.text_document.version,
        );
        diagnostics::schedule(state, uri);
        Ok(())
    }

    /// handler for `textDocument/didChange`.
    ///
    /// The batch is transactional: a malformed edit rejects the whole
    /// notification and the buffer stays as it was, still editable.
    pub(crate) fn did_change(
        state: &mut ServerState,
        params: lsp_types::DidChangeTextDocumentParams,
    ) -> Result<()> {
        let uri = params.text_document.uri.clone();
        debug!("text_document::did_change - {:?}", uri);

        let batch = EditBatch::from_lsp(&params);
        let doc = match state.documents.get(&uri) {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!("text_document::did_change - {}", err);
                return Ok(());
            }
        };
        if batch.editor_version <= doc.version {
            tracing::warn!(
                "text_document::did_change - editor version {} does not advance buffer version {} for {:?}",
                batch.editor_version,
                doc.version,
                uri
            );
        }

        match edits::apply(doc, &batch) {
            Ok(next) => {
                debug!(
                    "text_document::did_change - {:?} now at v{}",
                    uri, next.version
                );
                state.documents.replace(&uri, next);
                diagnostics::schedule(state, uri);
            }
            Err(err) => {
                tracing::warn!(
                    "text_document::did_change - rejected batch for {:?}: {}",
                    uri,
                    err
                );
            }
        }
        Ok(())
    }

    /// handler for `textDocument/didSave`. The buffer did not change, but
    /// external analyzers may consult on-disk state, so analysis re-runs.
    pub(crate) fn did_save(
        state: &mut ServerState,
        params: lsp_types::DidSaveTextDocumentParams,
    ) -> Result<()> {
        debug!("text_document::did_save - {:?}", params.text_document.uri);
        diagnostics::schedule(state, params.text_document.uri);
        Ok(())
    }

    /// handler for `textDocument/didClose`. Publishes one empty diagnostic
    /// set, then drops the buffer, in that order.
    pub(crate) fn did_close(
        state: &mut ServerState,
        params: lsp_types::DidCloseTextDocumentParams,
    ) -> Result<()> {
        let uri = params.text_document.uri;
        debug!("text_document::did_close - {:?}", uri);
        let notification = state.publisher.clear(uri.clone());
        state.send(notification.into());
        if let Err(err) = state.documents.close(&uri) {
            tracing::warn!("text_document::did_close - {}", err);
        }
        Ok(())
    }

    /// handler for `textDocument/hover`. The hovered line is forwarded to
    /// the explanation backends as an opaque snippet.
    pub(crate) fn hover(
        snapshot: StateSnapshot,
        params: lsp_types::HoverParams,
    ) -> Result<Option<lsp_types::Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        debug!(
            "text_document::hover - {:?} {}:{}",
            uri, position.line, position.character
        );

        let doc = snapshot.documents.get(&uri)?;
        let Some(snippet) = line_text(doc, position.line) else {
            return Ok(None);
        };
        if snippet.trim().is_empty() {
            return Ok(None);
        }

        let request = AnalysisRequest::new(uri, doc.version, snippet, Capability::Explain);
        let explanation = match snapshot.backends.request(&request) {
            Ok(CapabilityResult::Explanation(text)) => text,
            Ok(_) => return Ok(None),
            Err(err) => {
                debug!("text_document::hover - {}", err);
                return Ok(None);
            }
        };

        Ok(Some(lsp_types::Hover {
            contents: lsp_types::HoverContents::Markup(lsp_types::MarkupContent {
                kind: lsp_types::MarkupKind::Markdown,
                value: explanation,
            }),
            range: None,
        }))
    }

    /// handler for `textDocument/completion`. Candidates come from the
    /// backends; the word prefix under the cursor narrows them down.
    pub(crate) fn completion(
        snapshot: StateSnapshot,
        params: lsp_types::CompletionParams,
    ) -> Result<Option<lsp_types::CompletionResponse>> {
        let uri = params.text_document_position.text_document.uri;
        let position = params.text_document_position.position;
        debug!(
            "text_document::completion - {:?} {}:{}",
            uri, position.line, position.character
        );

        let doc = snapshot.documents.get(&uri)?;
        let request = AnalysisRequest::new(
            uri,
            doc.version,
            doc.text_string(),
            Capability::Complete,
        );
        let suggestions = match snapshot.backends.request(&request) {
            Ok(CapabilityResult::Completions(suggestions)) => suggestions,
            Ok(_) => return Ok(None),
            Err(err) => {
                debug!("text_document::completion - {}", err);
                return Ok(None);
            }
        };

        let prefix = word_prefix(doc, position);
        let ranked = rank_suggestions(suggestions, prefix.as_deref());
        if ranked.is_empty() {
            return Ok(None);
        }

        let items = ranked
            .into_iter()
            .map(|suggestion| lsp_types::CompletionItem {
                label: suggestion.label,
                detail: suggestion.detail,
                kind: Some(lsp_types::CompletionItemKind::TEXT),
                ..Default::default()
            })
            .collect();
        Ok(Some(lsp_types::CompletionResponse::Array(items)))
    }

    /// handler for `textDocument/codeAction`. Offers quick fixes for the
    /// built-in findings that have a mechanical remedy.
    pub(crate) fn code_action(
        snapshot: StateSnapshot,
        params: lsp_types::CodeActionParams,
    ) -> Result<Option<lsp_types::CodeActionResponse>> {
        let uri = params.text_document.uri;
        debug!("text_document::code_action - {:?}", uri);
        let doc = snapshot.documents.get(&uri)?;

        let mut actions = Vec::new();
        for diagnostic in &params.context.diagnostics {
            let Some(lsp_types::NumberOrString::String(code)) = &diagnostic.code else {
                continue;
            };
            if code != "trailing-whitespace" {
                continue;
            }
            let Some(edit) = strip_trailing_whitespace_edit(doc, diagnostic.range.start.line)
            else {
                continue;
            };
            let mut changes = HashMap::new();
            changes.insert(uri.clone(), vec![edit]);
            actions.push(lsp_types::CodeActionOrCommand::CodeAction(
                lsp_types::CodeAction {
                    title: "Remove trailing whitespace".to_string(),
                    kind: Some(lsp_types::CodeActionKind::QUICKFIX),
                    diagnostics: Some(vec![diagnostic.clone()]),
                    edit: Some(lsp_types::WorkspaceEdit {
                        changes: Some(changes),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ));
        }

        if actions.is_empty() {
            Ok(None)
        } else {
            Ok(Some(actions))
        }
    }

    /// handler for `companion/explainSnippet`.
    pub(crate) fn explain_snippet(
        snapshot: StateSnapshot,
        params: lsp_ext::ExplainSnippetParams,
    ) -> Result<Option<String>> {
        let uri = params.text_document.uri;
        debug!("text_document::explain_snippet - {:?}", uri);
        let doc = snapshot.documents.get(&uri)?;

        let Some(snippet) = range_text(doc, params.range) else {
            return Ok(None);
        };
        if snippet.trim().is_empty() {
            return Ok(None);
        }

        let request = AnalysisRequest::new(uri, doc.version, snippet, Capability::Explain);
        match snapshot.backends.request(&request) {
            Ok(CapabilityResult::Explanation(text)) => Ok(Some(text)),
            Ok(_) => Ok(None),
            Err(err) => {
                debug!("text_document::explain_snippet - {}", err);
                Ok(None)
            }
        }
    }

    /// Fuzzy-ranks backend suggestions against the typed prefix; without a
    /// prefix the backend order is kept.
    fn rank_suggestions(suggestions: Vec<Suggestion>, prefix: Option<&str>) -> Vec<Suggestion> {
        let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
            return suggestions;
        };
        let mut matcher = Matcher::new(nucleo::Config::DEFAULT);
        let pattern = Pattern::parse(prefix, CaseMatching::Ignore, Normalization::Smart);
        pattern
            .match_list(suggestions, &mut matcher)
            .into_iter()
            .map(|(suggestion, _score)| suggestion)
            .collect()
    }

    /// The identifier fragment immediately before the cursor.
    fn word_prefix(doc: &Document, position: lsp_types::Position) -> Option<String> {
        let snippet = line_text(doc, position.line)?;
        let units: Vec<u16> = snippet.encode_utf16().collect();
        let upto = (position.character as usize).min(units.len());
        let before_cursor = String::from_utf16_lossy(&units[..upto]);
        let prefix: String = before_cursor
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        (!prefix.is_empty()).then_some(prefix)
    }

    fn line_text(doc: &Document, line: u32) -> Option<String> {
        let idx = line as usize;
        if idx >= doc.content.len_lines() {
            return None;
        }
        Some(doc.content.line(idx).to_string())
    }

    fn range_text(doc: &Document, range: lsp_types::Range) -> Option<String> {
        let start =
            edits::resolve_position(&doc.content, range.start.line, range.start.character).ok()?;
        let end =
            edits::resolve_position(&doc.content, range.end.line, range.end.character).ok()?;
        if end < start {
            return None;
        }
        Some(doc.content.slice(start..end).to_string())
    }

    /// A workspace edit deleting the trailing whitespace of one line, or
    /// `None` when the line is already clean.
    fn strip_trailing_whitespace_edit(
        doc: &Document,
        line: u32,
    ) -> Option<lsp_types::TextEdit> {
        let snippet = line_text(doc, line)?;
        let body = snippet.trim_end_matches(['\n', '\r']);
        let trimmed = body.trim_end();
        if trimmed.len() == body.len() {
            return None;
        }
        let start_col = utf16_len(trimmed);
        let end_col = utf16_len(body);
        Some(lsp_types::TextEdit {
            range: lsp_types::Range {
                start: lsp_types::Position {
                    line,
                    character: start_col,
                },
                end: lsp_types::Position {
                    line,
                    character: end_col,
                },
            },
            new_text: String::new(),
        })
    }

    fn utf16_len(s: &str) -> u32 {
        s.encode_utf16().count() as u32
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::backends::BackendRegistry;
        use crate::config::Config;
        use std::path::PathBuf;
        use std::str::FromStr;
        use std::sync::Arc;

        fn uri(s: &str) -> lsp_types::Uri {
            lsp_types::Uri::from_str(s).unwrap()
        }

        fn snapshot_with(text: &str) -> (StateSnapshot, lsp_types::Uri) {
            let config = Config::new(PathBuf::new());
            let mut documents = crate::document::DocumentStore::new();
            let uri = uri("file:///demo.rs");
            documents.open(uri.clone(), text, 1);
            let snapshot = StateSnapshot {
                backends: Arc::new(BackendRegistry::from_config(&config)),
                documents,
            };
            (snapshot, uri)
        }

        fn position(line: u32, character: u32) -> lsp_types::Position {
            lsp_types::Position { line, character }
        }

        #[test]
        fn hover_explains_the_hovered_line() {
            let (snapshot, uri) = snapshot_with("let answer = 42;\n");
            let params = lsp_types::HoverParams {
                text_document_position_params: lsp_types::TextDocumentPositionParams {
                    text_document: lsp_types::TextDocumentIdentifier { uri },
                    position: position(0, 4),
                },
                work_done_progress_params: Default::default(),
            };
            let hover = hover(snapshot, params).unwrap().expect("hover content");
            let lsp_types::HoverContents::Markup(markup) = hover.contents else {
                panic!("expected markup hover");
            };
            assert!(markup.value.contains("words"));
        }

        #[test]
        fn hover_on_blank_line_is_empty() {
            let (snapshot, uri) = snapshot_with("\nlet x = 1;\n");
            let params = lsp_types::HoverParams {
                text_document_position_params: lsp_types::TextDocumentPositionParams {
                    text_document: lsp_types::TextDocumentIdentifier { uri },
                    position: position(0, 0),
                },
                work_done_progress_params: Default::default(),
            };
            assert!(hover(snapshot, params).unwrap().is_none());
        }

        #[test]
        fn completion_filters_by_prefix() {
            let (snapshot, uri) = snapshot_with("let total = base + offset;\nto");
            let params = lsp_types::CompletionParams {
                text_document_position: lsp_types::TextDocumentPositionParams {
                    text_document: lsp_types::TextDocumentIdentifier { uri },
                    position: position(1, 2),
                },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
                context: None,
            };
            let response = completion(snapshot, params).unwrap().expect("items");
            let lsp_types::CompletionResponse::Array(items) = response else {
                panic!("expected array response");
            };
            assert!(items.iter().any(|item| item.label == "total"));
            assert!(items.iter().all(|item| item.label != "base"));
        }

        #[test]
        fn word_prefix_stops_at_non_identifier_chars() {
            let doc = Document::new("foo + bar_baz", 1);
            assert_eq!(
                word_prefix(&doc, position(0, 13)).as_deref(),
                Some("bar_baz")
            );
            assert_eq!(word_prefix(&doc, position(0, 5)).as_deref(), None);
        }

        #[test]
        fn code_action_strips_trailing_whitespace() {
            let (snapshot, uri) = snapshot_with("fn main() {}   \n");
            let diagnostic = lsp_types::Diagnostic {
                range: lsp_types::Range {
                    start: position(0, 12),
                    end: position(0, 15),
                },
                code: Some(lsp_types::NumberOrString::String(
                    "trailing-whitespace".to_string(),
                )),
                ..Default::default()
            };
            let params = lsp_types::CodeActionParams {
                text_document: lsp_types::TextDocumentIdentifier { uri: uri.clone() },
                range: diagnostic.range,
                context: lsp_types::CodeActionContext {
                    diagnostics: vec![diagnostic],
                    only: None,
                    trigger_kind: None,
                },
                work_done_progress_params: Default::default(),
                partial_result_params: Default::default(),
            };
            let actions = code_action(snapshot, params).unwrap().expect("a quick fix");
            assert_eq!(actions.len(), 1);
            let lsp_types::CodeActionOrCommand::CodeAction(action) = &actions[0] else {
                panic!("expected a code action");
            };
            let changes = action.edit.as_ref().unwrap().changes.as_ref().unwrap();
            let edits = changes.get(&uri).unwrap();
            assert_eq!(edits[0].range.start.character, 12);
            assert_eq!(edits[0].range.end.character, 15);
            assert_eq!(edits[0].new_text, "");
        }

        #[test]
        fn explain_snippet_serves_the_selected_range() {
            let (snapshot, uri) = snapshot_with("fn add(a: i32, b: i32) -> i32 { a + b }\n");
            let params = lsp_ext::ExplainSnippetParams {
                text_document: lsp_types::TextDocumentIdentifier { uri },
                range: lsp_types::Range {
                    start: position(0, 0),
                    end: position(0, 39),
                },
            };
            let explanation = explain_snippet(snapshot, params)
                .unwrap()
                .expect("an explanation");
            assert!(explanation.contains("words"));
        }

        #[test]
        fn requests_on_unknown_documents_error() {
            let (snapshot, _) = snapshot_with("text");
            let params = lsp_types::HoverParams {
                text_document_position_params: lsp_types::TextDocumentPositionParams {
                    text_document: lsp_types::TextDocumentIdentifier {
                        uri: uri("file:///other.rs"),
                    },
                    position: position(0, 0),
                },
                work_done_progress_params: Default::default(),
            };
            assert!(hover(snapshot, params).is_err());
        }
    }
}
