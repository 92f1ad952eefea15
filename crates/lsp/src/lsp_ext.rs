//! Protocol extensions specific to the companion server.

use lsp_types::request::Request;
use serde::{Deserialize, Serialize};

/// Explain an arbitrary snippet of an open document. The editor side
/// surfaces this as the companion's "explain this code" action.
pub enum ExplainSnippet {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainSnippetParams {
    pub text_document: lsp_types::TextDocumentIdentifier,
    pub range: lsp_types::Range,
}

impl Request for ExplainSnippet {
    type Params = ExplainSnippetParams;
    type Result = Option<String>;
    const METHOD: &'static str = "companion/explainSnippet";
}
