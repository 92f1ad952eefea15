use crate::error::DocumentError;
use std::collections::HashMap;

/// The authoritative text buffer of one open document.
#[derive(Clone, Debug)]
pub struct Document {
    /// The textual content of the document.
    pub content: ropey::Rope,
    /// Buffer version: adopted from the editor at open, then incremented
    /// by exactly one for every accepted edit batch.
    pub version: i32,
}

impl Document {
    pub fn new(text: &str, version: i32) -> Self {
        Self {
            content: ropey::Rope::from_str(text),
            version,
        }
    }

    /// Get the document text as a single string.
    /// This allocates - use sparingly. Prefer working with the rope directly when possible.
    pub fn text_string(&self) -> String {
        self.content.to_string()
    }
}

/// Owns every open buffer, keyed by uri.
///
/// All mutation happens on the main loop thread, which is what serializes
/// edits per document; background jobs only ever see cloned snapshots.
#[derive(Default, Clone)]
pub struct DocumentStore {
    docs: HashMap<lsp_types::Uri, Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the buffer for a uri. Re-opening an already
    /// open document is legal and resets its state.
    pub fn open(&mut self, uri: lsp_types::Uri, text: &str, version: i32) {
        self.docs.insert(uri, Document::new(text, version));
    }

    pub fn get(&self, uri: &lsp_types::Uri) -> Result<&Document, DocumentError> {
        self.docs.get(uri).ok_or_else(|| DocumentError::UnknownDocument {
            uri: uri.clone(),
        })
    }

    /// Commits the successor buffer produced by the edit applicator.
    pub fn replace(&mut self, uri: &lsp_types::Uri, doc: Document) {
        self.docs.insert(uri.clone(), doc);
    }

    /// Removes the buffer. The close handler publishes the empty
    /// diagnostic set before calling this.
    pub fn close(&mut self, uri: &lsp_types::Uri) -> Result<(), DocumentError> {
        match self.docs.remove(uri) {
            Some(_) => Ok(()),
            None => Err(DocumentError::UnknownDocument { uri: uri.clone() }),
        }
    }

    pub fn contains(&self, uri: &lsp_types::Uri) -> bool {
        self.docs.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn uri(s: &str) -> lsp_types::Uri {
        lsp_types::Uri::from_str(s).unwrap()
    }

    #[test]
    fn open_and_get() {
        let mut store = DocumentStore::new();
        let uri = uri("file:///test.rs");
        store.open(uri.clone(), "fn main() {}", 1);

        let doc = store.get(&uri).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.text_string(), "fn main() {}");
    }

    #[test]
    fn reopen_resets_state() {
        let mut store = DocumentStore::new();
        let uri = uri("file:///test.rs");
        store.open(uri.clone(), "first", 7);
        store.open(uri.clone(), "second", 1);

        let doc = store.get(&uri).unwrap();
        assert_eq!(doc.version, 1);
        assert_eq!(doc.text_string(), "second");
    }

    #[test]
    fn get_unknown_document_fails() {
        let store = DocumentStore::new();
        let uri = uri("file:///missing.rs");
        assert_eq!(
            store.get(&uri).unwrap_err(),
            DocumentError::UnknownDocument { uri }
        );
    }

    #[test]
    fn close_removes_buffer() {
        let mut store = DocumentStore::new();
        let uri = uri("file:///test.rs");
        store.open(uri.clone(), "content", 1);

        store.close(&uri).unwrap();
        assert!(!store.contains(&uri));
        assert!(store.is_empty());
    }

    #[test]
    fn close_unknown_document_fails() {
        let mut store = DocumentStore::new();
        let uri = uri("file:///missing.rs");
        assert!(store.close(&uri).is_err());
    }
}
