use crate::document::Document;
use crate::error::EditError;
use ropey::{Rope, RopeSlice};

/// One atomic text substitution inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    /// Replace the whole document. Ends the batch: any later edits in the
    /// same batch are skipped, matching "whole document changed"
    /// semantics.
    Full { text: String },
    /// Replace the text between two positions. Lines are 0-based, columns
    /// are UTF-16 code units; the end position may equal the line length,
    /// meaning end-of-line.
    Range {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
        text: String,
    },
}

/// The edits delivered by one change notification, applied in sequence
/// order as a single version bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBatch {
    /// The version the editor believes it produced with this change.
    /// Logged on disagreement; the buffer keeps its own counter.
    pub editor_version: i32,
    pub edits: Vec<Edit>,
}

impl EditBatch {
    pub fn new(editor_version: i32, edits: Vec<Edit>) -> Self {
        Self {
            editor_version,
            edits,
        }
    }

    /// Converts an LSP change notification into a batch. A change event
    /// without a range is a whole-document replacement.
    pub fn from_lsp(params: &lsp_types::DidChangeTextDocumentParams) -> Self {
        let edits = params
            .content_changes
            .iter()
            .map(|change| match change.range {
                Some(range) => Edit::Range {
                    start_line: range.start.line,
                    start_col: range.start.character,
                    end_line: range.end.line,
                    end_col: range.end.character,
                    text: change.text.clone(),
                },
                None => Edit::Full {
                    text: change.text.clone(),
                },
            })
            .collect();
        Self {
            editor_version: params.text_document.version,
            edits,
        }
    }
}

/// Applies a batch to a document, returning the successor buffer.
///
/// The batch is transactional: the first malformed edit rejects all of it
/// and the input document is untouched (the caller only commits on `Ok`).
/// Each edit operates on the result of the previous one. The version
/// advances by exactly one per accepted batch, however many edits it
/// carries.
pub fn apply(document: &Document, batch: &EditBatch) -> Result<Document, EditError> {
    let mut content = document.content.clone();
    for edit in &batch.edits {
        match edit {
            Edit::Full { text } => {
                content = Rope::from_str(text);
                break;
            }
            Edit::Range {
                start_line,
                start_col,
                end_line,
                end_col,
                text,
            } => {
                splice(
                    &mut content,
                    *start_line,
                    *start_col,
                    *end_line,
                    *end_col,
                    text,
                )?;
            }
        }
    }
    Ok(Document {
        content,
        version: document.version + 1,
    })
}

fn splice(
    content: &mut Rope,
    start_line: u32,
    start_col: u32,
    end_line: u32,
    end_col: u32,
    text: &str,
) -> Result<(), EditError> {
    if (end_line, end_col) < (start_line, start_col) {
        return Err(EditError::InvertedRange {
            start_line,
            start_col,
            end_line,
            end_col,
        });
    }
    let start = resolve_position(content, start_line, start_col)?;
    let end = resolve_position(content, end_line, end_col)?;
    content.remove(start..end);
    if !text.is_empty() {
        content.insert(start, text);
    }
    Ok(())
}

/// Maps a (line, UTF-16 column) protocol position to a rope char index.
/// Anything outside the document is rejected rather than clamped.
pub(crate) fn resolve_position(
    content: &Rope,
    line: u32,
    col: u32,
) -> Result<usize, EditError> {
    let line_idx = line as usize;
    let line_count = content.len_lines();
    if line_idx >= line_count {
        return Err(EditError::LineOutOfBounds { line, line_count });
    }
    let body = line_body(content.line(line_idx));
    let line_len = body.len_utf16_cu();
    let col_idx = col as usize;
    if col_idx > line_len {
        return Err(EditError::ColumnOutOfBounds {
            line,
            col,
            line_len,
        });
    }
    Ok(content.line_to_char(line_idx) + body.utf16_cu_to_char(col_idx))
}

/// The line without its trailing line break. Columns address the body
/// only; joining lines is expressed as a range ending at the start of the
/// next line.
fn line_body(line: RopeSlice<'_>) -> RopeSlice<'_> {
    let mut len = line.len_chars();
    if len > 0 && line.char(len - 1) == '\n' {
        len -= 1;
        if len > 0 && line.char(len - 1) == '\r' {
            len -= 1;
        }
    }
    line.slice(..len)
}
