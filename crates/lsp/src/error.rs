use crate::backends::Capability;
use thiserror::Error;

/// Failure modes of the document registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    /// An operation referenced a uri that is not currently open.
    #[error("unknown document: uri={uri:?}")]
    UnknownDocument { uri: lsp_types::Uri },
}

/// Rejection reasons for an edit batch. Any of these rejects the whole
/// batch and leaves the buffer byte-identical to before the call; there is
/// no clamping, so the editor never ends up with silently corrupted text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("edit end ({end_line},{end_col}) precedes start ({start_line},{start_col})")]
    InvertedRange {
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    },
    #[error("line {line} out of bounds, document has {line_count} lines")]
    LineOutOfBounds { line: u32, line_count: usize },
    #[error("column {col} out of bounds on line {line}, line is {line_len} units long")]
    ColumnOutOfBounds { line: u32, col: u32, line_len: usize },
}

/// Terminal gateway failure: every candidate backend for the request was
/// tried exactly once and none produced a result.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no backend available for capability '{capability}'")]
    NoProviderAvailable { capability: Capability },
}
