//! Error types for the binary decode pipeline.

use thiserror::Error;

/// Errors that can occur while decoding Stacks wire-format bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} more byte(s) at offset {offset}")]
    UnexpectedEof { offset: usize, needed: usize },

    #[error("unknown {what} tag 0x{tag:02x} at offset {offset}")]
    UnknownTag {
        what: &'static str,
        tag: u8,
        offset: usize,
    },

    #[error("invalid {what}: {reason}")]
    Invalid { what: &'static str, reason: String },

    #[error("value nesting exceeds depth limit {limit}")]
    DepthExceeded { limit: usize },

    #[error("trailing bytes after {what}: {count} byte(s) left")]
    TrailingBytes { what: &'static str, count: usize },
}

impl CodecError {
    pub(crate) fn invalid(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            what,
            reason: reason.into(),
        }
    }
}
