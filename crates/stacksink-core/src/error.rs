//! Error taxonomy for the ingestion pipeline.

use thiserror::Error;

use stacksink_codec::CodecError;

/// Errors that can occur while ingesting node messages.
///
/// Handlers never recover locally: a failed message returns 500 to the node,
/// which retries, and the atomic store commit guarantees no partial state.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("decode failure in {context}: {reason}")]
    Decode { context: &'static str, reason: String },

    #[error("event {event_index} references missing transaction {tx_id}")]
    ReferenceMissing { event_index: u32, tx_id: String },

    #[error("chain id mismatch: configured 0x{expected:08x}, node sent 0x{actual:08x}")]
    ChainIdMismatch { expected: u32, actual: u32 },

    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization queue closed")]
    QueueClosed,
}

impl IngestError {
    pub fn decode(context: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            context,
            reason: reason.into(),
        }
    }

    /// Wrap a binary decode failure with the message-level context.
    pub fn from_codec(context: &'static str, err: CodecError) -> Self {
        Self::Decode {
            context,
            reason: err.to_string(),
        }
    }

    /// Returns `true` if the node's retry loop can be expected to succeed
    /// later without any change on our side.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreConflict(_) | Self::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(IngestError::StoreUnavailable("down".into()).is_retryable());
        assert!(IngestError::StoreConflict("dup".into()).is_retryable());
        assert!(!IngestError::decode("tx", "bad tag").is_retryable());
        assert!(!IngestError::Config("no host".into()).is_retryable());
    }
}
