//! Error types for the shared crate
//!
//! Errors raised while turning broker payloads into typed messages.

use thiserror::Error;

/// Envelope encode/decode failure
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload bytes are not a well-formed envelope
    #[error("Malformed envelope: {0}")]
    Decode(#[source] serde_json::Error),

    /// Envelope body is valid JSON but the message does not match the expected type
    #[error("Unexpected message shape: {0}")]
    Payload(#[source] serde_json::Error),

    /// Payload could not be serialized
    #[error("Failed to encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Topic name that no handler is registered for
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown topic: {0}")]
pub struct UnknownTopic(pub String);

/// Codec result alias
pub type CodecResult<T> = Result<T, CodecError>;
