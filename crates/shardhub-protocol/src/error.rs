//! Error types for the protocol layer.

/// Errors that can occur while encoding, decoding, or validating frames.
///
/// Every variant is recoverable at the dispatch boundary: the hub logs it
/// and drops the frame (or closes a connection whose handshake is bad).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The frame was not valid UTF-8 JSON of the expected shape.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded but breaks a protocol rule, e.g. a shard
    /// handshake without a shard id.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
