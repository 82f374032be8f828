//! Codec trait and the JSON implementation.
//!
//! The hub never touches `serde_json` directly outside this module: the
//! multiplexer and the coordinator go through a [`Codec`], so frames could
//! move to a binary format without touching routing code.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// Converts wire types to bytes and back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// connection task for the lifetime of the hub.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into one frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the value cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes one frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are not UTF-8 JSON of
    /// the expected shape.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

/// A [`Codec`] that speaks UTF-8 JSON, the format shards and consoles use.
///
/// ```rust
/// use shardhub_protocol::{Codec, HubMessage, JsonCodec};
///
/// let codec = JsonCodec;
/// let msg = HubMessage::LogoutBroadcast { username: "bob".into() };
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded: HubMessage = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        // `from_slice` rejects invalid UTF-8 as well as malformed JSON.
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
