//! Unified error type for the hub.

use shardhub_protocol::ProtocolError;
use shardhub_registry::RegistryError;
use shardhub_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically, so callers of the `shardhub` crate only ever
/// match on this type.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid frame).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A registry-level error (rejected handshake, unknown shard).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The coordinator task is gone, usually after shutdown.
    #[error("hub coordinator has stopped")]
    Stopped,
}
