//! Error types for the registry layer.

use shardhub_protocol::{CloseReason, ProtocolError, ShardId};

/// Why a handshake or heartbeat was refused.
///
/// None of these escape the dispatch boundary: the coordinator logs them
/// and turns the ones that end a connection into a [`CloseReason`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The peer speaks a different game version.
    #[error("game version mismatch: hub runs {expected}, peer sent {got}")]
    VersionMismatch { expected: u32, got: u32 },

    /// A game client tried to use the control channel.
    #[error("client handshakes are not accepted on the control channel")]
    ClientRejected,

    /// Another live shard already holds this id. The existing one is kept.
    #[error("shard {0} is already registered")]
    DuplicateShard(ShardId),

    /// The access token did not match the configured secret.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The instance already has a node.
    #[error("instance is already registered")]
    AlreadyRegistered,

    /// The handshake or report was malformed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl RegistryError {
    /// The close reason a rejected peer is sent.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::VersionMismatch { .. } => CloseReason::VersionMismatch,
            Self::ClientRejected => CloseReason::ClientRejected,
            Self::DuplicateShard(_) | Self::AlreadyRegistered => CloseReason::DuplicateShard,
            Self::Unauthorized(_) => CloseReason::Unauthorized,
            Self::Protocol(_) => CloseReason::MalformedHandshake,
        }
    }
}
