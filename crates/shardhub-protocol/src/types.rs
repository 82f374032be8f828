//! Identity and snapshot types shared by every frame.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// The numeric id a game-server process announces in its handshake.
///
/// Unique across the registry while the shard is connected. Serialized
/// as a plain number, so `ShardId(3)` is `3` on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// One row of the registry snapshot mirrored to every admin console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSummary {
    pub shard_id: ShardId,
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Size of the shard's last reported player set.
    pub population: usize,
    pub capacity: usize,
}

/// Where a friend was found during a presence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendPresence {
    pub online: bool,
    pub shard_id: ShardId,
}

// ---------------------------------------------------------------------------
// Close reasons
// ---------------------------------------------------------------------------

/// Reason codes sent in the WebSocket close frame when the hub drops a peer.
///
/// These are the only failures an operator sees on the peer side, so the
/// strings are stable wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Handshake `gameVersion` differs from the hub's.
    VersionMismatch,
    /// Handshake of kind `client`: the control channel is not a game endpoint.
    ClientRejected,
    /// Another live shard already holds the announced shard id.
    DuplicateShard,
    /// The access token did not match the configured secret.
    Unauthorized,
    /// The first frame was not a usable handshake.
    MalformedHandshake,
    /// No handshake arrived in time.
    HandshakeTimeout,
    /// The shard stopped reporting and its TTL ran out.
    Evicted,
    /// The hub is shutting down.
    HubShutdown,
}

impl CloseReason {
    /// Returns the wire string for this reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VersionMismatch => "version-mismatch",
            Self::ClientRejected => "client-rejected",
            Self::DuplicateShard => "duplicate-shard",
            Self::Unauthorized => "unauthorized",
            Self::MalformedHandshake => "malformed-handshake",
            Self::HandshakeTimeout => "handshake-timeout",
            Self::Evicted => "evicted",
            Self::HubShutdown => "hub-shutdown",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
