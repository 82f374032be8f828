//! Frames exchanged after the handshake.
//!
//! ```text
//! shard/console → hub : Envelope { requestId?, packet: ShardRequest | AdminRequest }
//! hub → shard/console : HubMessage
//! ```
//!
//! Requests that carry a `requestId` get exactly one `Response` with the
//! same id. Relay pushes (`Chat`, `LoginBroadcast`, ...) are never
//! acknowledged.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{FriendPresence, ShardId, ShardSummary};

/// Wraps an inbound request with its optional correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<P> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub packet: P,
}

impl<P> Envelope<P> {
    /// An envelope with no correlation id (no response is matched).
    pub fn new(packet: P) -> Self {
        Self {
            request_id: None,
            packet,
        }
    }

    /// An envelope whose response will echo `request_id`.
    pub fn with_id(request_id: u64, packet: P) -> Self {
        Self {
            request_id: Some(request_id),
            packet,
        }
    }
}

/// Only the correlation id of an inbound frame.
///
/// Lets the hub answer a request whose packet did not decode, as long as
/// the frame itself is JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTag {
    #[serde(default)]
    pub request_id: Option<u64>,
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Requests a registered shard sends to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ShardRequest {
    /// Liveness report; replaces the shard's cached player list.
    Ping {
        shard_id: ShardId,
        players: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        capacity: Option<usize>,
    },

    /// A global chat line, fanned out to every other shard.
    Chat {
        source: String,
        text: String,
        #[serde(default)]
        colour: String,
        #[serde(default)]
        with_arrow: bool,
    },

    /// A directed message to a player on whichever shard hosts them.
    PrivateMessage {
        source: String,
        target: String,
        text: String,
    },

    /// "Which of these friends, offline from my point of view, are
    /// online elsewhere?"
    FriendsQuery {
        shard_id: ShardId,
        username: String,
        #[serde(default)]
        inactive_friends: Vec<String>,
        #[serde(default)]
        logging_out: bool,
    },

    /// A player logged in on `shard_id`.
    Login { username: String, shard_id: ShardId },

    /// A player logged out on the sending shard.
    Logout { username: String },

    /// Is `username` online anywhere other than `shard_id`?
    IsOnline { username: String, shard_id: ShardId },
}

impl ShardRequest {
    /// The wire name of the packet, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "Ping",
            Self::Chat { .. } => "Chat",
            Self::PrivateMessage { .. } => "PrivateMessage",
            Self::FriendsQuery { .. } => "FriendsQuery",
            Self::Login { .. } => "Login",
            Self::Logout { .. } => "Logout",
            Self::IsOnline { .. } => "IsOnline",
        }
    }
}

/// Requests an admin console sends to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum AdminRequest {
    /// Console-originated chat, broadcast to every shard.
    Chat {
        source: String,
        text: String,
        #[serde(default)]
        colour: String,
    },
    /// Ask for the current snapshot.
    Refresh,
}

/// A liveness report from a shard that cannot hold a persistent
/// connection. Identity fields are needed only on the first report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatReport {
    pub shard_id: ShardId,
    #[serde(default)]
    pub players: Vec<String>,
    pub capacity: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Typed payload carried by a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum ResponseData {
    /// Answer to `IsOnline`.
    Online { online: bool },
    /// Answer to `FriendsQuery`: friends newly known to be online.
    Friends {
        active_friends: BTreeMap<String, FriendPresence>,
    },
    /// A private message reached the target's shard.
    Delivered { shard_id: ShardId },
}

/// Everything the hub sends to shards and consoles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum HubMessage {
    /// Reply to a request.
    Response {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        status: Status,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ResponseData>,
    },

    /// A relayed chat line.
    Chat {
        source: String,
        text: String,
        colour: String,
        with_arrow: bool,
    },

    /// A relayed private message for a player on this shard.
    PrivateMessage {
        source: String,
        target: String,
        text: String,
    },

    /// A player came online on another shard.
    LoginBroadcast { username: String, shard_id: ShardId },

    /// A player went offline on another shard.
    LogoutBroadcast { username: String },

    /// Full registry snapshot, pushed to consoles.
    ShardList { shards: Vec<ShardSummary> },
}

impl HubMessage {
    /// A success response with an optional payload.
    pub fn success(request_id: Option<u64>, data: Option<ResponseData>) -> Self {
        Self::Response {
            request_id,
            status: Status::Success,
            message: None,
            data,
        }
    }

    /// An error response. `message` is shown to the peer verbatim.
    pub fn error(request_id: Option<u64>, message: impl Into<String>) -> Self {
        Self::Response {
            request_id,
            status: Status::Error,
            message: Some(message.into()),
            data: None,
        }
    }
}
