//! The first frame on every connection.

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ShardId};

/// What kind of peer a handshake announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    /// A game-server process.
    Shard,
    /// An operator console.
    Admin,
    /// A game client. Never accepted on the control channel.
    Client,
}

/// The handshake frame.
///
/// ```json
/// { "kind": "shard", "gameVersion": 3, "shardId": 1, "name": "Alpha",
///   "host": "10.0.0.5", "port": 43594, "capacity": 2000,
///   "players": ["alice"], "accessToken": "s3cret" }
/// ```
///
/// Only `kind` and `gameVersion` are required on the wire; the shard
/// fields are checked by [`Handshake::shard_identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub kind: PeerKind,
    pub game_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<ShardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub players: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// The fields a shard handshake must carry, extracted and checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardIdentity {
    pub shard_id: ShardId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub capacity: usize,
    pub players: Vec<String>,
    pub access_token: Option<String>,
}

impl Handshake {
    /// A console handshake.
    pub fn admin(game_version: u32, access_token: Option<String>) -> Self {
        Self {
            kind: PeerKind::Admin,
            game_version,
            shard_id: None,
            name: None,
            host: None,
            port: None,
            capacity: None,
            players: Vec::new(),
            access_token,
        }
    }

    /// A shard handshake carrying every identity field.
    pub fn shard(game_version: u32, identity: ShardIdentity) -> Self {
        Self {
            kind: PeerKind::Shard,
            game_version,
            shard_id: Some(identity.shard_id),
            name: Some(identity.name),
            host: Some(identity.host),
            port: Some(identity.port),
            capacity: Some(identity.capacity),
            players: identity.players,
            access_token: identity.access_token,
        }
    }

    /// Extracts the shard identity.
    ///
    /// # Errors
    /// `ProtocolError::InvalidMessage` naming the first missing field.
    pub fn shard_identity(&self) -> Result<ShardIdentity, ProtocolError> {
        fn required<T: Clone>(field: &Option<T>, name: &str) -> Result<T, ProtocolError> {
            field.clone().ok_or_else(|| {
                ProtocolError::InvalidMessage(format!("shard handshake missing {name}"))
            })
        }

        Ok(ShardIdentity {
            shard_id: required(&self.shard_id, "shardId")?,
            name: required(&self.name, "name")?,
            host: required(&self.host, "host")?,
            port: required(&self.port, "port")?,
            capacity: required(&self.capacity, "capacity")?,
            players: self.players.clone(),
            access_token: self.access_token.clone(),
        })
    }
}
