//! Wire protocol for the shard hub.
//!
//! This crate defines what shards, consoles, and the hub say to each other:
//!
//! - **Handshake** ([`Handshake`], [`PeerKind`]): the first frame on every
//!   connection, used to classify the peer.
//! - **Packets** ([`ShardRequest`], [`AdminRequest`], [`HubMessage`]): the
//!   relay and query traffic after the handshake.
//! - **Codec** ([`Codec`], [`JsonCodec`]): how frames become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (typed frames) → Registry (nodes, relays)
//! ```

mod codec;
mod error;
mod handshake;
mod packets;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use handshake::{Handshake, PeerKind, ShardIdentity};
pub use packets::{
    AdminRequest, Envelope, HeartbeatReport, HubMessage, RequestTag, ResponseData, ShardRequest,
    Status,
};
pub use types::{CloseReason, FriendPresence, ShardId, ShardSummary};
