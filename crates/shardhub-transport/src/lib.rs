//! Transport layer for the shard hub.
//!
//! Provides the [`Transport`] and [`Connection`] traits that the hub's
//! multiplexer is written against, plus the [`InstanceId`] every accepted
//! peer is known by for the lifetime of its connection.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{PendingWebSocket, WebSocketConnection, WebSocketTransport};

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

/// Counter mixed into every generated id so two live connections can never
/// collide, even if the random suffix does.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identifier for one accepted connection.
///
/// Generated once at accept time and never reused while the connection
/// is open. Peers never see it; it only keys the hub's tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    /// Generates a fresh id: a monotonic counter plus 32 random bits.
    pub fn generate() -> Self {
        let seq = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let salt: u32 = rand::rng().random();
        Self(format!("{seq:x}-{salt:08x}"))
    }

    /// Wraps an existing string. Used for peers that never held a socket,
    /// such as heartbeat-only shards.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst-{}", self.0)
    }
}

/// Accepts new incoming connections.
///
/// Accepting only completes the raw socket accept. The protocol
/// handshake runs in [`PendingConnection::upgrade`], so a peer that
/// stalls halfway through it cannot hold up the next accept.
pub trait Transport: Send + Sync + 'static {
    /// An accepted peer that has not been upgraded yet.
    type Pending: PendingConnection<Error = Self::Error>;
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync;

    /// Waits for and accepts the next incoming peer.
    async fn accept(&mut self) -> Result<Self::Pending, Self::Error>;

    /// Returns the address the transport is listening on.
    fn local_addr(&self) -> Result<SocketAddr, Self::Error>;
}

/// A peer between socket accept and a usable [`Connection`].
///
/// The id is assigned at accept time and carried over to the connection.
/// `upgrade` has no deadline of its own; callers bound it.
pub trait PendingConnection: Send + 'static {
    /// The connection this peer becomes.
    type Connection: Connection;
    /// The error type for the upgrade.
    type Error: std::error::Error + Send + Sync;

    /// Runs the protocol handshake.
    async fn upgrade(self) -> Result<Self::Connection, Self::Error>;

    /// Returns the id this peer will keep once upgraded.
    fn id(&self) -> &InstanceId;

    /// Returns the remote peer's address.
    fn peer_addr(&self) -> SocketAddr;
}

/// A single peer connection that can send and receive frames.
///
/// Sending and receiving may happen concurrently from different tasks:
/// the hub runs one reader and one writer per connection.
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Sends one frame to the remote peer.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Closes the connection, telling the peer why.
    async fn close(&self, reason: &str) -> Result<(), Self::Error>;

    /// Returns the id assigned to this connection at accept time.
    fn id(&self) -> &InstanceId;

    /// Returns the remote peer's address.
    fn peer_addr(&self) -> SocketAddr;
}
