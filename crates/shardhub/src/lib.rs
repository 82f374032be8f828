//! # shardhub
//!
//! Control-plane hub for a sharded game deployment.
//!
//! Every shard (game-server process) and every operator console connects
//! to one hub over WebSocket. The hub keeps a live registry of shards,
//! picks a shard for arriving players, relays cross-shard traffic (chat,
//! private messages, friend presence, login/logout), evicts shards that
//! stop reporting, and mirrors the registry to every console.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use shardhub::prelude::*;
//!
//! # async fn start() -> Result<(), HubError> {
//! let server = HubServer::builder()
//!     .bind("0.0.0.0:43595")
//!     .build(AllowAll)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod coordinator;
mod error;
mod handle;
mod handler;
mod server;

pub use config::{AuthConfig, HubConfig};
pub use error::HubError;
pub use handle::HubHandle;
pub use server::{HubServer, HubServerBuilder};

/// Everything needed to run and talk to a hub.
pub mod prelude {
    pub use crate::{AuthConfig, HubConfig, HubError, HubHandle, HubServer, HubServerBuilder};
    pub use shardhub_protocol::{
        AdminRequest, CloseReason, Envelope, FriendPresence, Handshake, HeartbeatReport,
        HubMessage, PeerKind, ResponseData, ShardId, ShardIdentity, ShardRequest, ShardSummary,
        Status,
    };
    pub use shardhub_registry::{
        AllowAll, Authenticator, Credentials, HeartbeatOutcome, RegistryError, RegistryEvent,
        SharedSecretAuth,
    };
}
