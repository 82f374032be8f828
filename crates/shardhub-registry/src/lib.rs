//! Shard registry for the hub.
//!
//! This crate holds everything the coordinator knows about the deployment:
//!
//! 1. **Membership** ([`Registry`]): which shards and consoles are attached,
//!    classified from their handshake into [`Node`]s
//! 2. **Admission**: first-fit shard selection for arriving players
//! 3. **Relays**: chat, private messages, friend presence, and
//!    login/logout propagation between shards that never talk directly
//! 4. **Liveness**: heartbeat reports and the TTL sweep
//! 5. **Authorization** ([`Authenticator`]): shared-secret checks
//!
//! # How it fits in the stack
//!
//! ```text
//! Hub (above)        ← one coordinator task owns the Registry
//!     ↕
//! Registry (this crate)
//!     ↕
//! Protocol (below)   ← handshake, packets, codec
//! ```
//!
//! The registry does no I/O. Outbound frames go through each node's
//! [`PeerLink`], and time is always passed in, so every operation here is
//! deterministic under test.

mod auth;
mod error;
mod heartbeat;
mod node;
mod registry;
mod relay;

pub use auth::{AllowAll, Authenticator, Credentials, SharedSecretAuth};
pub use error::RegistryError;
pub use heartbeat::{HeartbeatOutcome, heartbeat_instance_id};
pub use node::{Action, AdminNode, Node, Outbound, PeerLink, PeerSender, ShardNode};
pub use registry::{Registered, Registry, RegistryEvent, Removed};
