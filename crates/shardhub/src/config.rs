//! Hub configuration.

use std::collections::HashMap;
use std::time::Duration;

use shardhub_protocol::ShardId;
use shardhub_registry::SharedSecretAuth;

// ---------------------------------------------------------------------------
// HubConfig
// ---------------------------------------------------------------------------

/// Runtime settings for one hub.
///
/// `Default` gives values suitable for a local deployment; the server
/// binary fills this in from its TOML file.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,

    /// Game version every shard and console must announce.
    pub game_version: u32,

    /// How long a new connection has to send its handshake.
    pub handshake_timeout: Duration,

    /// How often the TTL sweep runs.
    pub sweep_interval: Duration,

    /// A shard silent for longer than this is evicted.
    pub cleanup_threshold: Duration,

    /// Capacity of the coordinator's command channel. Connection tasks
    /// wait when it is full.
    pub command_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:43595".to_string(),
            game_version: 1,
            handshake_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(10),
            cleanup_threshold: Duration::from_secs(60),
            command_buffer: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// AuthConfig
// ---------------------------------------------------------------------------

/// Shared secrets, keyed by shard id.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub shard_tokens: HashMap<ShardId, String>,
    pub admin_token: Option<String>,
}

impl AuthConfig {
    /// Whether any secret is configured at all.
    pub fn is_empty(&self) -> bool {
        self.shard_tokens.is_empty() && self.admin_token.is_none()
    }

    pub fn into_authenticator(self) -> SharedSecretAuth {
        SharedSecretAuth::new(self.shard_tokens, self.admin_token)
    }
}
