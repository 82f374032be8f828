//! Configuration for the hub binary.
//!
//! Loaded from a TOML file, written out with defaults on first start, then
//! overridden from the command line and validated before anything binds.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use shardhub::{AuthConfig, HubConfig};
use shardhub::prelude::ShardId;
use tracing::info;

/// Application configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Listener and liveness settings.
    pub hub: HubSettings,
    /// Shared secrets.
    #[serde(default)]
    pub auth: AuthSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network binding, versioning, and liveness timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Address to listen on (e.g., "0.0.0.0:43595")
    pub bind_address: String,
    /// Game version every shard and console must announce
    pub game_version: u32,
    /// Seconds a new connection has to send its handshake
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Seconds between TTL sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Seconds of silence after which a shard is evicted
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    5
}

fn default_sweep_interval() -> u64 {
    10
}

fn default_cleanup_threshold() -> u64 {
    60
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:43595".to_string(),
            game_version: 1,
            handshake_timeout_secs: default_handshake_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            cleanup_threshold_secs: default_cleanup_threshold(),
        }
    }
}

/// Shared secrets. Empty means every peer is accepted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Token consoles must present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
    /// Token per shard id. TOML keys are strings, so ids are parsed on load.
    #[serde(default)]
    pub shard_tokens: BTreeMap<String, String>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error). `RUST_LOG` wins.
    pub level: String,
    /// Whether to output logs as JSON lines
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration there and
    /// returns it.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks values the hub cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.hub.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.hub.bind_address));
        }

        if self.hub.handshake_timeout_secs == 0 {
            return Err("handshake_timeout_secs must be greater than 0".to_string());
        }
        if self.hub.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".to_string());
        }
        if self.hub.cleanup_threshold_secs == 0 {
            return Err("cleanup_threshold_secs must be greater than 0".to_string());
        }

        for key in self.auth.shard_tokens.keys() {
            if key.parse::<u32>().is_err() {
                return Err(format!("Invalid shard id in auth.shard_tokens: {key}"));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            bind_addr: self.hub.bind_address.clone(),
            game_version: self.hub.game_version,
            handshake_timeout: Duration::from_secs(self.hub.handshake_timeout_secs),
            sweep_interval: Duration::from_secs(self.hub.sweep_interval_secs),
            cleanup_threshold: Duration::from_secs(self.hub.cleanup_threshold_secs),
            ..HubConfig::default()
        }
    }

    /// Converts the secrets table, parsing shard ids.
    pub fn to_auth_config(&self) -> Result<AuthConfig, String> {
        let mut shard_tokens = std::collections::HashMap::new();
        for (key, token) in &self.auth.shard_tokens {
            let id = key
                .parse::<u32>()
                .map_err(|_| format!("Invalid shard id in auth.shard_tokens: {key}"))?;
            shard_tokens.insert(ShardId(id), token.clone());
        }
        Ok(AuthConfig {
            shard_tokens,
            admin_token: self.auth.admin_token.clone(),
        })
    }
}
