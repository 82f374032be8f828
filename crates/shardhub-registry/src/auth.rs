//! Shared-secret authorization for shards and consoles.
//!
//! The hub only checks that a peer knows the secret configured for it.
//! Anything stronger belongs in front of the hub, not in it.
//!
//! The check sits behind the [`Authenticator`] trait so tests and local
//! setups can use [`AllowAll`] while deployments use [`SharedSecretAuth`].

use std::collections::HashMap;

use shardhub_protocol::ShardId;

use crate::RegistryError;

/// Who is asking to be registered, and with what token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials<'a> {
    Shard {
        shard_id: ShardId,
        token: Option<&'a str>,
    },
    Admin {
        token: Option<&'a str>,
    },
}

/// Decides whether a peer may register.
///
/// # Example
///
/// ```rust
/// use shardhub_registry::{Authenticator, Credentials, RegistryError};
///
/// /// Consoles only from the operator's own tooling.
/// struct ShardsOnly;
///
/// impl Authenticator for ShardsOnly {
///     async fn authorize(&self, peer: &Credentials<'_>) -> Result<(), RegistryError> {
///         match peer {
///             Credentials::Shard { .. } => Ok(()),
///             Credentials::Admin { .. } => {
///                 Err(RegistryError::Unauthorized("consoles disabled".into()))
///             }
///         }
///     }
/// }
/// ```
///
/// The returned future must be `Send`: it runs inside each connection's
/// task. Implementations can still be written as `async fn`.
pub trait Authenticator: Send + Sync + 'static {
    /// Returns `Ok(())` if the peer may register.
    ///
    /// # Errors
    /// [`RegistryError::Unauthorized`] when the token is missing or wrong.
    fn authorize(
        &self,
        peer: &Credentials<'_>,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// Accepts every peer. For local development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl Authenticator for AllowAll {
    async fn authorize(&self, _peer: &Credentials<'_>) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// One secret per shard id, plus an optional console secret.
///
/// A shard with no configured secret is accepted with any token; the same
/// goes for consoles when no admin token is set.
#[derive(Debug, Clone, Default)]
pub struct SharedSecretAuth {
    shard_tokens: HashMap<ShardId, String>,
    admin_token: Option<String>,
}

impl SharedSecretAuth {
    pub fn new(shard_tokens: HashMap<ShardId, String>, admin_token: Option<String>) -> Self {
        Self {
            shard_tokens,
            admin_token,
        }
    }
}

impl Authenticator for SharedSecretAuth {
    async fn authorize(&self, peer: &Credentials<'_>) -> Result<(), RegistryError> {
        let (expected, presented, who) = match *peer {
            Credentials::Shard { shard_id, token } => {
                (self.shard_tokens.get(&shard_id), token, shard_id.to_string())
            }
            Credentials::Admin { token } => (self.admin_token.as_ref(), token, "console".into()),
        };

        match (expected, presented) {
            (None, _) => Ok(()),
            (Some(expected), Some(presented)) if expected == presented => Ok(()),
            (Some(_), Some(_)) => Err(RegistryError::Unauthorized(format!("bad token for {who}"))),
            (Some(_), None) => Err(RegistryError::Unauthorized(format!("{who} sent no token"))),
        }
    }
}
