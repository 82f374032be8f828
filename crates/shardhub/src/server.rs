//! `HubServer` builder and accept loop.
//!
//! This is the entry point for running a hub. It ties the layers
//! together: transport → protocol → registry, with the coordinator task
//! in the middle.

use std::net::SocketAddr;
use std::sync::Arc;

use shardhub_protocol::{Codec, JsonCodec};
use shardhub_registry::Authenticator;
use shardhub_transport::{Transport, WebSocketTransport};
use tokio::sync::watch;

use crate::coordinator::spawn_coordinator;
use crate::handler::{ConnContext, handle_connection};
use crate::{HubConfig, HubError, HubHandle};

/// Builder for configuring and starting a hub.
///
/// # Example
///
/// ```rust,no_run
/// use shardhub::prelude::*;
///
/// # async fn start() -> Result<(), HubError> {
/// let server = HubServer::builder()
///     .bind("0.0.0.0:43595")
///     .game_version(3)
///     .build(AllowAll)
///     .await?;
/// let hub = server.handle();
/// tokio::spawn(server.run());
/// # let _ = hub;
/// # Ok(())
/// # }
/// ```
pub struct HubServerBuilder {
    config: HubConfig,
}

impl HubServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: HubConfig::default(),
        }
    }

    /// Sets the address to bind the hub to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the game version peers must announce.
    pub fn game_version(mut self, version: u32) -> Self {
        self.config.game_version = version;
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: HubConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener and starts the coordinator.
    ///
    /// Uses `JsonCodec` and `WebSocketTransport`. Connections are not
    /// accepted until [`HubServer::run`] is called, but the returned
    /// server's [`handle`](HubServer::handle) works right away.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<HubServer<A, JsonCodec>, HubError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let (hub, stopped) = spawn_coordinator(&self.config, JsonCodec);

        let ctx = Arc::new(ConnContext {
            hub,
            auth,
            codec: JsonCodec,
            game_version: self.config.game_version,
            handshake_timeout: self.config.handshake_timeout,
        });

        Ok(HubServer {
            transport,
            ctx,
            stopped,
        })
    }
}

impl Default for HubServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A hub bound to its listening socket.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct HubServer<A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    ctx: Arc<ConnContext<A, C>>,
    stopped: watch::Receiver<bool>,
}

impl HubServer<shardhub_registry::AllowAll, JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> HubServerBuilder {
        HubServerBuilder::new()
    }
}

impl<A, C> HubServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    /// A handle to this hub's coordinator.
    pub fn handle(&self) -> HubHandle {
        self.ctx.hub.clone()
    }

    /// Returns the local address the hub is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, HubError> {
        Ok(self.transport.local_addr()?)
    }

    /// Runs the accept loop.
    ///
    /// Accepts incoming connections and spawns a handler task for each.
    /// The WebSocket upgrade runs in that task, so a stalled peer only
    /// holds up itself.
    /// Returns once the coordinator stops, after [`HubHandle::shutdown`].
    pub async fn run(mut self) -> Result<(), HubError> {
        tracing::info!(addr = %self.local_addr()?, "hub running");

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(pending) => {
                        let ctx = Arc::clone(&self.ctx);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(pending, ctx).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                _ = self.stopped.changed() => break,
            }
        }

        tracing::info!("hub stopped accepting connections");
        Ok(())
    }
}
