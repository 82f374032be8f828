//! Per-connection handler: handshake, authorization, and frame pumping.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Upgrade to WebSocket and receive the Handshake, both within the
//!      handshake timeout
//!   2. Authorize the peer's token
//!   3. Register with the coordinator, which classifies the peer
//!   4. Spawn the writer, then loop: receive frames → forward to coordinator

use std::sync::Arc;
use std::time::Duration;

use shardhub_protocol::{CloseReason, Codec, Handshake, PeerKind};
use shardhub_registry::{Authenticator, Credentials, Outbound, PeerLink};
use shardhub_transport::{
    Connection, InstanceId, PendingConnection, PendingWebSocket, WebSocketConnection,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::{HubError, HubHandle};

/// Shared state passed to each connection task.
pub(crate) struct ConnContext<A: Authenticator, C: Codec> {
    pub(crate) hub: HubHandle,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) game_version: u32,
    pub(crate) handshake_timeout: Duration,
}

/// Drop guard that tells the coordinator a registered connection is gone.
///
/// Runs even if the handler panics. The notice is queued before the drop
/// returns, so it is ahead of any later handshake from the same peer.
struct RegistrationGuard {
    instance_id: InstanceId,
    hub: HubHandle,
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.hub.disconnected(self.instance_id.clone());
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    pending: PendingWebSocket,
    ctx: Arc<ConnContext<A, C>>,
) -> Result<(), HubError>
where
    A: Authenticator,
    C: Codec,
{
    let instance_id = pending.id().clone();
    let peer = pending.peer_addr();
    let deadline = Instant::now() + ctx.handshake_timeout;

    // --- Step 1: Upgrade and handshake ---
    let conn = match tokio::time::timeout_at(deadline, pending.upgrade()).await {
        Ok(Ok(conn)) => Arc::new(conn),
        Ok(Err(e)) => {
            tracing::debug!(%instance_id, %peer, error = %e, "upgrade failed");
            return Ok(());
        }
        Err(_) => {
            // No WebSocket yet, so there is no close frame to send.
            tracing::warn!(%instance_id, %peer, timeout = ?ctx.handshake_timeout, "no upgrade in time");
            return Ok(());
        }
    };
    tracing::debug!(%instance_id, %peer, "handling new connection");

    let Some(handshake) = receive_handshake(&conn, &ctx, deadline).await? else {
        return Ok(());
    };

    // --- Step 2: Authorization ---
    if let Some(credentials) = credentials(&handshake, ctx.game_version) {
        if let Err(e) = ctx.auth.authorize(&credentials).await {
            tracing::warn!(%instance_id, error = %e, "handshake rejected");
            close(&conn, e.close_reason()).await;
            return Ok(());
        }
    }

    // --- Step 3: Registration ---
    let (tx, rx) = mpsc::unbounded_channel();
    let registered = match ctx
        .hub
        .register(instance_id.clone(), handshake, PeerLink::new(tx))
        .await
    {
        Ok(registered) => registered,
        Err(HubError::Registry(e)) => {
            tracing::warn!(%instance_id, error = %e, "handshake rejected");
            close(&conn, e.close_reason()).await;
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    let _guard = RegistrationGuard {
        instance_id: instance_id.clone(),
        hub: ctx.hub.clone(),
    };
    tracing::info!(%instance_id, ?registered, "peer registered");

    // --- Step 4: Frame loop ---
    // The writer exits when the coordinator drops the node's link or
    // asks for a close, whichever comes first.
    tokio::spawn(write_loop(Arc::clone(&conn), rx, Arc::clone(&ctx)));

    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                tracing::info!(%instance_id, "connection closed");
                break;
            }
            Err(e) => {
                tracing::debug!(%instance_id, error = %e, "recv error");
                break;
            }
        };

        if ctx.hub.frame(instance_id.clone(), data).await.is_err() {
            break;
        }
    }

    // _guard drops here → coordinator removes the node.
    Ok(())
}

/// Waits for the first frame, until `deadline`, and parses it as a
/// handshake.
///
/// Returns `Ok(None)` when the peer was closed instead (timeout,
/// malformed frame, or the peer hung up first).
async fn receive_handshake<A, C>(
    conn: &WebSocketConnection,
    ctx: &ConnContext<A, C>,
    deadline: Instant,
) -> Result<Option<Handshake>, HubError>
where
    A: Authenticator,
    C: Codec,
{
    let instance_id = conn.id();

    let data = match tokio::time::timeout_at(deadline, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            tracing::debug!(%instance_id, "closed before handshake");
            return Ok(None);
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            tracing::warn!(%instance_id, timeout = ?ctx.handshake_timeout, "no handshake in time");
            close(conn, CloseReason::HandshakeTimeout).await;
            return Ok(None);
        }
    };

    match ctx.codec.decode::<Handshake>(&data) {
        Ok(handshake) => Ok(Some(handshake)),
        Err(e) => {
            tracing::warn!(%instance_id, error = %e, "malformed handshake");
            close(conn, CloseReason::MalformedHandshake).await;
            Ok(None)
        }
    }
}

/// What the authenticator needs to see, if anything.
///
/// Handshakes the registry will refuse anyway (clients, wrong version)
/// skip authorization so the peer learns the real reason.
fn credentials(handshake: &Handshake, game_version: u32) -> Option<Credentials<'_>> {
    if handshake.game_version != game_version {
        return None;
    }
    let token = handshake.access_token.as_deref();
    match handshake.kind {
        PeerKind::Shard => handshake
            .shard_id
            .map(|shard_id| Credentials::Shard { shard_id, token }),
        PeerKind::Admin => Some(Credentials::Admin { token }),
        PeerKind::Client => None,
    }
}

/// Drains the connection's outbound queue onto the socket.
async fn write_loop<A, C>(
    conn: Arc<WebSocketConnection>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ctx: Arc<ConnContext<A, C>>,
) where
    A: Authenticator,
    C: Codec,
{
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(msg) => {
                let bytes = match ctx.codec.encode(&msg) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::debug!(instance_id = %conn.id(), error = %e, "encode failed");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(instance_id = %conn.id(), error = %e, "send failed");
                    break;
                }
            }
            Outbound::Close(reason) => {
                tracing::info!(instance_id = %conn.id(), %reason, "closing connection");
                close(&conn, reason).await;
                break;
            }
        }
    }
}

/// Closes the connection with `reason`. Errors just mean the peer is
/// already gone.
async fn close(conn: &WebSocketConnection, reason: CloseReason) {
    if let Err(e) = conn.close(reason.as_str()).await {
        tracing::debug!(instance_id = %conn.id(), error = %e, "close failed");
    }
}
