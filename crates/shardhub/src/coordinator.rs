//! The coordinator: one task that owns the registry.
//!
//! Every inbound frame, disconnect, heartbeat, query, and sweep tick
//! arrives here as a [`Command`] and is handled to completion before the
//! next one, so the registry needs no locks. Outbound traffic leaves
//! through the nodes' links, which are plain queue pushes and never wait.

use std::time::{Duration, Instant};

use shardhub_protocol::{
    CloseReason, Codec, Handshake, HeartbeatReport, HubMessage, RequestTag, ShardId, ShardSummary,
};
use shardhub_registry::{
    HeartbeatOutcome, PeerLink, Registered, Registry, RegistryError, RegistryEvent,
};
use shardhub_transport::InstanceId;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::{HubConfig, HubHandle};

/// Commands sent to the coordinator through its channel.
///
/// The `oneshot::Sender` in some variants is the reply channel: the caller
/// sends a command and waits for the answer on it.
pub(crate) enum Command {
    /// Classify a handshake and store the node.
    Register {
        instance_id: InstanceId,
        handshake: Box<Handshake>,
        link: PeerLink,
        reply: oneshot::Sender<Result<Registered, RegistryError>>,
    },

    /// A post-handshake frame from a registered connection.
    Frame { instance_id: InstanceId, data: Vec<u8> },

    /// The connection's reader stopped.
    Disconnected { instance_id: InstanceId },

    /// Out-of-band liveness report.
    Heartbeat {
        report: HeartbeatReport,
        reply: oneshot::Sender<Result<HeartbeatOutcome, RegistryError>>,
    },

    HasCapacity {
        reply: oneshot::Sender<bool>,
    },
    SelectShard {
        reply: oneshot::Sender<Option<ShardSummary>>,
    },
    FindShardOf {
        username: String,
        reply: oneshot::Sender<Option<ShardSummary>>,
    },
    TotalPopulation {
        reply: oneshot::Sender<usize>,
    },
    ShardCount {
        reply: oneshot::Sender<usize>,
    },
    IsOnline {
        username: String,
        excluding: Option<ShardId>,
        reply: oneshot::Sender<bool>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<ShardSummary>>,
    },

    /// Hub-originated chat to every shard.
    BroadcastChat {
        source: String,
        text: String,
        colour: String,
        reply: oneshot::Sender<usize>,
    },

    /// Hub-originated private message.
    PrivateMessage {
        source: String,
        target: String,
        text: String,
        reply: oneshot::Sender<Option<ShardId>>,
    },

    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<RegistryEvent>>,
    },

    /// Close every connection and stop.
    Shutdown { reply: oneshot::Sender<()> },
}

/// The coordinator's state. Runs inside a Tokio task.
struct Coordinator<C: Codec> {
    registry: Registry,
    codec: C,
    commands: mpsc::Receiver<Command>,
    sweep_interval: Duration,
    cleanup_threshold: Duration,
    /// Flipped once the registry has been cleared on the way out.
    stopped: watch::Sender<bool>,
}

impl<C: Codec> Coordinator<C> {
    /// Runs the command loop until shutdown.
    async fn run(mut self) {
        tracing::info!(
            game_version = self.registry.game_version(),
            "coordinator started"
        );

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_reply = None;

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown { reply }) => {
                        shutdown_reply = Some(reply);
                        break;
                    }
                    Some(cmd) => self.handle(cmd, now()),
                    None => break,
                },
                _ = sweep.tick() => self.sweep(now()),
            }
        }

        let closed = self.registry.clear(CloseReason::HubShutdown);
        tracing::info!(closed, "coordinator stopped");
        let _ = self.stopped.send(true);
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
    }

    fn handle(&mut self, cmd: Command, now: Instant) {
        match cmd {
            Command::Register {
                instance_id,
                handshake,
                link,
                reply,
            } => {
                let result = self.registry.register(instance_id, &handshake, link, now);
                if result.is_ok() {
                    self.registry.resync_admins();
                }
                let _ = reply.send(result);
            }

            Command::Frame { instance_id, data } => self.dispatch(&instance_id, &data, now),

            Command::Disconnected { instance_id } => {
                if self.registry.remove(&instance_id).is_some() {
                    self.registry.resync_admins();
                }
            }

            Command::Heartbeat { report, reply } => {
                let result = self.registry.record_heartbeat(report, now);
                if result.is_ok() {
                    self.registry.resync_admins();
                }
                let _ = reply.send(result);
            }

            Command::HasCapacity { reply } => {
                let _ = reply.send(self.registry.has_capacity());
            }
            Command::SelectShard { reply } => {
                let _ = reply.send(self.registry.select_shard().map(|s| s.summary()));
            }
            Command::FindShardOf { username, reply } => {
                let found = self.registry.find_shard_of(&username).map(|s| s.summary());
                let _ = reply.send(found);
            }
            Command::TotalPopulation { reply } => {
                let _ = reply.send(self.registry.total_population());
            }
            Command::ShardCount { reply } => {
                let _ = reply.send(self.registry.shard_count());
            }
            Command::IsOnline {
                username,
                excluding,
                reply,
            } => {
                let _ = reply.send(self.registry.is_online(&username, excluding));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.registry.snapshot());
            }

            Command::BroadcastChat {
                source,
                text,
                colour,
                reply,
            } => {
                let sent = self
                    .registry
                    .broadcast_chat(&source, &text, &colour, false, None);
                let _ = reply.send(sent);
            }
            Command::PrivateMessage {
                source,
                target,
                text,
                reply,
            } => {
                let _ = reply.send(self.registry.private_message(&source, &target, &text));
            }

            Command::Subscribe { reply } => {
                let _ = reply.send(self.registry.subscribe());
            }

            // The run loop intercepts shutdown before it gets here.
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Hands a frame to its node, carries out the resulting action, and
    /// resyncs the consoles.
    ///
    /// A frame that fails to decode is logged and dropped; the connection
    /// stays open. If the frame still carries a `requestId`, the request
    /// is answered with an error response.
    fn dispatch(&mut self, instance_id: &InstanceId, data: &[u8], now: Instant) {
        let action = match self.registry.decode_for(instance_id, &self.codec, data, now) {
            Ok(Some(action)) => action,
            Ok(None) => {
                tracing::debug!(%instance_id, "frame from unregistered instance dropped");
                return;
            }
            Err(e) => {
                tracing::debug!(%instance_id, error = %e, "malformed frame dropped");
                if let Ok(RequestTag {
                    request_id: Some(request_id),
                }) = self.codec.decode::<RequestTag>(data)
                {
                    let reply = HubMessage::error(Some(request_id), e.to_string());
                    self.registry.send_to(instance_id, reply);
                }
                return;
            }
        };

        if let Some(reply) = self.registry.execute(instance_id, action) {
            self.registry.send_to(instance_id, reply);
        }
        self.registry.resync_admins();
    }

    fn sweep(&mut self, now: Instant) {
        let evicted = self.registry.sweep(now, self.cleanup_threshold);
        if !evicted.is_empty() {
            tracing::info!(count = evicted.len(), "TTL sweep evicted shards");
            self.registry.resync_admins();
        }
    }
}

/// Reads the runtime clock, which tests can pause and advance.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Spawns the coordinator and returns a handle to it, plus a receiver
/// that flips to `true` once it has stopped.
pub(crate) fn spawn_coordinator<C: Codec>(
    config: &HubConfig,
    codec: C,
) -> (HubHandle, watch::Receiver<bool>) {
    let (tx, rx) = mpsc::channel(config.command_buffer);
    let (stopped_tx, stopped_rx) = watch::channel(false);

    let coordinator = Coordinator {
        registry: Registry::new(config.game_version),
        codec,
        commands: rx,
        sweep_interval: config.sweep_interval,
        cleanup_threshold: config.cleanup_threshold,
        stopped: stopped_tx,
    };

    tokio::spawn(coordinator.run());

    (HubHandle::new(tx), stopped_rx)
}
