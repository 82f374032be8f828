//! [`HubHandle`]: the way in to the coordinator.

use shardhub_protocol::{Handshake, HeartbeatReport, ShardId, ShardSummary};
use shardhub_registry::{HeartbeatOutcome, PeerLink, Registered, RegistryEvent};
use shardhub_transport::InstanceId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::HubError;
use crate::coordinator::Command;

/// Handle to the running coordinator.
///
/// Cheap to clone; it is just an `mpsc::Sender` wrapper. Connection tasks
/// use it to feed frames in, and collaborators outside the hub (HTTP
/// handlers, chat bridges) use it for admission and relay operations.
///
/// Every method fails with [`HubError::Stopped`] once the coordinator has
/// shut down.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<Command>,
}

impl HubHandle {
    pub(crate) fn new(sender: mpsc::Sender<Command>) -> Self {
        Self { sender }
    }

    /// Sends a command carrying a reply channel and waits for the answer.
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| HubError::Stopped)?;
        reply_rx.await.map_err(|_| HubError::Stopped)
    }

    async fn notify(&self, cmd: Command) -> Result<(), HubError> {
        self.sender.send(cmd).await.map_err(|_| HubError::Stopped)
    }

    // -- Connection plumbing ----------------------------------------------

    pub(crate) async fn register(
        &self,
        instance_id: InstanceId,
        handshake: Handshake,
        link: PeerLink,
    ) -> Result<Registered, HubError> {
        let result = self
            .request(|reply| Command::Register {
                instance_id,
                handshake: Box::new(handshake),
                link,
                reply,
            })
            .await?;
        Ok(result?)
    }

    pub(crate) async fn frame(&self, instance_id: InstanceId, data: Vec<u8>) -> Result<(), HubError> {
        self.notify(Command::Frame { instance_id, data }).await
    }

    /// Queues a disconnect without waiting. Only when the channel is full
    /// does the notice go out from a spawned task. After shutdown there is
    /// nothing left to remove, so a closed channel is ignored.
    pub(crate) fn disconnected(&self, instance_id: InstanceId) {
        match self.sender.try_send(Command::Disconnected { instance_id }) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(cmd)) => {
                let sender = self.sender.clone();
                tokio::spawn(async move {
                    let _ = sender.send(cmd).await;
                });
            }
        }
    }

    // -- Admission --------------------------------------------------------

    /// True iff some shard can admit one more player.
    pub async fn has_capacity(&self) -> Result<bool, HubError> {
        self.request(|reply| Command::HasCapacity { reply }).await
    }

    /// First shard, in registration order, with room for one more player.
    pub async fn select_shard(&self) -> Result<Option<ShardSummary>, HubError> {
        self.request(|reply| Command::SelectShard { reply }).await
    }

    pub async fn find_shard_of(
        &self,
        username: impl Into<String>,
    ) -> Result<Option<ShardSummary>, HubError> {
        let username = username.into();
        self.request(|reply| Command::FindShardOf { username, reply })
            .await
    }

    pub async fn total_population(&self) -> Result<usize, HubError> {
        self.request(|reply| Command::TotalPopulation { reply }).await
    }

    pub async fn shard_count(&self) -> Result<usize, HubError> {
        self.request(|reply| Command::ShardCount { reply }).await
    }

    /// Whether `username` is online on any shard other than `excluding`.
    pub async fn is_online(
        &self,
        username: impl Into<String>,
        excluding: Option<ShardId>,
    ) -> Result<bool, HubError> {
        let username = username.into();
        self.request(|reply| Command::IsOnline {
            username,
            excluding,
            reply,
        })
        .await
    }

    /// The ordered shard list consoles see.
    pub async fn snapshot(&self) -> Result<Vec<ShardSummary>, HubError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    // -- Relays -----------------------------------------------------------

    /// Sends a chat line to every shard. Returns how many took it.
    pub async fn broadcast_chat(
        &self,
        source: impl Into<String>,
        text: impl Into<String>,
        colour: impl Into<String>,
    ) -> Result<usize, HubError> {
        let (source, text, colour) = (source.into(), text.into(), colour.into());
        self.request(|reply| Command::BroadcastChat {
            source,
            text,
            colour,
            reply,
        })
        .await
    }

    /// Routes a private message to the target's shard. `Ok(None)` means
    /// the target is offline and nothing was sent.
    pub async fn private_message(
        &self,
        source: impl Into<String>,
        target: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Option<ShardId>, HubError> {
        let (source, target, text) = (source.into(), target.into(), text.into());
        self.request(|reply| Command::PrivateMessage {
            source,
            target,
            text,
            reply,
        })
        .await
    }

    // -- Liveness and events ----------------------------------------------

    /// Records a heartbeat, registering the shard if it is new.
    ///
    /// # Errors
    /// [`HubError::Registry`] when an unknown shard reports without its
    /// name, host, and port, or claims an id that is already live.
    pub async fn report_heartbeat(
        &self,
        report: HeartbeatReport,
    ) -> Result<HeartbeatOutcome, HubError> {
        let result = self
            .request(|reply| Command::Heartbeat { report, reply })
            .await?;
        Ok(result?)
    }

    /// Subscribes to shard added/removed events.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<RegistryEvent>, HubError> {
        self.request(|reply| Command::Subscribe { reply }).await
    }

    /// Closes every connection with `hub-shutdown` and stops the
    /// coordinator. The server's accept loop exits once this returns.
    ///
    /// Shutting down a hub that already stopped is a no-op.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        match self.request(|reply| Command::Shutdown { reply }).await {
            Ok(()) | Err(HubError::Stopped) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
