//! Registry nodes: the hub's view of one connected shard or console.
//!
//! A node never owns its connection. It holds a [`PeerLink`], the sending
//! side of the connection's outbound queue, which goes dead the moment the
//! connection task exits. Sends through a dead link are dropped silently.

use std::collections::HashSet;
use std::time::Instant;

use shardhub_protocol::{
    AdminRequest, CloseReason, Codec, Envelope, HubMessage, ProtocolError, ShardId,
    ShardIdentity, ShardRequest, ShardSummary,
};
use shardhub_transport::InstanceId;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// PeerLink
// ---------------------------------------------------------------------------

/// What a connection's writer task is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encode and send one frame.
    Message(HubMessage),
    /// Send a close frame with this reason and stop.
    Close(CloseReason),
}

/// Channel sender for a connection's writer task.
pub type PeerSender = mpsc::UnboundedSender<Outbound>;

/// A node's back-reference to its connection.
///
/// Cheap to clone. A detached link (heartbeat-only shards) has no queue
/// at all and behaves like a closed one.
#[derive(Debug, Clone)]
pub struct PeerLink {
    tx: Option<PeerSender>,
}

impl PeerLink {
    /// Links to a live connection's outbound queue.
    pub fn new(tx: PeerSender) -> Self {
        Self { tx: Some(tx) }
    }

    /// A link with no connection behind it.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Queues a frame. Returns `false` if the connection is gone; the
    /// frame is dropped and callers treat it as best-effort delivered.
    pub fn send(&self, msg: HubMessage) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Outbound::Message(msg)).is_ok(),
            None => false,
        }
    }

    /// Asks the writer task to close the connection with `reason`.
    pub fn close(&self, reason: CloseReason) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Outbound::Close(reason));
        }
    }

    /// Whether this link was created without a connection.
    pub fn is_detached(&self) -> bool {
        self.tx.is_none()
    }

    /// Whether a connection is still attached.
    pub fn is_open(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Work a node hands back to the registry after decoding a frame.
///
/// Anything touching other nodes (relays, lookups) can only be done by
/// the registry, so nodes apply their own state changes and return the
/// rest as an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Shard {
        request_id: Option<u64>,
        request: ShardRequest,
    },
    Admin {
        request_id: Option<u64>,
        request: AdminRequest,
    },
}

/// A registered peer.
#[derive(Debug)]
pub enum Node {
    Shard(ShardNode),
    Admin(AdminNode),
}

impl Node {
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Node::Shard(shard) => &shard.instance_id,
            Node::Admin(admin) => &admin.instance_id,
        }
    }

    pub fn link(&self) -> &PeerLink {
        match self {
            Node::Shard(shard) => &shard.link,
            Node::Admin(admin) => &admin.link,
        }
    }

    pub fn as_shard(&self) -> Option<&ShardNode> {
        match self {
            Node::Shard(shard) => Some(shard),
            Node::Admin(_) => None,
        }
    }

    pub fn as_shard_mut(&mut self) -> Option<&mut ShardNode> {
        match self {
            Node::Shard(shard) => Some(shard),
            Node::Admin(_) => None,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Node::Admin(_))
    }

    /// Decodes one post-handshake frame with the variant's own grammar.
    pub fn handle_packet(
        &mut self,
        codec: &impl Codec,
        frame: &[u8],
        now: Instant,
    ) -> Result<Action, ProtocolError> {
        match self {
            Node::Shard(shard) => shard.handle_packet(codec, frame, now),
            Node::Admin(admin) => admin.handle_packet(codec, frame),
        }
    }
}

// ---------------------------------------------------------------------------
// ShardNode
// ---------------------------------------------------------------------------

/// One connected game-server process.
#[derive(Debug)]
pub struct ShardNode {
    pub instance_id: InstanceId,
    pub shard_id: ShardId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub access_token: Option<String>,
    pub capacity: usize,
    /// Usernames the shard last told us about. A lower bound on true
    /// occupancy: it lags behind whatever the shard has not reported yet.
    pub players: HashSet<String>,
    /// Last handshake, ping, or heartbeat.
    pub last_seen: Instant,
    pub link: PeerLink,
}

impl ShardNode {
    pub fn new(
        instance_id: InstanceId,
        identity: ShardIdentity,
        link: PeerLink,
        now: Instant,
    ) -> Self {
        Self {
            instance_id,
            shard_id: identity.shard_id,
            name: identity.name,
            host: identity.host,
            port: identity.port,
            access_token: identity.access_token,
            capacity: identity.capacity,
            players: identity.players.into_iter().collect(),
            last_seen: now,
            link,
        }
    }

    /// Whether this shard can admit one more player, keeping one slot
    /// spare for joins already in flight.
    pub fn has_room(&self) -> bool {
        self.players.len() + 1 < self.capacity
    }

    pub fn population(&self) -> usize {
        self.players.len()
    }

    pub fn summary(&self) -> ShardSummary {
        ShardSummary {
            shard_id: self.shard_id,
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            population: self.players.len(),
            capacity: self.capacity,
        }
    }

    /// Replaces the cached player list and refreshes liveness.
    pub fn refresh(&mut self, players: Vec<String>, now: Instant) {
        self.players = players.into_iter().collect();
        self.last_seen = now;
    }

    fn handle_packet(
        &mut self,
        codec: &impl Codec,
        frame: &[u8],
        now: Instant,
    ) -> Result<Action, ProtocolError> {
        let Envelope { request_id, packet } = codec.decode::<Envelope<ShardRequest>>(frame)?;

        match &packet {
            ShardRequest::Ping {
                shard_id,
                players,
                capacity,
            } => {
                if *shard_id != self.shard_id {
                    return Err(ProtocolError::InvalidMessage(format!(
                        "ping for {shard_id} on the connection of {}",
                        self.shard_id
                    )));
                }
                self.refresh(players.clone(), now);
                if let Some(capacity) = capacity {
                    self.capacity = *capacity;
                }
            }
            ShardRequest::Login { username, shard_id } if *shard_id == self.shard_id => {
                self.players.insert(username.clone());
            }
            ShardRequest::Logout { username } => {
                self.players.remove(username);
            }
            ShardRequest::FriendsQuery {
                username,
                logging_out: true,
                ..
            } => {
                self.players.remove(username);
            }
            _ => {}
        }

        Ok(Action::Shard {
            request_id,
            request: packet,
        })
    }
}

// ---------------------------------------------------------------------------
// AdminNode
// ---------------------------------------------------------------------------

/// One connected operator console. Holds no state of its own; it is a
/// read replica fed by registry snapshots.
#[derive(Debug)]
pub struct AdminNode {
    pub instance_id: InstanceId,
    pub link: PeerLink,
}

impl AdminNode {
    pub fn new(instance_id: InstanceId, link: PeerLink) -> Self {
        Self { instance_id, link }
    }

    fn handle_packet(
        &mut self,
        codec: &impl Codec,
        frame: &[u8],
    ) -> Result<Action, ProtocolError> {
        let Envelope { request_id, packet } = codec.decode::<Envelope<AdminRequest>>(frame)?;
        Ok(Action::Admin {
            request_id,
            request: packet,
        })
    }
}
