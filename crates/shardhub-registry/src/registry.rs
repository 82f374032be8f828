//! The registry: every registered node, keyed by instance id.
//!
//! This is the hub's only mutable shared state. It is owned by a single
//! task (the coordinator), so it uses plain maps and no locking. Anything
//! that changes membership publishes a [`RegistryEvent`] on a broadcast
//! channel for collaborators such as ops notifications.
//!
//! ## Lifecycle of one instance
//!
//! ```text
//! Connecting ──register()──→ Shard | Admin ──remove()──→ (gone)
//!     │
//!     └──rejected──→ (never stored)
//! ```

use std::collections::HashMap;
use std::time::Instant;

use shardhub_protocol::{
    CloseReason, Codec, Handshake, HubMessage, PeerKind, ProtocolError, ShardId, ShardSummary,
};
use shardhub_transport::InstanceId;
use tokio::sync::broadcast;

use crate::{Action, AdminNode, Node, PeerLink, RegistryError, ShardNode};

/// Buffer for membership events. Slow subscribers lag, they never block.
const EVENT_BUFFER: usize = 256;

/// Membership changes published to collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    ShardAdded { shard_id: ShardId, name: String },
    ShardRemoved { shard_id: ShardId, name: String },
}

/// What a successful handshake produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registered {
    Shard(ShardId),
    Admin,
}

/// A node that was just taken out of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removed {
    Shard { shard_id: ShardId, name: String },
    Admin,
}

/// Live membership of the hub.
pub struct Registry {
    /// Every node, keyed by the connection it belongs to.
    nodes: HashMap<InstanceId, Node>,

    /// Registration order. First-fit admission walks shards in this order.
    order: Vec<InstanceId>,

    /// Index from shard id to instance, kept in sync with `nodes`.
    shard_index: HashMap<ShardId, InstanceId>,

    /// The game version every peer must announce.
    game_version: u32,

    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Creates an empty registry for the given game version.
    pub fn new(game_version: u32) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            shard_index: HashMap::new(),
            game_version,
            events,
        }
    }

    pub fn game_version(&self) -> u32 {
        self.game_version
    }

    /// Subscribes to membership events. Any number of subscribers is fine,
    /// including none.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    // -- Membership -------------------------------------------------------

    /// Classifies a handshake and, if it is acceptable, stores a node.
    ///
    /// Authorization happens before this call; this only checks what the
    /// registry itself can know.
    ///
    /// # Errors
    /// - [`RegistryError::ClientRejected`] for `kind: "client"`
    /// - [`RegistryError::VersionMismatch`] when `gameVersion` differs
    /// - [`RegistryError::DuplicateShard`] when the shard id is held by a
    ///   connection; the existing node is kept untouched. A heartbeat-only
    ///   node is replaced instead.
    /// - [`RegistryError::Protocol`] when shard fields are missing
    pub fn register(
        &mut self,
        instance_id: InstanceId,
        handshake: &Handshake,
        link: PeerLink,
        now: Instant,
    ) -> Result<Registered, RegistryError> {
        if handshake.kind == PeerKind::Client {
            return Err(RegistryError::ClientRejected);
        }
        if handshake.game_version != self.game_version {
            return Err(RegistryError::VersionMismatch {
                expected: self.game_version,
                got: handshake.game_version,
            });
        }
        if self.nodes.contains_key(&instance_id) {
            return Err(RegistryError::AlreadyRegistered);
        }

        match handshake.kind {
            PeerKind::Shard => {
                let identity = handshake.shard_identity()?;
                let node = ShardNode::new(instance_id, identity, link, now);
                let shard_id = node.shard_id;
                self.insert_shard(node)?;
                Ok(Registered::Shard(shard_id))
            }
            PeerKind::Admin => {
                tracing::info!(%instance_id, "admin console attached");
                self.order.push(instance_id.clone());
                self.nodes
                    .insert(instance_id.clone(), Node::Admin(AdminNode::new(instance_id, link)));
                Ok(Registered::Admin)
            }
            PeerKind::Client => Err(RegistryError::ClientRejected),
        }
    }

    /// Stores a shard node, enforcing shard-id uniqueness.
    ///
    /// A connected node may take over the id of a heartbeat-only node;
    /// any other clash is a duplicate.
    pub(crate) fn insert_shard(&mut self, node: ShardNode) -> Result<(), RegistryError> {
        if let Some(existing) = self.shard_index.get(&node.shard_id).cloned() {
            let detached = self
                .nodes
                .get(&existing)
                .is_some_and(|n| n.link().is_detached());
            if detached && !node.link.is_detached() {
                self.attach_shard(existing, node);
                return Ok(());
            }
            tracing::warn!(
                shard_id = %node.shard_id,
                existing = %existing,
                rejected = %node.instance_id,
                "duplicate shard id, keeping the existing connection"
            );
            return Err(RegistryError::DuplicateShard(node.shard_id));
        }

        let event = RegistryEvent::ShardAdded {
            shard_id: node.shard_id,
            name: node.name.clone(),
        };
        tracing::info!(
            shard_id = %node.shard_id,
            name = %node.name,
            instance_id = %node.instance_id,
            capacity = node.capacity,
            players = node.players.len(),
            "shard registered"
        );

        self.shard_index.insert(node.shard_id, node.instance_id.clone());
        self.order.push(node.instance_id.clone());
        self.nodes.insert(node.instance_id.clone(), Node::Shard(node));
        self.publish(event);
        Ok(())
    }

    /// Replaces a heartbeat-only node with a connected one for the same
    /// shard id. The shard keeps its place in admission order and no
    /// membership event fires, since it never went away.
    fn attach_shard(&mut self, detached: InstanceId, node: ShardNode) {
        tracing::info!(
            shard_id = %node.shard_id,
            instance_id = %node.instance_id,
            replaced = %detached,
            "heartbeat-only shard attached to a connection"
        );
        self.nodes.remove(&detached);
        if let Some(slot) = self.order.iter_mut().find(|id| **id == detached) {
            *slot = node.instance_id.clone();
        }
        self.shard_index.insert(node.shard_id, node.instance_id.clone());
        self.nodes.insert(node.instance_id.clone(), Node::Shard(node));
    }

    /// Removes an instance's node. Removing an absent instance is a no-op
    /// returning `None`.
    pub fn remove(&mut self, instance_id: &InstanceId) -> Option<Removed> {
        let node = self.nodes.remove(instance_id)?;
        self.order.retain(|id| id != instance_id);

        match node {
            Node::Shard(shard) => {
                self.shard_index.remove(&shard.shard_id);
                tracing::info!(
                    shard_id = %shard.shard_id,
                    name = %shard.name,
                    %instance_id,
                    "shard removed"
                );
                self.publish(RegistryEvent::ShardRemoved {
                    shard_id: shard.shard_id,
                    name: shard.name.clone(),
                });
                Some(Removed::Shard {
                    shard_id: shard.shard_id,
                    name: shard.name,
                })
            }
            Node::Admin(_) => {
                tracing::info!(%instance_id, "admin console detached");
                Some(Removed::Admin)
            }
        }
    }

    /// Removes every node and closes each connection with `reason`.
    pub fn clear(&mut self, reason: CloseReason) -> usize {
        let ids: Vec<InstanceId> = self.order.clone();
        for id in &ids {
            if let Some(node) = self.nodes.get(id) {
                node.link().close(reason);
            }
            self.remove(id);
        }
        ids.len()
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is a normal configuration.
        let _ = self.events.send(event);
    }

    // -- Dispatch ---------------------------------------------------------

    /// Hands a post-handshake frame to the node that owns `instance_id`.
    ///
    /// Returns `Ok(None)` when the instance has no node (it disconnected
    /// while the frame was queued).
    pub fn decode_for(
        &mut self,
        instance_id: &InstanceId,
        codec: &impl Codec,
        frame: &[u8],
        now: Instant,
    ) -> Result<Option<Action>, ProtocolError> {
        match self.nodes.get_mut(instance_id) {
            Some(node) => node.handle_packet(codec, frame, now).map(Some),
            None => Ok(None),
        }
    }

    /// Sends a frame to one instance. Best-effort.
    pub fn send_to(&self, instance_id: &InstanceId, msg: HubMessage) -> bool {
        match self.nodes.get(instance_id) {
            Some(node) => deliver(node, msg),
            None => false,
        }
    }

    // -- Lookups ----------------------------------------------------------

    pub fn get(&self, instance_id: &InstanceId) -> Option<&Node> {
        self.nodes.get(instance_id)
    }

    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.nodes.contains_key(instance_id)
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<&ShardNode> {
        let instance_id = self.shard_index.get(&shard_id)?;
        self.nodes.get(instance_id).and_then(Node::as_shard)
    }

    pub(crate) fn shard_mut(&mut self, shard_id: ShardId) -> Option<&mut ShardNode> {
        let instance_id = self.shard_index.get(&shard_id)?;
        self.nodes.get_mut(instance_id).and_then(Node::as_shard_mut)
    }

    /// Shard nodes in registration order.
    pub fn shards(&self) -> impl Iterator<Item = &ShardNode> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter_map(Node::as_shard)
    }

    /// Admin nodes in registration order.
    pub fn admins(&self) -> impl Iterator<Item = &Node> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .filter(|node| node.is_admin())
    }

    pub fn shard_count(&self) -> usize {
        self.shard_index.len()
    }

    pub fn admin_count(&self) -> usize {
        self.nodes.len() - self.shard_index.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    // -- Admission --------------------------------------------------------

    /// True iff some shard has `players < capacity - 1`.
    pub fn has_capacity(&self) -> bool {
        self.shards().any(ShardNode::has_room)
    }

    /// First shard, in registration order, with room for one more player.
    ///
    /// First-fit rather than least-loaded: shard capacities are uniform,
    /// so the simplest deterministic policy is good enough.
    pub fn select_shard(&self) -> Option<&ShardNode> {
        self.shards().find(|shard| shard.has_room())
    }

    /// The first shard whose player set contains `username`.
    pub fn find_shard_of(&self, username: &str) -> Option<&ShardNode> {
        self.shards().find(|shard| shard.players.contains(username))
    }

    /// Sum of every shard's reported player count.
    pub fn total_population(&self) -> usize {
        self.shards().map(ShardNode::population).sum()
    }

    // -- Fan-out ----------------------------------------------------------

    /// Sends `msg` to every shard except `exclude`. Returns how many
    /// connections accepted the frame.
    pub fn broadcast_to_shards(&self, msg: &HubMessage, exclude: Option<&InstanceId>) -> usize {
        self.shards()
            .filter(|shard| Some(&shard.instance_id) != exclude)
            .filter(|shard| deliver_shard(shard, msg.clone()))
            .count()
    }

    /// Sends `msg` to every console except `exclude`.
    pub fn broadcast_to_admins(&self, msg: &HubMessage, exclude: Option<&InstanceId>) -> usize {
        self.admins()
            .filter(|node| Some(node.instance_id()) != exclude)
            .filter(|node| deliver(node, msg.clone()))
            .count()
    }

    /// The ordered shard list consoles mirror.
    pub fn snapshot(&self) -> Vec<ShardSummary> {
        self.shards().map(ShardNode::summary).collect()
    }

    /// Pushes the full snapshot to every console.
    ///
    /// Full state every time instead of deltas: a console that attached
    /// late converges on the first push it receives.
    pub fn resync_admins(&self) -> usize {
        if self.admin_count() == 0 {
            return 0;
        }
        let msg = HubMessage::ShardList {
            shards: self.snapshot(),
        };
        self.broadcast_to_admins(&msg, None)
    }
}

fn deliver(node: &Node, msg: HubMessage) -> bool {
    let delivered = node.link().send(msg);
    if !delivered {
        tracing::debug!(
            instance_id = %node.instance_id(),
            "peer unreachable, frame dropped"
        );
    }
    delivered
}

fn deliver_shard(shard: &ShardNode, msg: HubMessage) -> bool {
    let delivered = shard.link.send(msg);
    if !delivered {
        tracing::debug!(
            shard_id = %shard.shard_id,
            instance_id = %shard.instance_id,
            "shard unreachable, relay dropped"
        );
    }
    delivered
}
