//! Cross-shard relays.
//!
//! Shards never talk to each other. Everything one shard needs another to
//! hear goes through here, fanned out over the registry's links. Every
//! send is best-effort: an unreachable shard is logged and skipped, and
//! the caller never sees an error for it.

use std::collections::BTreeMap;

use shardhub_protocol::{
    AdminRequest, FriendPresence, HubMessage, ResponseData, ShardId, ShardRequest,
};
use shardhub_transport::InstanceId;

use crate::{Action, Registry, ShardNode};

/// Error text for a private message nobody can receive.
pub(crate) const TARGET_OFFLINE: &str = "target offline";

impl Registry {
    /// Relays a chat line to every shard except `exclude`.
    pub fn broadcast_chat(
        &self,
        source: &str,
        text: &str,
        colour: &str,
        with_arrow: bool,
        exclude: Option<&InstanceId>,
    ) -> usize {
        let msg = HubMessage::Chat {
            source: source.to_owned(),
            text: text.to_owned(),
            colour: colour.to_owned(),
            with_arrow,
        };
        let sent = self.broadcast_to_shards(&msg, exclude);
        tracing::debug!(source, sent, "chat relayed");
        sent
    }

    /// Delivers a private message to whichever shard hosts `target`.
    ///
    /// Returns the shard it went to, or `None` when the target is not
    /// online anywhere; in that case nothing is sent.
    pub fn private_message(&self, source: &str, target: &str, text: &str) -> Option<ShardId> {
        let Some(shard) = self.find_shard_of(target) else {
            tracing::debug!(source, target, "private message target offline");
            return None;
        };

        shard.link.send(HubMessage::PrivateMessage {
            source: source.to_owned(),
            target: target.to_owned(),
            text: text.to_owned(),
        });
        Some(shard.shard_id)
    }

    /// Presence check for `username` logging in on `requester`.
    ///
    /// Scans every shard except the requester. Each name in `friends`
    /// found online is reported with the shard hosting it (first match
    /// wins). Every non-empty shard scanned also learns that `username`
    /// is now online on `requester`.
    pub fn friends_query(
        &self,
        requester: ShardId,
        username: &str,
        friends: &[String],
    ) -> BTreeMap<String, FriendPresence> {
        let mut active = BTreeMap::new();
        let login = HubMessage::LoginBroadcast {
            username: username.to_owned(),
            shard_id: requester,
        };

        for shard in self.shards().filter(|s| s.shard_id != requester) {
            for friend in friends {
                if shard.players.contains(friend) && !active.contains_key(friend) {
                    active.insert(
                        friend.clone(),
                        FriendPresence {
                            online: true,
                            shard_id: shard.shard_id,
                        },
                    );
                }
            }
            if !shard.players.is_empty() {
                notify(shard, login.clone());
            }
        }

        active
    }

    /// Tells every shard except `origin` that `username` logged in.
    pub fn propagate_login(
        &self,
        username: &str,
        shard_id: ShardId,
        origin: Option<&InstanceId>,
    ) -> usize {
        let msg = HubMessage::LoginBroadcast {
            username: username.to_owned(),
            shard_id,
        };
        self.broadcast_to_shards(&msg, origin)
    }

    /// Tells every shard except `origin` that `username` logged out.
    pub fn propagate_logout(&self, username: &str, origin: Option<&InstanceId>) -> usize {
        let msg = HubMessage::LogoutBroadcast {
            username: username.to_owned(),
        };
        self.broadcast_to_shards(&msg, origin)
    }

    /// Whether `username` is in any shard's player set, ignoring
    /// `excluding` (normally the asking shard).
    pub fn is_online(&self, username: &str, excluding: Option<ShardId>) -> bool {
        self.shards()
            .filter(|s| Some(s.shard_id) != excluding)
            .any(|s| s.players.contains(username))
    }

    /// Carries out what a node's `handle_packet` asked for.
    ///
    /// Returns the response for the origin, if there is one. Queries
    /// (`FriendsQuery`, `IsOnline`, `PrivateMessage`) always answer;
    /// fire-and-forget packets answer only when they carried a request id.
    pub fn execute(&self, origin: &InstanceId, action: Action) -> Option<HubMessage> {
        match action {
            Action::Shard {
                request_id,
                request,
            } => self.execute_shard(origin, request_id, request),
            Action::Admin {
                request_id,
                request,
            } => self.execute_admin(request_id, request),
        }
    }

    fn execute_shard(
        &self,
        origin: &InstanceId,
        request_id: Option<u64>,
        request: ShardRequest,
    ) -> Option<HubMessage> {
        let ack = || request_id.map(|id| HubMessage::success(Some(id), None));

        match request {
            // State was already applied by the node.
            ShardRequest::Ping { .. } => ack(),

            ShardRequest::Chat {
                source,
                text,
                colour,
                with_arrow,
            } => {
                self.broadcast_chat(&source, &text, &colour, with_arrow, Some(origin));
                ack()
            }

            ShardRequest::PrivateMessage {
                source,
                target,
                text,
            } => Some(match self.private_message(&source, &target, &text) {
                Some(shard_id) => {
                    HubMessage::success(request_id, Some(ResponseData::Delivered { shard_id }))
                }
                None => HubMessage::error(request_id, TARGET_OFFLINE),
            }),

            ShardRequest::FriendsQuery {
                shard_id,
                username,
                inactive_friends,
                logging_out,
            } => {
                let active_friends = if logging_out {
                    self.propagate_logout(&username, Some(origin));
                    BTreeMap::new()
                } else {
                    self.friends_query(shard_id, &username, &inactive_friends)
                };
                Some(HubMessage::success(
                    request_id,
                    Some(ResponseData::Friends { active_friends }),
                ))
            }

            ShardRequest::Login { username, shard_id } => {
                self.propagate_login(&username, shard_id, Some(origin));
                ack()
            }

            ShardRequest::Logout { username } => {
                self.propagate_logout(&username, Some(origin));
                ack()
            }

            ShardRequest::IsOnline { username, shard_id } => {
                let online = self.is_online(&username, Some(shard_id));
                Some(HubMessage::success(
                    request_id,
                    Some(ResponseData::Online { online }),
                ))
            }
        }
    }

    fn execute_admin(&self, request_id: Option<u64>, request: AdminRequest) -> Option<HubMessage> {
        match request {
            AdminRequest::Chat {
                source,
                text,
                colour,
            } => {
                self.broadcast_chat(&source, &text, &colour, false, None);
            }
            // The coordinator resyncs every console after each dispatch,
            // so the requester gets the snapshot without extra work.
            AdminRequest::Refresh => {}
        }
        request_id.map(|id| HubMessage::success(Some(id), None))
    }
}

fn notify(shard: &ShardNode, msg: HubMessage) {
    if !shard.link.send(msg) {
        tracing::debug!(
            shard_id = %shard.shard_id,
            "shard unreachable, presence relay dropped"
        );
    }
}
