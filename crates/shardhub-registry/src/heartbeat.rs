//! Heartbeat reports and the TTL sweep.
//!
//! Push traffic (pings over the shard's connection) is the primary
//! liveness signal. Heartbeats are the fallback for shards that report
//! out of band; both land in the same `last_seen` field, and the sweep
//! evicts anything that has gone quiet for longer than the threshold.

use std::time::{Duration, Instant};

use shardhub_protocol::{CloseReason, HeartbeatReport, ProtocolError, ShardId, ShardIdentity};
use shardhub_transport::InstanceId;

use crate::{PeerLink, Registry, RegistryError, Removed, ShardNode};

/// What a heartbeat did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// A known shard's players and `last_seen` were refreshed.
    Refreshed,
    /// The shard was unknown and has been registered without a connection.
    Registered,
}

/// Instance id given to a shard known only through heartbeats.
pub fn heartbeat_instance_id(shard_id: ShardId) -> InstanceId {
    InstanceId::from_raw(format!("heartbeat-{}", shard_id.0))
}

impl Registry {
    /// Records a liveness report.
    ///
    /// # Errors
    /// [`RegistryError::Protocol`] when the shard is unknown and the report
    /// lacks the name, host, and port needed to register it.
    pub fn record_heartbeat(
        &mut self,
        report: HeartbeatReport,
        now: Instant,
    ) -> Result<HeartbeatOutcome, RegistryError> {
        if let Some(shard) = self.shard_mut(report.shard_id) {
            shard.refresh(report.players, now);
            shard.capacity = report.capacity;
            tracing::trace!(shard_id = %report.shard_id, "heartbeat");
            return Ok(HeartbeatOutcome::Refreshed);
        }

        let (Some(name), Some(host), Some(port)) = (report.name, report.host, report.port) else {
            return Err(ProtocolError::InvalidMessage(format!(
                "heartbeat from unknown {} without name, host and port",
                report.shard_id
            ))
            .into());
        };

        let identity = ShardIdentity {
            shard_id: report.shard_id,
            name,
            host,
            port,
            capacity: report.capacity,
            players: report.players,
            access_token: report.access_token,
        };
        let node = ShardNode::new(
            heartbeat_instance_id(report.shard_id),
            identity,
            PeerLink::detached(),
            now,
        );
        self.insert_shard(node)?;
        Ok(HeartbeatOutcome::Registered)
    }

    /// Evicts every shard silent for more than `threshold`.
    ///
    /// A shard exactly at the threshold survives. Evicted shards with a
    /// live connection are asked to close it.
    pub fn sweep(&mut self, now: Instant, threshold: Duration) -> Vec<Removed> {
        let stale: Vec<InstanceId> = self
            .shards()
            .filter(|s| now.saturating_duration_since(s.last_seen) > threshold)
            .map(|s| s.instance_id.clone())
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for instance_id in stale {
            if let Some(node) = self.get(&instance_id) {
                node.link().close(CloseReason::Evicted);
            }
            if let Some(removed) = self.remove(&instance_id) {
                tracing::info!(%instance_id, ?threshold, "shard evicted after TTL");
                evicted.push(removed);
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Outbound;
    use shardhub_protocol::Handshake;
    use tokio::sync::mpsc;

    const TTL: Duration = Duration::from_secs(30);

    fn report(id: u32, players: &[&str], with_identity: bool) -> HeartbeatReport {
        HeartbeatReport {
            shard_id: ShardId(id),
            players: players.iter().map(|p| p.to_string()).collect(),
            capacity: 100,
            name: with_identity.then(|| format!("hb-{id}")),
            host: with_identity.then(|| "10.1.0.5".to_string()),
            port: with_identity.then_some(43594),
            access_token: None,
        }
    }

    #[test]
    fn test_heartbeat_unknown_shard_registers_detached_node() {
        let mut reg = Registry::new(1);
        let now = Instant::now();

        let outcome = reg.record_heartbeat(report(5, &["x"], true), now).unwrap();

        assert_eq!(outcome, HeartbeatOutcome::Registered);
        let shard = reg.shard(ShardId(5)).unwrap();
        assert_eq!(shard.instance_id, heartbeat_instance_id(ShardId(5)));
        assert_eq!(shard.instance_id.as_str(), "heartbeat-5");
        assert!(!shard.link.is_open());
        assert_eq!(reg.total_population(), 1);
    }

    #[test]
    fn test_heartbeat_unknown_shard_without_identity_is_error() {
        let mut reg = Registry::new(1);
        let result = reg.record_heartbeat(report(5, &[], false), Instant::now());
        assert!(matches!(result, Err(RegistryError::Protocol(_))));
        assert_eq!(reg.shard_count(), 0);
    }

    #[test]
    fn test_heartbeat_known_shard_replaces_players() {
        let mut reg = Registry::new(1);
        let start = Instant::now();
        reg.record_heartbeat(report(5, &["x", "y"], true), start).unwrap();

        let later = start + Duration::from_secs(10);
        let outcome = reg.record_heartbeat(report(5, &["z"], false), later).unwrap();

        assert_eq!(outcome, HeartbeatOutcome::Refreshed);
        let shard = reg.shard(ShardId(5)).unwrap();
        assert_eq!(shard.last_seen, later);
        assert!(shard.players.contains("z"));
        assert_eq!(shard.population(), 1);
    }

    #[test]
    fn test_sweep_evicts_only_past_threshold() {
        let mut reg = Registry::new(1);
        let start = Instant::now();
        reg.record_heartbeat(report(1, &[], true), start).unwrap();

        assert!(reg.sweep(start + TTL, TTL).is_empty());
        assert_eq!(reg.shard_count(), 1);

        let evicted = reg.sweep(start + TTL + Duration::from_millis(1), TTL);
        assert_eq!(
            evicted,
            vec![Removed::Shard {
                shard_id: ShardId(1),
                name: "hb-1".into()
            }]
        );
        assert_eq!(reg.shard_count(), 0);
    }

    #[test]
    fn test_sweep_keeps_refreshed_shard() {
        let mut reg = Registry::new(1);
        let start = Instant::now();
        reg.record_heartbeat(report(1, &[], true), start).unwrap();
        reg.record_heartbeat(report(1, &[], false), start + TTL).unwrap();

        assert!(reg.sweep(start + TTL + Duration::from_secs(1), TTL).is_empty());
    }

    #[test]
    fn test_sweep_closes_connected_shard_and_ignores_admins() {
        let mut reg = Registry::new(1);
        let start = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel();
        reg.register(
            InstanceId::generate(),
            &Handshake::shard(
                1,
                ShardIdentity {
                    shard_id: ShardId(2),
                    name: "live".into(),
                    host: "h".into(),
                    port: 1,
                    capacity: 10,
                    players: vec![],
                    access_token: None,
                },
            ),
            PeerLink::new(tx),
            start,
        )
        .unwrap();
        reg.register(
            InstanceId::generate(),
            &Handshake::admin(1, None),
            PeerLink::detached(),
            start,
        )
        .unwrap();

        let evicted = reg.sweep(start + TTL * 2, TTL);

        assert_eq!(evicted.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(CloseReason::Evicted));
        assert_eq!(reg.admin_count(), 1);
    }
}
