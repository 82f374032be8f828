//! Integration tests for the hub: real WebSocket shards and consoles
//! against a hub bound to an OS-assigned port.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use shardhub::prelude::*;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

const VERSION: u32 = 3;

// =========================================================================
// Helpers
// =========================================================================

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

struct TestHub {
    hub: HubHandle,
    addr: String,
    server: JoinHandle<Result<(), HubError>>,
}

fn test_config() -> HubConfig {
    HubConfig {
        bind_addr: "127.0.0.1:0".into(),
        game_version: VERSION,
        ..HubConfig::default()
    }
}

async fn start_hub_with<A: Authenticator>(config: HubConfig, auth: A) -> TestHub {
    let server = HubServer::builder()
        .config(config)
        .build(auth)
        .await
        .expect("hub should build");
    let addr = server.local_addr().expect("local addr").to_string();
    let hub = server.handle();
    let server = tokio::spawn(server.run());
    TestHub { hub, addr, server }
}

async fn start_hub() -> TestHub {
    start_hub_with(test_config(), AllowAll).await
}

async fn connect(addr: &str) -> ClientWs {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("should connect");
    ws
}

async fn send<T: Serialize>(ws: &mut ClientWs, frame: &T) {
    let text = serde_json::to_string(frame).expect("encode");
    ws.send(Message::Text(text.into())).await.expect("send");
}

/// Next hub frame, skipping control frames. Panics on close or timeout.
async fn recv(ws: &mut ClientWs) -> HubMessage {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("decode"),
            Message::Binary(data) => return serde_json::from_slice(&data).expect("decode"),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => continue,
        }
    }
}

async fn recv_until(ws: &mut ClientWs, pred: impl Fn(&HubMessage) -> bool) -> HubMessage {
    loop {
        let msg = recv(ws).await;
        if pred(&msg) {
            return msg;
        }
    }
}

/// Waits for the hub's close frame and returns its reason.
async fn recv_close_reason(ws: &mut ClientWs) -> String {
    loop {
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close");
        match next {
            Some(Ok(Message::Close(Some(frame)))) => return frame.reason.as_str().to_owned(),
            Some(Ok(Message::Close(None))) | None => panic!("closed without a reason"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => panic!("websocket error: {e}"),
        }
    }
}

async fn assert_silent(ws: &mut ClientWs) {
    let next = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(next.is_err(), "expected no frame, got {next:?}");
}

fn shard_handshake(id: u32, players: &[&str]) -> Handshake {
    Handshake::shard(
        VERSION,
        ShardIdentity {
            shard_id: ShardId(id),
            name: format!("shard-{id}"),
            host: "127.0.0.1".into(),
            port: 43594 + id as u16,
            capacity: 50,
            players: players.iter().map(|p| p.to_string()).collect(),
            access_token: None,
        },
    )
}

/// Connects a shard and waits until the hub has registered it: a ping
/// is only answered once the handshake went through.
async fn connect_shard_with(addr: &str, handshake: &Handshake) -> ClientWs {
    let mut ws = connect(addr).await;
    send(&mut ws, handshake).await;
    let shard_id = handshake.shard_id.expect("shard handshake");
    send(
        &mut ws,
        &Envelope::with_id(
            0,
            ShardRequest::Ping {
                shard_id,
                players: handshake.players.clone(),
                capacity: None,
            },
        ),
    )
    .await;
    match recv(&mut ws).await {
        HubMessage::Response {
            request_id: Some(0),
            status: Status::Success,
            ..
        } => ws,
        other => panic!("expected ping ack, got {other:?}"),
    }
}

async fn connect_shard(addr: &str, id: u32, players: &[&str]) -> ClientWs {
    connect_shard_with(addr, &shard_handshake(id, players)).await
}

/// Connects a console and returns it with the snapshot it was sent.
async fn connect_admin(addr: &str) -> (ClientWs, Vec<ShardSummary>) {
    let mut ws = connect(addr).await;
    send(&mut ws, &Handshake::admin(VERSION, None)).await;
    match recv(&mut ws).await {
        HubMessage::ShardList { shards } => (ws, shards),
        other => panic!("expected ShardList, got {other:?}"),
    }
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_shard_handshake_registers_shard() {
    let t = start_hub().await;
    let _ws = connect_shard(&t.addr, 1, &["alice"]).await;

    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
    let snapshot = t.hub.snapshot().await.unwrap();
    assert_eq!(snapshot[0].shard_id, ShardId(1));
    assert_eq!(snapshot[0].name, "shard-1");
    assert_eq!(snapshot[0].population, 1);
}

#[tokio::test]
async fn test_version_mismatch_is_closed_and_not_counted() {
    let t = start_hub().await;
    let mut ws = connect(&t.addr).await;
    let mut hs = shard_handshake(1, &[]);
    hs.game_version = VERSION + 1;

    send(&mut ws, &hs).await;

    assert_eq!(recv_close_reason(&mut ws).await, "version-mismatch");
    assert_eq!(t.hub.shard_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_client_handshake_is_rejected() {
    let t = start_hub().await;
    let mut ws = connect(&t.addr).await;
    let mut hs = Handshake::admin(VERSION, None);
    hs.kind = PeerKind::Client;

    send(&mut ws, &hs).await;

    assert_eq!(recv_close_reason(&mut ws).await, "client-rejected");
    assert_eq!(t.hub.shard_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_malformed_handshake_is_closed() {
    let t = start_hub().await;
    let mut ws = connect(&t.addr).await;

    ws.send(Message::Text("hello".to_string().into())).await.unwrap();

    assert_eq!(recv_close_reason(&mut ws).await, "malformed-handshake");
}

#[tokio::test]
async fn test_missing_handshake_times_out() {
    let config = HubConfig {
        handshake_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let t = start_hub_with(config, AllowAll).await;
    let mut ws = connect(&t.addr).await;

    assert_eq!(recv_close_reason(&mut ws).await, "handshake-timeout");
}

#[tokio::test]
async fn test_stalled_upgrade_does_not_block_other_peers() {
    let config = HubConfig {
        handshake_timeout: Duration::from_millis(300),
        ..test_config()
    };
    let t = start_hub_with(config, AllowAll).await;

    // Connects over TCP and never sends the upgrade request.
    let mut stalled = tokio::net::TcpStream::connect(&t.addr).await.unwrap();

    let ws = tokio::time::timeout(Duration::from_secs(2), connect_shard(&t.addr, 1, &[]))
        .await
        .expect("second peer should get through");
    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
    drop(ws);

    // The stalled socket is dropped once the handshake timeout passes.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::io::AsyncReadExt::read(&mut stalled, &mut buf),
    )
    .await
    .expect("stalled socket should be closed");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_duplicate_shard_id_keeps_first_connection() {
    let t = start_hub().await;
    let mut first = connect_shard(&t.addr, 1, &[]).await;

    let mut second = connect(&t.addr).await;
    send(&mut second, &shard_handshake(1, &[])).await;
    assert_eq!(recv_close_reason(&mut second).await, "duplicate-shard");

    // The first shard is still registered and served.
    send(
        &mut first,
        &Envelope::with_id(
            7,
            ShardRequest::Ping {
                shard_id: ShardId(1),
                players: vec![],
                capacity: None,
            },
        ),
    )
    .await;
    assert!(matches!(
        recv(&mut first).await,
        HubMessage::Response {
            request_id: Some(7),
            ..
        }
    ));
    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_shard_reconnects_right_after_disconnect() {
    let t = start_hub().await;
    let mut first = connect_shard(&t.addr, 1, &["alice"]).await;

    first.close(None).await.unwrap();
    // Wait for the hub's side to go away.
    while let Ok(Some(Ok(_))) = tokio::time::timeout(Duration::from_secs(2), first.next()).await {}

    let _again = connect_shard(&t.addr, 1, &["alice"]).await;
    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_connection_takes_over_heartbeat_only_shard() {
    let t = start_hub().await;
    let mut events = t.hub.subscribe().await.unwrap();
    let outcome = t.hub.report_heartbeat(heartbeat(4, 2)).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Registered);

    let mut ws = connect_shard(&t.addr, 4, &["alice"]).await;

    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
    assert_eq!(t.hub.total_population().await.unwrap(), 1);
    // Relays now reach the shard over its socket.
    assert_eq!(t.hub.broadcast_chat("ops", "hello", "red").await.unwrap(), 1);
    assert!(matches!(recv(&mut ws).await, HubMessage::Chat { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        RegistryEvent::ShardAdded { shard_id: ShardId(4), .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_shared_secret_rejects_wrong_token() {
    let mut tokens = HashMap::new();
    tokens.insert(ShardId(1), "s3cret".to_string());
    let t = start_hub_with(test_config(), SharedSecretAuth::new(tokens, None)).await;

    let mut bad = connect(&t.addr).await;
    let mut hs = shard_handshake(1, &[]);
    hs.access_token = Some("guess".into());
    send(&mut bad, &hs).await;
    assert_eq!(recv_close_reason(&mut bad).await, "unauthorized");
    assert_eq!(t.hub.shard_count().await.unwrap(), 0);

    hs.access_token = Some("s3cret".into());
    let _good = connect_shard_with(&t.addr, &hs).await;
    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
}

// =========================================================================
// Frames after the handshake
// =========================================================================

#[tokio::test]
async fn test_malformed_frame_is_dropped_connection_stays_open() {
    let t = start_hub().await;
    let mut ws = connect_shard(&t.addr, 1, &[]).await;

    ws.send(Message::Text("{not json".to_string().into())).await.unwrap();
    send(
        &mut ws,
        &serde_json::json!({"packet": {"type": "Teleport"}}),
    )
    .await;
    send(
        &mut ws,
        &Envelope::with_id(
            10,
            ShardRequest::Ping {
                shard_id: ShardId(1),
                players: vec!["bob".into()],
                capacity: None,
            },
        ),
    )
    .await;

    // Neither the non-JSON frame nor the untagged one gets an answer.
    assert!(matches!(
        recv(&mut ws).await,
        HubMessage::Response {
            request_id: Some(10),
            status: Status::Success,
            ..
        }
    ));
    assert_eq!(t.hub.total_population().await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_request_with_id_gets_error_response() {
    let t = start_hub().await;
    let mut ws = connect_shard(&t.addr, 1, &["alice"]).await;

    send(
        &mut ws,
        &serde_json::json!({"requestId": 9, "packet": {"type": "Teleport"}}),
    )
    .await;
    // A ping on shard 1's connection claiming to be shard 2.
    send(
        &mut ws,
        &Envelope::with_id(
            11,
            ShardRequest::Ping {
                shard_id: ShardId(2),
                players: vec![],
                capacity: None,
            },
        ),
    )
    .await;

    for expected in [9, 11] {
        match recv(&mut ws).await {
            HubMessage::Response {
                request_id: Some(id),
                status: Status::Error,
                message: Some(_),
                ..
            } => assert_eq!(id, expected),
            other => panic!("expected error response {expected}, got {other:?}"),
        }
    }
    // The bad ping changed nothing.
    assert_eq!(t.hub.total_population().await.unwrap(), 1);
    assert_eq!(t.hub.shard_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_chat_reaches_other_shards_only() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &[]).await;
    let mut b = connect_shard(&t.addr, 2, &[]).await;

    send(
        &mut a,
        &Envelope::new(ShardRequest::Chat {
            source: "bob".into(),
            text: "hello".into(),
            colour: "yellow".into(),
            with_arrow: true,
        }),
    )
    .await;

    assert_eq!(
        recv(&mut b).await,
        HubMessage::Chat {
            source: "bob".into(),
            text: "hello".into(),
            colour: "yellow".into(),
            with_arrow: true,
        }
    );
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn test_private_message_routed_to_target_shard() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &["bob"]).await;
    let mut b = connect_shard(&t.addr, 2, &["alice"]).await;

    send(
        &mut a,
        &Envelope::with_id(
            5,
            ShardRequest::PrivateMessage {
                source: "bob".into(),
                target: "alice".into(),
                text: "hi".into(),
            },
        ),
    )
    .await;

    assert_eq!(
        recv(&mut b).await,
        HubMessage::PrivateMessage {
            source: "bob".into(),
            target: "alice".into(),
            text: "hi".into(),
        }
    );
    assert_eq!(
        recv(&mut a).await,
        HubMessage::success(
            Some(5),
            Some(ResponseData::Delivered {
                shard_id: ShardId(2)
            })
        )
    );
}

#[tokio::test]
async fn test_private_message_to_offline_target_sends_nothing() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &["bob"]).await;
    let mut b = connect_shard(&t.addr, 2, &["alice"]).await;

    send(
        &mut a,
        &Envelope::with_id(
            6,
            ShardRequest::PrivateMessage {
                source: "bob".into(),
                target: "zed".into(),
                text: "hi".into(),
            },
        ),
    )
    .await;

    assert_eq!(
        recv(&mut a).await,
        HubMessage::error(Some(6), "target offline")
    );
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_friends_query_reports_online_friend() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &["bob"]).await;
    let mut b = connect_shard(&t.addr, 2, &["alice"]).await;

    send(
        &mut a,
        &Envelope::with_id(
            4,
            ShardRequest::FriendsQuery {
                shard_id: ShardId(1),
                username: "bob".into(),
                inactive_friends: vec!["alice".into(), "carol".into()],
                logging_out: false,
            },
        ),
    )
    .await;

    match recv(&mut a).await {
        HubMessage::Response {
            request_id: Some(4),
            status: Status::Success,
            data: Some(ResponseData::Friends { active_friends }),
            ..
        } => {
            assert_eq!(active_friends.len(), 1);
            assert_eq!(
                active_friends["alice"],
                FriendPresence {
                    online: true,
                    shard_id: ShardId(2)
                }
            );
        }
        other => panic!("expected Friends response, got {other:?}"),
    }
    assert_eq!(
        recv(&mut b).await,
        HubMessage::LoginBroadcast {
            username: "bob".into(),
            shard_id: ShardId(1),
        }
    );
}

#[tokio::test]
async fn test_logout_propagates_and_clears_presence() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &["bob"]).await;
    let mut b = connect_shard(&t.addr, 2, &[]).await;
    assert_eq!(
        t.hub.find_shard_of("bob").await.unwrap().map(|s| s.shard_id),
        Some(ShardId(1))
    );

    send(
        &mut a,
        &Envelope::with_id(
            2,
            ShardRequest::Logout {
                username: "bob".into(),
            },
        ),
    )
    .await;
    recv(&mut a).await;

    assert_eq!(
        recv(&mut b).await,
        HubMessage::LogoutBroadcast {
            username: "bob".into()
        }
    );
    assert!(t.hub.find_shard_of("bob").await.unwrap().is_none());
    assert!(!t.hub.is_online("bob", None).await.unwrap());
}

#[tokio::test]
async fn test_is_online_answers_for_other_shards() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &[]).await;
    let _b = connect_shard(&t.addr, 2, &["alice"]).await;

    send(
        &mut a,
        &Envelope::with_id(
            8,
            ShardRequest::IsOnline {
                username: "alice".into(),
                shard_id: ShardId(1),
            },
        ),
    )
    .await;

    assert_eq!(
        recv(&mut a).await,
        HubMessage::success(Some(8), Some(ResponseData::Online { online: true }))
    );
}

// =========================================================================
// Consoles
// =========================================================================

#[tokio::test]
async fn test_admin_receives_snapshot_on_attach() {
    let t = start_hub().await;
    let _a = connect_shard(&t.addr, 1, &["bob"]).await;

    let (_admin, shards) = connect_admin(&t.addr).await;

    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].shard_id, ShardId(1));
    assert_eq!(shards[0].population, 1);
}

#[tokio::test]
async fn test_admin_resynced_on_shard_disconnect() {
    let t = start_hub().await;
    let (mut admin, shards) = connect_admin(&t.addr).await;
    assert!(shards.is_empty());

    let mut shard = connect_shard(&t.addr, 1, &[]).await;
    recv_until(&mut admin, |m| {
        matches!(m, HubMessage::ShardList { shards } if shards.len() == 1)
    })
    .await;

    shard.close(None).await.unwrap();

    recv_until(&mut admin, |m| {
        matches!(m, HubMessage::ShardList { shards } if shards.is_empty())
    })
    .await;
    assert_eq!(t.hub.shard_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_admin_chat_reaches_every_shard() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &[]).await;
    let mut b = connect_shard(&t.addr, 2, &[]).await;
    let (mut admin, _) = connect_admin(&t.addr).await;

    send(
        &mut admin,
        &Envelope::new(AdminRequest::Chat {
            source: "ops".into(),
            text: "restart in 5".into(),
            colour: "red".into(),
        }),
    )
    .await;

    for ws in [&mut a, &mut b] {
        assert!(matches!(
            recv(ws).await,
            HubMessage::Chat { ref text, .. } if text == "restart in 5"
        ));
    }
}

// =========================================================================
// Handle API and lifecycle
// =========================================================================

#[tokio::test]
async fn test_handle_private_message_and_broadcast() {
    let t = start_hub().await;
    let mut a = connect_shard(&t.addr, 1, &["alice"]).await;

    assert_eq!(
        t.hub.private_message("ops", "alice", "hi").await.unwrap(),
        Some(ShardId(1))
    );
    assert!(matches!(recv(&mut a).await, HubMessage::PrivateMessage { .. }));

    assert_eq!(t.hub.broadcast_chat("ops", "hello", "").await.unwrap(), 1);
    assert!(matches!(recv(&mut a).await, HubMessage::Chat { .. }));

    assert_eq!(t.hub.private_message("ops", "zed", "hi").await.unwrap(), None);
}

#[tokio::test]
async fn test_shutdown_closes_peers_and_stops_server() {
    let t = start_hub().await;
    let mut shard = connect_shard(&t.addr, 1, &[]).await;

    t.hub.shutdown().await.unwrap();

    assert_eq!(recv_close_reason(&mut shard).await, "hub-shutdown");
    let result = tokio::time::timeout(Duration::from_secs(2), t.server)
        .await
        .expect("server should stop")
        .expect("server task should not panic");
    assert!(result.is_ok());
    assert!(matches!(t.hub.shard_count().await, Err(HubError::Stopped)));
    // A second shutdown is a no-op.
    assert!(t.hub.shutdown().await.is_ok());
}

fn heartbeat(id: u32, players: usize) -> HeartbeatReport {
    HeartbeatReport {
        shard_id: ShardId(id),
        players: (0..players).map(|n| format!("p{id}-{n}")).collect(),
        capacity: 50,
        name: Some(format!("hb-{id}")),
        host: Some("10.0.0.9".into()),
        port: Some(43594),
        access_token: None,
    }
}

#[tokio::test]
async fn test_admission_first_fit_over_handle() {
    let t = start_hub().await;
    t.hub.report_heartbeat(heartbeat(1, 0)).await.unwrap();
    t.hub.report_heartbeat(heartbeat(2, 49)).await.unwrap();
    t.hub.report_heartbeat(heartbeat(3, 50)).await.unwrap();

    assert!(t.hub.has_capacity().await.unwrap());
    assert_eq!(
        t.hub.select_shard().await.unwrap().map(|s| s.shard_id),
        Some(ShardId(1))
    );

    let outcome = t.hub.report_heartbeat(heartbeat(1, 50)).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Refreshed);
    assert!(!t.hub.has_capacity().await.unwrap());
    assert!(t.hub.select_shard().await.unwrap().is_none());
    assert_eq!(t.hub.total_population().await.unwrap(), 149);
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_shard_evicted_after_threshold() {
    let config = HubConfig {
        sweep_interval: Duration::from_secs(1),
        cleanup_threshold: Duration::from_secs(5),
        ..test_config()
    };
    let server = HubServer::builder()
        .config(config)
        .build(AllowAll)
        .await
        .expect("hub should build");
    let hub = server.handle();
    let mut events = hub.subscribe().await.unwrap();

    let outcome = hub.report_heartbeat(heartbeat(7, 1)).await.unwrap();
    assert_eq!(outcome, HeartbeatOutcome::Registered);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(hub.shard_count().await.unwrap(), 1);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(hub.shard_count().await.unwrap(), 0);

    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::ShardAdded {
            shard_id: ShardId(7),
            name: "hb-7".into()
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        RegistryEvent::ShardRemoved {
            shard_id: ShardId(7),
            name: "hb-7".into()
        }
    );
}

#[tokio::test]
async fn test_heartbeat_without_identity_is_rejected() {
    let t = start_hub().await;
    let report = HeartbeatReport {
        name: None,
        host: None,
        port: None,
        ..heartbeat(9, 0)
    };

    let result = t.hub.report_heartbeat(report).await;

    assert!(matches!(result, Err(HubError::Registry(_))));
    assert_eq!(t.hub.shard_count().await.unwrap(), 0);
}
