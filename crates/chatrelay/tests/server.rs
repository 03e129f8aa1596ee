//! Integration tests for the relay server: registration, routing, and the
//! start/stop lifecycle, driven over real sockets.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chatrelay::prelude::*;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(3);
const QUIET: Duration = Duration::from_millis(150);

// =========================================================================
// Helpers
// =========================================================================

/// Starts a server on a random port.
async fn start_server() -> (RelayServer, String, UnboundedReceiver<Event>) {
    start_with(RelayServer::builder()).await
}

async fn start_with(
    builder: RelayServerBuilder,
) -> (RelayServer, String, UnboundedReceiver<Event>) {
    let (sink, events) = ChannelSink::new();
    let server = builder.bind("127.0.0.1:0").event_sink(sink).build();
    let addr = server.listen().await.expect("server should start").to_string();
    (server, addr, events)
}

/// Registration is not acknowledged, so wait until the registry agrees.
async fn wait_for_ids<T: Transport>(server: &RelayServer<T>, expected: &[&str]) {
    tokio::time::timeout(WAIT, async {
        loop {
            let ids: Vec<String> = server
                .connected_ids()
                .await
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            if ids == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("registry never became {expected:?}"));
}

async fn join(addr: &str, server: &RelayServer, ids: &[&str]) -> Vec<RelayClient> {
    let mut clients = Vec::new();
    for id in ids {
        clients.push(RelayClient::connect(addr, id).await.expect("connect"));
    }
    let mut expected = ids.to_vec();
    expected.sort();
    wait_for_ids(server, &expected).await;
    clients
}

/// A bare line connection that has not registered yet.
async fn connect_raw(addr: &str) -> TcpConnection {
    TcpConnection::connect(addr, RelayConfig::default().client_frame_limits())
        .await
        .expect("connect")
}

async fn next(client: &RelayClient) -> Option<ServerFrame> {
    tokio::time::timeout(WAIT, client.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("recv failed")
}

async fn assert_silent(client: &RelayClient) {
    if let Ok(frame) = tokio::time::timeout(QUIET, client.recv()).await {
        panic!("{} expected nothing, got {frame:?}", client.id());
    }
}

/// Pulls events until one matches.
async fn expect_event(
    events: &mut UnboundedReceiver<Event>,
    pred: impl Fn(&RelayEvent) -> bool,
) -> RelayEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event.kind) {
                return event.kind;
            }
        }
    })
    .await
    .expect("expected event never arrived")
}

fn ids(names: &[&str]) -> ServerFrame {
    ServerFrame::Directory(names.iter().map(|n| n.to_string()).collect())
}

// =========================================================================
// Registration
// =========================================================================

#[tokio::test]
async fn test_registration_emits_connected() {
    let (server, addr, mut events) = start_server().await;
    let _alice = join(&addr, &server, &["alice"]).await;

    let event = expect_event(&mut events, |e| {
        matches!(e, RelayEvent::Connected { .. })
    })
    .await;
    match event {
        RelayEvent::Connected { id, .. } => assert_eq!(id.as_str(), "alice"),
        other => panic!("expected Connected, got {other:?}"),
    }
}

#[tokio::test]
async fn test_identifier_is_trimmed() {
    let (server, addr, _events) = start_server().await;
    let conn = connect_raw(&addr).await;
    conn.send("   bob  ").await.unwrap();
    wait_for_ids(&server, &["bob"]).await;
}

#[tokio::test]
async fn test_empty_identifier_rejected() {
    let (server, addr, mut events) = start_server().await;
    let conn = connect_raw(&addr).await;
    conn.send("   ").await.unwrap();

    let reply = tokio::time::timeout(WAIT, conn.recv()).await.unwrap().unwrap();
    assert_eq!(reply.as_deref(), Some("ERROR: ID cannot be empty"));
    let end = tokio::time::timeout(WAIT, conn.recv()).await.unwrap().unwrap();
    assert_eq!(end, None);

    expect_event(&mut events, |e| matches!(e, RelayEvent::Rejected { .. })).await;
    assert!(server.connected_ids().await.is_empty());
}

#[tokio::test]
async fn test_duplicate_identifier_rejected_first_unaffected() {
    let (server, addr, _events) = start_server().await;
    let clients = join(&addr, &server, &["A"]).await;

    let imposter = RelayClient::connect(&addr, "A").await.unwrap();
    assert_eq!(
        next(&imposter).await,
        Some(ServerFrame::Error("ID already in use".into()))
    );
    assert_eq!(next(&imposter).await, None);

    clients[0].list().await.unwrap();
    assert_eq!(next(&clients[0]).await, Some(ids(&["A"])));
}

#[tokio::test]
async fn test_handshake_timeout() {
    let (_server, addr, _events) =
        start_with(RelayServer::builder().handshake_timeout_secs(1)).await;
    let conn = connect_raw(&addr).await;

    let reply = tokio::time::timeout(WAIT, conn.recv()).await.unwrap().unwrap();
    assert_eq!(reply.as_deref(), Some("ERROR: registration timed out"));
    let end = tokio::time::timeout(WAIT, conn.recv()).await.unwrap().unwrap();
    assert_eq!(end, None);
}

// =========================================================================
// Routing
// =========================================================================

#[tokio::test]
async fn test_broadcast_reaches_others_not_sender() {
    let (server, addr, _events) = start_server().await;
    let c = join(&addr, &server, &["A", "B", "C"]).await;

    c[0].broadcast("hello").await.unwrap();

    let expected = ServerFrame::Broadcast {
        from: "A".into(),
        text: "hello".into(),
    };
    assert_eq!(next(&c[1]).await, Some(expected.clone()));
    assert_eq!(next(&c[2]).await, Some(expected));
    assert_silent(&c[0]).await;
}

#[tokio::test]
async fn test_direct_reaches_only_target() {
    let (server, addr, _events) = start_server().await;
    let c = join(&addr, &server, &["A", "B", "C"]).await;

    c[0].direct("B", "secret").await.unwrap();

    assert_eq!(
        next(&c[1]).await,
        Some(ServerFrame::Direct {
            from: "A".into(),
            text: "secret".into(),
        })
    );
    assert_silent(&c[0]).await;
    assert_silent(&c[2]).await;
}

#[tokio::test]
async fn test_direct_to_unknown_target_is_silent() {
    let (server, addr, mut events) = start_server().await;
    let c = join(&addr, &server, &["A", "B"]).await;

    c[0].direct("Z", "anyone?").await.unwrap();
    // The next thing A hears is its own directory reply, nothing in between.
    c[0].list().await.unwrap();
    assert_eq!(next(&c[0]).await, Some(ids(&["A", "B"])));
    assert_silent(&c[1]).await;

    let event = expect_event(&mut events, |e| {
        matches!(e, RelayEvent::Direct { .. })
    })
    .await;
    assert!(matches!(event, RelayEvent::Direct { delivered: false, .. }));
}

#[tokio::test]
async fn test_list_includes_sender_sorted() {
    let (server, addr, _events) = start_server().await;
    let c = join(&addr, &server, &["carol", "alice", "bob"]).await;

    c[2].list().await.unwrap();
    assert_eq!(next(&c[2]).await, Some(ids(&["alice", "bob", "carol"])));
    assert_silent(&c[0]).await;
}

#[tokio::test]
async fn test_malformed_frame_gets_one_error_and_stays_connected() {
    let (server, addr, _events) = start_server().await;
    let c = join(&addr, &server, &["A", "B"]).await;

    c[0].send_raw("garbage").await.unwrap();
    assert_eq!(
        next(&c[0]).await,
        Some(ServerFrame::Error("Use TO:<id>:<message> or ALL:<message>".into()))
    );

    c[0].send_raw("TO::nobody").await.unwrap();
    assert!(matches!(next(&c[0]).await, Some(ServerFrame::Error(_))));

    c[0].list().await.unwrap();
    assert_eq!(next(&c[0]).await, Some(ids(&["A", "B"])));
    assert_silent(&c[1]).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_broadcasts_stay_framed() {
    const SENDERS: usize = 50;
    const PER_SENDER: usize = 4;
    const PAYLOAD_LEN: usize = 3000;

    // Room for every frame, so the listener never has one dropped.
    let (server, addr, _events) =
        start_with(RelayServer::builder().outbound_queue_len(SENDERS * PER_SENDER)).await;
    let mut names: Vec<String> = (0..SENDERS).map(|i| format!("s{i}")).collect();
    names.push("listener".into());
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut clients = join(&addr, &server, &refs).await;
    let listener = clients.pop().unwrap();

    let mut tasks = Vec::new();
    for (i, client) in clients.into_iter().enumerate() {
        let client = Arc::new(client);
        tasks.push(tokio::spawn(async move {
            let fill = char::from(b'a' + (i % 26) as u8);
            for j in 0..PER_SENDER {
                let head = format!("m-{i}-{j}-");
                let body: String = std::iter::repeat_n(fill, PAYLOAD_LEN - head.len()).collect();
                client.broadcast(&format!("{head}{body}")).await.unwrap();
            }
            client
        }));
    }

    let mut seen = HashSet::new();
    for _ in 0..SENDERS * PER_SENDER {
        match next(&listener).await {
            Some(ServerFrame::Broadcast { from, text }) => {
                assert_eq!(text.len(), PAYLOAD_LEN, "frame from {from} cut or merged");
                let mut parts = text.splitn(4, '-');
                assert_eq!(parts.next(), Some("m"));
                let i: usize = parts
                    .next()
                    .and_then(|p| p.parse().ok())
                    .expect("sender index");
                assert!(parts.next().and_then(|p| p.parse::<usize>().ok()).is_some());
                let body = parts.next().expect("body");
                assert_eq!(from, format!("s{i}"));
                let fill = char::from(b'a' + (i % 26) as u8);
                assert!(body.chars().all(|c| c == fill), "interleaved payload from {from}");
                assert!(seen.insert(text), "duplicate frame");
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }
    assert_eq!(seen.len(), SENDERS * PER_SENDER);

    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_longest_frames_are_relayed_whole() {
    let (server, addr, _events) = start_server().await;
    let config = RelayConfig::default();
    // Longest sender id and longest frames: the relayed lines are as long
    // as they can ever get.
    let sender = "a".repeat(config.max_id_len);
    let c = join(&addr, &server, &[sender.as_str(), "B"]).await;

    let text = "x".repeat(config.max_frame_len - "ALL:".len());
    c[0].broadcast(&text).await.unwrap();
    assert_eq!(
        next(&c[1]).await,
        Some(ServerFrame::Broadcast {
            from: sender.clone(),
            text,
        })
    );

    let text = "y".repeat(config.max_frame_len - "TO:B:".len());
    c[0].direct("B", &text).await.unwrap();
    assert_eq!(
        next(&c[1]).await,
        Some(ServerFrame::Direct {
            from: sender.clone(),
            text,
        })
    );

    // Both ends are still up.
    c[1].list().await.unwrap();
    let mut expected = vec![sender.as_str(), "B"];
    expected.sort();
    assert_eq!(next(&c[1]).await, Some(ids(&expected)));
}

#[tokio::test]
async fn test_client_sized_for_server_config() {
    let config = RelayConfig {
        max_frame_len: 8192,
        ..RelayConfig::default()
    };
    let (server, addr, _events) =
        start_with(RelayServer::builder().config(config.clone())).await;

    let a = RelayClient::connect_with(&addr, "A", server.config())
        .await
        .unwrap();
    let b = RelayClient::connect_with(&addr, "B", &config).await.unwrap();
    wait_for_ids(&server, &["A", "B"]).await;

    // Longer than a default-sized client could send or receive.
    let text = "z".repeat(8000);
    a.broadcast(&text).await.unwrap();
    assert_eq!(
        next(&b).await,
        Some(ServerFrame::Broadcast {
            from: "A".into(),
            text,
        })
    );
}

#[tokio::test]
async fn test_stalled_reader_does_not_block_other_peers() {
    const FRAME: usize = 4000;
    const MAX_FRAMES: usize = 20_000;

    let (server, addr, mut events) =
        start_with(RelayServer::builder().outbound_queue_len(8)).await;
    let sender = RelayClient::connect(&addr, "A").await.unwrap();
    // Registers, then never reads another byte.
    let stalled = connect_raw(&addr).await;
    stalled.send("B").await.unwrap();
    wait_for_ids(&server, &["A", "B"]).await;

    let text = "p".repeat(FRAME);
    let mut dropped = false;
    for _ in 0..MAX_FRAMES {
        sender.broadcast(&text).await.unwrap();
        while let Ok(event) = events.try_recv() {
            if let RelayEvent::DeliveryFailed { to, .. } = event.kind {
                assert_eq!(to.as_str(), "B");
                dropped = true;
            }
        }
        if dropped {
            break;
        }
        tokio::task::yield_now().await;
    }
    if !dropped {
        expect_event(&mut events, |e| {
            matches!(e, RelayEvent::DeliveryFailed { .. })
        })
        .await;
    }

    // The sender's own requests are still answered.
    sender.list().await.unwrap();
    assert_eq!(next(&sender).await, Some(ids(&["A", "B"])));

    // Newcomers get in and get served.
    let late = RelayClient::connect(&addr, "C").await.unwrap();
    wait_for_ids(&server, &["A", "B", "C"]).await;
    late.list().await.unwrap();
    assert_eq!(next(&late).await, Some(ids(&["A", "B", "C"])));
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_disconnect_frees_identifier() {
    let (server, addr, mut events) = start_server().await;
    let c = join(&addr, &server, &["A", "B"]).await;

    c[1].close().await.unwrap();
    wait_for_ids(&server, &["A"]).await;

    let event = expect_event(&mut events, |e| {
        matches!(e, RelayEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(
        event,
        RelayEvent::Disconnected {
            id: ClientId::parse("B", 64).unwrap(),
            reason: DisconnectReason::ClosedByPeer,
        }
    );

    let _again = RelayClient::connect(&addr, "B").await.unwrap();
    wait_for_ids(&server, &["A", "B"]).await;
}

#[tokio::test]
async fn test_overlong_line_disconnects_with_read_error() {
    let (server, addr, mut events) = start_server().await;
    let c = join(&addr, &server, &["A"]).await;

    // This end is allowed to send more than the server accepts.
    let conn = TcpConnection::connect(&addr, FrameLimits::symmetric(8192))
        .await
        .unwrap();
    conn.send("big").await.unwrap();
    wait_for_ids(&server, &["A", "big"]).await;

    conn.send(&format!("ALL:{}", "x".repeat(5000))).await.unwrap();

    wait_for_ids(&server, &["A"]).await;
    let event = expect_event(&mut events, |e| {
        matches!(e, RelayEvent::Disconnected { .. })
    })
    .await;
    match event {
        RelayEvent::Disconnected { id, reason } => {
            assert_eq!(id.as_str(), "big");
            assert!(
                matches!(reason, DisconnectReason::ReadError(_)),
                "got {reason:?}"
            );
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }

    // Nothing of the oversized line was relayed.
    assert_silent(&c[0]).await;
    let end = tokio::time::timeout(WAIT, conn.recv()).await.unwrap();
    assert!(!matches!(end, Ok(Some(_))), "got {end:?}");
}

#[tokio::test]
async fn test_stop_closes_everyone_and_restart_works() {
    let (server, addr, mut events) = start_server().await;
    let c = join(&addr, &server, &["A", "B"]).await;

    assert!(server.stop().await);
    assert_eq!(next(&c[0]).await, None);
    assert_eq!(next(&c[1]).await, None);
    assert!(server.connected_ids().await.is_empty());
    assert!(!server.is_listening().await);
    assert_eq!(server.local_addr().await, None);
    expect_event(&mut events, |e| matches!(e, RelayEvent::ServerStopped)).await;

    assert!(!server.stop().await, "second stop is a no-op");

    let addr = server.start("127.0.0.1:0").await.unwrap().to_string();
    assert!(server.is_listening().await);
    let c = join(&addr, &server, &["A"]).await;
    c[0].list().await.unwrap();
    assert_eq!(next(&c[0]).await, Some(ids(&["A"])));

    server.stop().await;
}

#[tokio::test]
async fn test_stop_unblocks_handshaking_peer() {
    let (server, addr, _events) = start_server().await;
    let conn = connect_raw(&addr).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(server.stop().await);
    let end = tokio::time::timeout(WAIT, conn.recv()).await.unwrap();
    assert!(!matches!(end, Ok(Some(_))), "got {end:?}");
}

#[tokio::test]
async fn test_start_while_running_fails() {
    let (server, addr, _events) = start_server().await;
    match server.start("127.0.0.1:0").await {
        Err(RelayError::AlreadyRunning(running)) => {
            assert_eq!(running.to_string(), addr);
        }
        other => panic!("expected AlreadyRunning, got {other:?}"),
    }
}

#[tokio::test]
async fn test_bind_in_use_reports_and_stays_stopped() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let (sink, mut events) = ChannelSink::new();
    let server = RelayServer::builder().event_sink(sink).build();

    let err = server.start(&addr).await.unwrap_err();
    assert!(matches!(err, RelayError::Bind { .. }), "got {err:?}");
    assert!(!server.is_listening().await);

    let event = expect_event(&mut events, |e| {
        matches!(e, RelayEvent::BindFailed { .. })
    })
    .await;
    match event {
        RelayEvent::BindFailed { addr: failed, .. } => assert_eq!(failed, addr),
        other => panic!("expected BindFailed, got {other:?}"),
    }
}

// =========================================================================
// WebSocket transport
// =========================================================================

#[tokio::test]
async fn test_websocket_transport_routes_frames() {
    let server = RelayServer::builder()
        .event_sink(NullSink)
        .build_with::<WebSocketTransport>();
    let addr = server.start("127.0.0.1:0").await.unwrap();

    let (mut a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("connect A");
    let (mut b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .expect("connect B");

    a.send(Message::text("A".to_string())).await.unwrap();
    b.send(Message::text("B".to_string())).await.unwrap();
    wait_for_ids(&server, &["A", "B"]).await;

    a.send(Message::text("ALL:hi".to_string())).await.unwrap();
    let msg = tokio::time::timeout(WAIT, b.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.into_text().unwrap().as_str(), "A (ALL): hi");

    server.stop().await;
}

#[tokio::test]
async fn test_silent_socket_does_not_block_websocket_accepts() {
    let server = RelayServer::builder()
        .event_sink(NullSink)
        .build_with::<WebSocketTransport>();
    let addr = server.start("127.0.0.1:0").await.unwrap();

    // Connects at the TCP level and never sends the upgrade request.
    let _silent = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let (mut a, _) = tokio::time::timeout(
        WAIT,
        tokio_tungstenite::connect_async(format!("ws://{addr}")),
    )
    .await
    .expect("upgrade answered while another socket is silent")
    .expect("connect A");
    a.send(Message::text("A".to_string())).await.unwrap();
    wait_for_ids(&server, &["A"]).await;

    a.send(Message::text("LIST".to_string())).await.unwrap();
    let msg = tokio::time::timeout(WAIT, a.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(msg.into_text().unwrap().as_str(), "CLIENTS:A");

    server.stop().await;
}
