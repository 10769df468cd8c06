//! The WebSocket transport, driven by real clients over loopback.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use hushroom::{AppState, config::Config, rooms::BroadcastCore};
use serde_json::{Value, json};
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(config: Config) -> (SocketAddr, Arc<BroadcastCore>) {
    let core = Arc::new(BroadcastCore::new(config.broadcast_settings(), None));
    let app = hushroom::app(AppState {
        core: Arc::clone(&core),
        config: Arc::new(config),
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (addr, core)
}

async fn connect(addr: SocketAddr, path: &str) -> WsStream {
    let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    ws
}

async fn emit(ws: &mut WsStream, event: Value) {
    ws.send(Message::text(event.to_string())).await.unwrap();
}

async fn next_event(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("connection closed")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Reads until the server closes the connection, returning the events seen on the way.
async fn until_closed(ws: &mut WsStream) -> Vec<Value> {
    let mut seen = Vec::new();
    loop {
        match timeout(TIMEOUT, ws.next()).await.expect("connection was never closed") {
            Some(Ok(Message::Text(text))) => seen.push(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return seen,
            Some(Ok(_)) => {}
        }
    }
}

async fn join(ws: &mut WsStream, nickname: &str) -> Value {
    emit(ws, json!({ "event": "join", "nickname": nickname })).await;
    let ack = next_event(ws).await;
    assert_eq!(ack["event"], "joined", "{ack}");
    ack
}

async fn member_names(core: &BroadcastCore, room: &str) -> Vec<String> {
    core.registry()
        .members_of(room)
        .await
        .into_iter()
        .map(|m| m.nickname)
        .collect()
}

#[tokio::test]
async fn joined_clients_share_the_room() {
    let (addr, _core) = serve(Config::default()).await;

    let mut a = connect(addr, "/ws").await;
    let ack = join(&mut a, "A").await;
    assert_eq!(ack["room"], "chatroom");
    assert_eq!(ack["nickname"], "A");
    assert!(ack["session_id"].is_string());

    // the lobby is an ordinary room and can be reached by name too
    let mut b = connect(addr, "/r/chatroom/ws").await;
    join(&mut b, "B").await;

    let announced = next_event(&mut a).await;
    assert_eq!(announced["event"], "message");
    assert_eq!(announced["nickname"], "System");
    assert_eq!(announced["body"], "B joined the room");

    emit(&mut a, json!({ "event": "send", "body": "hi", "kind": "text" })).await;
    let to_a = next_event(&mut a).await;
    let to_b = next_event(&mut b).await;
    assert_eq!(to_a["body"], "hi");
    assert_eq!(to_a["nickname"], "A");
    assert_eq!(to_a["kind"], "text");
    assert_eq!(to_a["id"], to_b["id"]);
    assert_eq!(to_a["seq"], to_b["seq"]);
}

#[tokio::test]
async fn bad_events_are_reported_and_the_connection_stays_open() {
    let (addr, _core) = serve(Config::default()).await;
    let mut b = connect(addr, "/ws").await;
    join(&mut b, "B").await;

    let mut a = connect(addr, "/ws").await;
    a.send(Message::text("not json")).await.unwrap();
    let err = next_event(&mut a).await;
    assert_eq!(err["event"], "error");
    assert_eq!(err["code"], "validation");

    emit(&mut a, json!({ "event": "send", "body": "early", "kind": "text" })).await;
    assert_eq!(next_event(&mut a).await["code"], "protocol");

    emit(&mut a, json!({ "event": "join", "nickname": "   " })).await;
    assert_eq!(next_event(&mut a).await["code"], "validation");

    join(&mut a, "A").await;
    emit(&mut a, json!({ "event": "send", "body": "hi", "kind": "video" })).await;
    assert_eq!(next_event(&mut a).await["code"], "validation");

    emit(&mut a, json!({ "event": "send", "body": "fine", "kind": "text" })).await;
    assert_eq!(next_event(&mut a).await["body"], "fine");

    // B only ever saw the join and the one good message
    assert_eq!(next_event(&mut b).await["body"], "A joined the room");
    let relayed = next_event(&mut b).await;
    assert_eq!(relayed["event"], "message");
    assert_eq!(relayed["body"], "fine");
}

#[tokio::test]
async fn disconnect_event_leaves_the_room() {
    let (addr, core) = serve(Config::default()).await;
    let mut a = connect(addr, "/ws").await;
    join(&mut a, "A").await;
    let mut b = connect(addr, "/ws").await;
    join(&mut b, "B").await;
    assert_eq!(next_event(&mut a).await["body"], "B joined the room");

    emit(&mut b, json!({ "event": "disconnect" })).await;
    assert!(until_closed(&mut b).await.is_empty());
    assert_eq!(member_names(&core, "chatroom").await, ["A"]);

    emit(&mut a, json!({ "event": "send", "body": "still here", "kind": "text" })).await;
    assert_eq!(next_event(&mut a).await["body"], "still here");
}

#[tokio::test]
async fn dropping_the_socket_leaves_the_room() {
    let (addr, core) = serve(Config::default()).await;
    let mut a = connect(addr, "/r/attic/ws").await;
    join(&mut a, "A").await;
    assert_eq!(member_names(&core, "attic").await, ["A"]);

    drop(a);
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !member_names(&core, "attic").await.is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "A never left");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn slow_sockets_are_closed_by_the_room() {
    let config = Config {
        outbox_capacity: 1,
        max_dropped: 1,
        ..Config::default()
    };
    let (addr, core) = serve(config).await;

    // never read from, so its socket eventually backs up
    let mut slow = connect(addr, "/ws").await;
    join(&mut slow, "slow").await;

    let (mut fast, mut fast_inbox) = core.open_session();
    core.handle_join(&mut fast, "fast", "chatroom").await.unwrap();

    let body = "x".repeat(60_000);
    let mut removed = false;
    for _ in 0..2_000 {
        core.handle_send(&fast, body.clone(), "text").await.unwrap();
        while fast_inbox.try_recv().is_ok() {}
        if member_names(&core, "chatroom").await == ["fast"] {
            removed = true;
            break;
        }
    }
    assert!(removed, "slow socket was never removed");

    let seen = until_closed(&mut slow).await;
    assert!(seen.iter().all(|event| event["event"] == "message"));
}
