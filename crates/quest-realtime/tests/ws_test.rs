/// Integration test: run `WsTransport` against an in-process channel server
/// speaking the join / heartbeat / postgres_changes framing.
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde_json::{Value, json};
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use quest_client::{ClientError, Session, SessionProvider};
use quest_realtime::{PushEvent, RealtimeTransport, WsOptions, WsTransport, decode_record};

#[derive(Clone, Copy, PartialEq)]
enum Script {
    /// Accept the join, push a few inserts, answer heartbeats.
    Happy,
    /// Refuse every join.
    Reject,
    /// Close the first connection right after joining.
    DropFirst,
    /// Never answer heartbeats.
    Silent,
}

#[derive(Clone)]
struct Server {
    script: Script,
    quest_id: Uuid,
    connections: Arc<AtomicUsize>,
    /// access_token of every join, in arrival order.
    join_tokens: Arc<Mutex<Vec<String>>>,
    seen: mpsc::UnboundedSender<String>,
}

/// Hands out a new access token on every read, like a provider that keeps
/// rotating its credential.
struct RotatingSession {
    reads: AtomicUsize,
}

impl RotatingSession {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
        })
    }
}

impl SessionProvider for RotatingSession {
    fn current(&self) -> Option<Session> {
        let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        Some(Session {
            access_token: format!("tok-{}", n),
            refresh_token: None,
            user_id: Uuid::nil(),
            email: None,
            expires_at: None,
        })
    }

    fn refresh(&self) -> BoxFuture<'_, Result<Session, ClientError>> {
        Box::pin(async move { self.current().ok_or(ClientError::AuthRequired) })
    }

    fn sign_out(&self) -> BoxFuture<'_, Result<(), ClientError>> {
        Box::pin(async { Ok(()) })
    }
}

fn reply(frame: &Value, status: &str, response: Value) -> Message {
    let out = json!({
        "topic": frame["topic"],
        "event": "phx_reply",
        "payload": {"status": status, "response": response},
        "ref": frame["ref"],
    });
    Message::Text(out.to_string().into())
}

fn change(topic: &Value, record: Value) -> Message {
    let out = json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {"data": {"type": "INSERT", "schema": "public", "table": "messages", "record": record}},
        "ref": null,
    });
    Message::Text(out.to_string().into())
}

fn record(quest_id: Uuid, text: &str) -> Value {
    json!({
        "id": Uuid::new_v4(),
        "quest_id": quest_id,
        "user_id": Uuid::new_v4(),
        "role": "model",
        "content": text,
        "created_at": "2025-03-01T10:00:05Z",
        "metadata": {"suggestions": []},
    })
}

async fn socket_handler(ws: WebSocketUpgrade, State(server): State<Server>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle(socket, server))
}

async fn handle(mut socket: WebSocket, server: Server) {
    let connection = server.connections.fetch_add(1, Ordering::SeqCst);

    while let Some(Ok(msg)) = socket.recv().await {
        let Message::Text(text) = msg else { continue };
        let frame: Value = serde_json::from_str(&text).unwrap();
        let event = frame["event"].as_str().unwrap_or_default().to_string();
        let _ = server.seen.send(event.clone());

        match event.as_str() {
            "phx_join" => {
                if let Some(token) = frame["payload"]["access_token"].as_str() {
                    server.join_tokens.lock().unwrap().push(token.to_string());
                }
                if server.script == Script::Reject {
                    let _ = socket.send(reply(&frame, "error", json!({"reason": "unauthorized"}))).await;
                    continue;
                }
                let _ = socket.send(reply(&frame, "ok", json!({}))).await;

                if server.script == Script::DropFirst && connection == 0 {
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }

                let topic = frame["topic"].clone();
                // Shape is wrong at the envelope level: dropped by the transport.
                let _ = socket
                    .send(Message::Text(
                        json!({"topic": topic, "event": "postgres_changes", "payload": {"nope": 1}, "ref": null})
                            .to_string()
                            .into(),
                    ))
                    .await;
                // Envelope fine, row unusable: surfaces as an insert that fails to decode.
                let _ = socket.send(change(&topic, json!({"bogus": true}))).await;
                let _ = socket.send(change(&topic, record(server.quest_id, "Hello!"))).await;
            }
            "heartbeat" if server.script != Script::Silent => {
                let _ = socket.send(reply(&frame, "ok", json!({}))).await;
            }
            "phx_leave" => {
                let _ = socket.send(reply(&frame, "ok", json!({}))).await;
                return;
            }
            _ => {}
        }
    }
}

async fn spawn_server(script: Script, quest_id: Uuid) -> (SocketAddr, Server, mpsc::UnboundedReceiver<String>) {
    let (seen, seen_rx) = mpsc::unbounded_channel();
    let server = Server {
        script,
        quest_id,
        connections: Arc::new(AtomicUsize::new(0)),
        join_tokens: Arc::new(Mutex::new(Vec::new())),
        seen,
    };
    let app = Router::new()
        .route("/socket", get(socket_handler))
        .with_state(server.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, server, seen_rx)
}

fn transport(addr: SocketAddr, heartbeat: Duration) -> WsTransport {
    WsTransport::with_options(
        Url::parse(&format!("ws://{}/socket", addr)).unwrap(),
        WsOptions {
            heartbeat_interval: heartbeat,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        },
    )
}

async fn next(sub: &mut quest_realtime::Subscription) -> Option<PushEvent> {
    tokio::time::timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("no realtime event in time")
}

async fn wait_for(seen: &mut mpsc::UnboundedReceiver<String>, event: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(e) = seen.recv().await {
            if e == event {
                return;
            }
        }
        panic!("server went away before {}", event);
    })
    .await
    .expect("event never reached the server");
}

#[tokio::test]
async fn joins_and_forwards_inserts() {
    let quest_id = Uuid::new_v4();
    let (addr, _server, mut seen) = spawn_server(Script::Happy, quest_id).await;
    let mut sub = transport(addr, Duration::from_secs(25))
        .subscribe(quest_id, RotatingSession::new())
        .unwrap();
    assert_eq!(sub.quest_id(), quest_id);

    assert_eq!(next(&mut sub).await, Some(PushEvent::Joined));

    let Some(PushEvent::Insert(bad)) = next(&mut sub).await else {
        panic!("expected the unusable row");
    };
    assert!(decode_record(bad).is_err());

    let Some(PushEvent::Insert(good)) = next(&mut sub).await else {
        panic!("expected the assistant row");
    };
    let message = decode_record(good).unwrap();
    assert_eq!(message.quest_id, quest_id);
    assert_eq!(message.text(), "Hello!");

    drop(sub);
    wait_for(&mut seen, "phx_leave").await;
}

#[tokio::test]
async fn rejected_join_ends_the_subscription() {
    let quest_id = Uuid::new_v4();
    let (addr, server, _seen) = spawn_server(Script::Reject, quest_id).await;
    let mut sub = transport(addr, Duration::from_secs(25))
        .subscribe(quest_id, RotatingSession::new())
        .unwrap();

    assert_eq!(next(&mut sub).await, Some(PushEvent::Error("unauthorized".into())));
    assert_eq!(next(&mut sub).await, None);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn reconnects_and_rejoins_after_a_drop() {
    let quest_id = Uuid::new_v4();
    let (addr, server, _seen) = spawn_server(Script::DropFirst, quest_id).await;
    let mut sub = transport(addr, Duration::from_secs(25))
        .subscribe(quest_id, RotatingSession::new())
        .unwrap();

    assert_eq!(next(&mut sub).await, Some(PushEvent::Joined));
    assert!(matches!(next(&mut sub).await, Some(PushEvent::Error(_))));
    assert_eq!(next(&mut sub).await, Some(PushEvent::Joined));
    assert!(matches!(next(&mut sub).await, Some(PushEvent::Insert(_))));
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejoin_reads_the_current_token() {
    let quest_id = Uuid::new_v4();
    let (addr, server, _seen) = spawn_server(Script::DropFirst, quest_id).await;
    let mut sub = transport(addr, Duration::from_secs(25))
        .subscribe(quest_id, RotatingSession::new())
        .unwrap();

    assert_eq!(next(&mut sub).await, Some(PushEvent::Joined));
    assert!(matches!(next(&mut sub).await, Some(PushEvent::Error(_))));
    assert_eq!(next(&mut sub).await, Some(PushEvent::Joined));

    let tokens = server.join_tokens.lock().unwrap().clone();
    assert_eq!(tokens, vec!["tok-1".to_string(), "tok-2".to_string()]);
}

#[tokio::test]
async fn missed_heartbeats_drop_the_connection() {
    let quest_id = Uuid::new_v4();
    let (addr, _server, _seen) = spawn_server(Script::Silent, quest_id).await;
    let mut sub = transport(addr, Duration::from_millis(30))
        .subscribe(quest_id, RotatingSession::new())
        .unwrap();

    loop {
        match next(&mut sub).await {
            Some(PushEvent::Error(reason)) => {
                assert!(reason.contains("heartbeat"), "unexpected error {}", reason);
                break;
            }
            Some(_) => continue,
            None => panic!("subscription ended without a heartbeat timeout"),
        }
    }
}
