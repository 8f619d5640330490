#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use url::Url;
use uuid::Uuid;

use quest_client::{ApiClient, ClientConfig, StaticSession};
use quest_realtime::LocalHub;
use quest_view::ViewUpdate;

/// In-process stand-in for the quest backend. Posted user messages are echoed
/// both in the response and on the hub, the way the real backend's insert
/// shows up on realtime.
#[derive(Clone)]
pub struct Backend {
    pub token: String,
    pub user_id: Uuid,
    pub quest_id: Uuid,
    pub m1: Uuid,
    pub m2: Uuid,
    /// A quest whose fetch takes a while.
    pub slow_quest: Uuid,
    pub hub: LocalHub,
    pub posted: Arc<Mutex<Vec<Value>>>,
    pub generated: Arc<Mutex<Vec<String>>>,
    pub delete_status: Arc<Mutex<StatusCode>>,
    pub quests: Arc<Mutex<Vec<Value>>>,
    pub guide: Arc<Mutex<Option<String>>>,
}

impl Backend {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            == Some(self.token.as_str())
    }

    pub fn posted_texts(&self) -> Vec<String> {
        self.posted
            .lock()
            .unwrap()
            .iter()
            .filter_map(|body| body["content"][0]["text"].as_str().map(String::from))
            .collect()
    }
}

/// Posting exactly this text takes a while to answer.
pub const SLOW_POST: &str = "slow post";

pub fn message_json(id: Uuid, quest_id: Uuid, role: &str, text: &str, suggestions: &[&str]) -> Value {
    json!({
        "id": id,
        "quest_id": quest_id,
        "user_id": null,
        "role": role,
        "content": [{"type": "text", "text": text}],
        "created_at": chrono::Utc::now().to_rfc3339(),
        "metadata": {"suggestions": suggestions},
    })
}

fn quest_json(id: Uuid, user_id: Uuid, title: Value, updated: &str) -> Value {
    json!({
        "id": id,
        "user_id": user_id,
        "title": title,
        "created_at": "2025-03-01T10:00:00Z",
        "last_updated_at": updated,
    })
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Could not validate credentials"}))).into_response()
}

async fn list_quests(State(b): State<Backend>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    Json(Value::Array(b.quests.lock().unwrap().clone())).into_response()
}

async fn create_quest(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let quest = quest_json(
        Uuid::new_v4(),
        b.user_id,
        body.get("initial_prompt").cloned().unwrap_or(Value::Null),
        &chrono::Utc::now().to_rfc3339(),
    );
    b.quests.lock().unwrap().push(quest.clone());
    (StatusCode::CREATED, Json(quest)).into_response()
}

async fn get_quest(State(b): State<Backend>, Path(id): Path<Uuid>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let messages = if id == b.quest_id {
        json!([
            message_json(b.m1, id, "user", "why is the sky blue?", &[]),
            message_json(b.m2, id, "model", "Rayleigh scattering!", &["Tell me more"]),
        ])
    } else if id == b.slow_quest {
        tokio::time::sleep(Duration::from_millis(300)).await;
        json!([])
    } else if b.quests.lock().unwrap().iter().any(|q| q["id"] == json!(id)) {
        json!([])
    } else {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Quest not found or access denied"})))
            .into_response();
    };

    let mut detail = quest_json(id, b.user_id, json!("Why is the sky blue..."), "2025-03-01T10:05:00Z");
    detail["messages"] = messages;
    Json(detail).into_response()
}

async fn delete_quest(State(b): State<Backend>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let status = *b.delete_status.lock().unwrap();
    if status.is_success() {
        return status.into_response();
    }
    (status, Json(json!({"detail": "Failed to delete quest"}))).into_response()
}

async fn post_message(
    State(b): State<Backend>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    b.posted.lock().unwrap().push(body.clone());
    if body["content"][0]["text"] == SLOW_POST {
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let mut echo = message_json(Uuid::new_v4(), id, "user", "", &[]);
    echo["content"] = body["content"].clone();
    echo["metadata"] = Value::Null;
    b.hub.publish(id, echo.clone());
    Json(echo).into_response()
}

async fn generate_image(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
    b.generated.lock().unwrap().push(prompt);
    (StatusCode::ACCEPTED, Json(json!({"message": "Image generation request received."}))).into_response()
}

async fn get_guide(State(b): State<Backend>, headers: HeaderMap) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let prompt = b.guide.lock().unwrap().clone();
    Json(json!({"prompt": prompt})).into_response()
}

async fn put_guide(State(b): State<Backend>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !b.authorized(&headers) {
        return unauthorized();
    }
    let prompt = body["prompt"].as_str().map(String::from);
    *b.guide.lock().unwrap() = prompt.clone();
    Json(json!({"prompt": prompt})).into_response()
}

pub fn token_for(user_id: Uuid) -> String {
    let claims = json!({
        "sub": user_id,
        "email": "ada@example.com",
        "exp": chrono::Utc::now().timestamp() + 3600,
        "aud": "authenticated",
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s3cret")).unwrap()
}

pub async fn spawn_backend() -> (SocketAddr, Backend) {
    let user_id = Uuid::new_v4();
    let backend = Backend {
        token: token_for(user_id),
        user_id,
        quest_id: Uuid::new_v4(),
        m1: Uuid::new_v4(),
        m2: Uuid::new_v4(),
        slow_quest: Uuid::new_v4(),
        hub: LocalHub::new(),
        posted: Arc::new(Mutex::new(Vec::new())),
        generated: Arc::new(Mutex::new(Vec::new())),
        delete_status: Arc::new(Mutex::new(StatusCode::NO_CONTENT)),
        quests: Arc::new(Mutex::new(Vec::new())),
        guide: Arc::new(Mutex::new(None)),
    };

    let app = Router::new()
        .route("/quests", get(list_quests).post(create_quest))
        .route("/quests/{id}", get(get_quest).delete(delete_quest))
        .route("/quests/{id}/messages", post(post_message))
        .route("/quests/{id}/generate-image", post(generate_image))
        .route("/guide", get(get_guide).put(put_guide))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

pub fn api(addr: SocketAddr, token: &str) -> ApiClient {
    let config = ClientConfig::new(Url::parse(&format!("http://{}", addr)).unwrap());
    let session = Arc::new(StaticSession::from_token(token).unwrap());
    ApiClient::new(config, session).unwrap()
}

pub async fn next_update(rx: &mut mpsc::UnboundedReceiver<ViewUpdate>) -> ViewUpdate {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no view update in time")
        .expect("view stopped")
}

/// Collect updates up to and including the first one matching `pred`.
pub async fn wait_for<F>(rx: &mut mpsc::UnboundedReceiver<ViewUpdate>, pred: F) -> Vec<ViewUpdate>
where
    F: Fn(&ViewUpdate) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let update = next_update(rx).await;
        let done = pred(&update);
        seen.push(update);
        if done {
            return seen;
        }
    }
}

/// Everything emitted within `window`.
pub async fn drain_for(rx: &mut mpsc::UnboundedReceiver<ViewUpdate>, window: Duration) -> Vec<ViewUpdate> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Some(update)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        seen.push(update);
    }
    seen
}

pub async fn wait_for_subscribers(hub: &LocalHub, quest_id: Uuid, expected: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while hub.subscriber_count(quest_id) != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

pub fn appended_ids(updates: &[ViewUpdate]) -> Vec<Uuid> {
    updates
        .iter()
        .filter_map(|u| match u {
            ViewUpdate::MessageAppended(m) => Some(m.id),
            _ => None,
        })
        .collect()
}
