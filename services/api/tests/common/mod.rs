//! An in-process stand-in for the Supabase auth, REST and realtime endpoints.

#![allow(dead_code)]

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const GOOD_TOKEN: &str = "good-token";
pub const AUTH_CODE: &str = "the-code";

#[derive(Clone)]
pub struct FakeSupabase {
    pub user_id: Uuid,
    pub rows: Arc<Mutex<Vec<Value>>>,
    pub signed_out: Arc<Mutex<bool>>,
    pub realtime_joins: Arc<AtomicUsize>,
    pub realtime_leaves: Arc<AtomicUsize>,
    valid_token: Arc<Mutex<String>>,
    expires_in: Arc<Mutex<i64>>,
    changes: broadcast::Sender<String>,
    clock: Arc<Mutex<i64>>,
}

impl FakeSupabase {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            user_id: Uuid::new_v4(),
            rows: Arc::new(Mutex::new(Vec::new())),
            signed_out: Arc::new(Mutex::new(false)),
            realtime_joins: Arc::new(AtomicUsize::new(0)),
            realtime_leaves: Arc::new(AtomicUsize::new(0)),
            valid_token: Arc::new(Mutex::new(GOOD_TOKEN.to_string())),
            expires_in: Arc::new(Mutex::new(3600)),
            changes,
            clock: Arc::new(Mutex::new(0)),
        }
    }

    pub fn seed(&self, user_id: Uuid, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        let row = json!({
            "id": id,
            "url": format!("https://example.com/{}", title.to_lowercase()),
            "title": title,
            "user_id": user_id,
            "created_at": self.tick(),
        });
        self.rows.lock().unwrap().push(row);
        id
    }

    /// Inserts a row as another client would and announces it on realtime.
    pub fn insert_elsewhere(&self, user_id: Uuid, title: &str) -> Uuid {
        let id = self.seed(user_id, title);
        self.emit("INSERT");
        id
    }

    /// Lifetime in seconds of the access tokens issued from now on.
    pub fn set_expires_in(&self, seconds: i64) {
        *self.expires_in.lock().unwrap() = seconds;
    }

    /// Revokes the current access token; the next token grant issues a new one.
    pub fn expire_access_token(&self) {
        *self.valid_token.lock().unwrap() = format!("token-{}", Uuid::new_v4());
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let expected = format!("Bearer {}", self.valid_token.lock().unwrap());
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == expected)
    }

    fn emit(&self, kind: &str) {
        let _ = self.changes.send(kind.to_string());
    }

    fn tick(&self) -> String {
        let mut clock = self.clock.lock().unwrap();
        *clock += 1;
        (Utc::now() + Duration::seconds(*clock)).to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Serves the fake on an ephemeral port and returns its base URL.
    pub async fn spawn(&self) -> String {
        let app = Router::new()
            .route("/auth/v1/user", get(user))
            .route("/auth/v1/logout", post(logout))
            .route("/auth/v1/token", post(token))
            .route(
                "/rest/v1/bookmarks",
                get(list_rows).post(insert_rows).delete(delete_rows),
            )
            .route("/realtime/v1/websocket", get(realtime))
            .with_state(self.clone());
        serve(app).await
    }
}

pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr: SocketAddr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake server");
    });
    format!("http://{}", addr)
}

//=========================================================================================
// Auth
//=========================================================================================

async fn user(State(fake): State<FakeSupabase>, headers: HeaderMap) -> impl IntoResponse {
    if !fake.authorized(&headers) || *fake.signed_out.lock().unwrap() {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "msg": "invalid JWT" })));
    }
    (
        StatusCode::OK,
        Json(json!({ "id": fake.user_id, "email": "reader@example.com", "aud": "authenticated" })),
    )
}

async fn logout(State(fake): State<FakeSupabase>, headers: HeaderMap) -> StatusCode {
    if !fake.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    *fake.signed_out.lock().unwrap() = true;
    StatusCode::NO_CONTENT
}

async fn token(
    State(fake): State<FakeSupabase>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let accepted = match params.get("grant_type").map(String::as_str) {
        Some("pkce") => body["auth_code"] == AUTH_CODE && body["code_verifier"].is_string(),
        Some("refresh_token") => body["refresh_token"].is_string(),
        _ => false,
    };
    if !accepted {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })));
    }
    *fake.signed_out.lock().unwrap() = false;
    let access_token = fake.valid_token.lock().unwrap().clone();
    let expires_in = *fake.expires_in.lock().unwrap();
    (
        StatusCode::OK,
        Json(json!({
            "access_token": access_token,
            "refresh_token": "refresh-token",
            "expires_in": expires_in,
            "token_type": "bearer",
            "user": { "id": fake.user_id, "email": "reader@example.com" }
        })),
    )
}

//=========================================================================================
// REST
//=========================================================================================

async fn list_rows(
    State(fake): State<FakeSupabase>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if !fake.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "JWT expired" })));
    }
    if params.get("order").map(String::as_str) != Some("created_at.desc") {
        return (StatusCode::BAD_REQUEST, Json(json!({ "message": "unexpected order" })));
    }
    let user_filter = params
        .get("user_id")
        .and_then(|v| v.strip_prefix("eq."))
        .map(str::to_string);

    let mut rows: Vec<Value> = fake
        .rows
        .lock()
        .unwrap()
        .iter()
        .filter(|r| match &user_filter {
            Some(user_id) => r["user_id"].as_str() == Some(user_id.as_str()),
            None => true,
        })
        .cloned()
        .collect();
    rows.sort_by(|a, b| b["created_at"].as_str().cmp(&a["created_at"].as_str()));
    (StatusCode::OK, Json(Value::Array(rows)))
}

async fn insert_rows(
    State(fake): State<FakeSupabase>,
    headers: HeaderMap,
    Json(body): Json<Vec<Value>>,
) -> StatusCode {
    if !fake.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    for row in body {
        let stored = json!({
            "id": Uuid::new_v4(),
            "url": row["url"],
            "title": row["title"],
            "user_id": row["user_id"],
            "created_at": fake.tick(),
        });
        fake.rows.lock().unwrap().push(stored);
    }
    fake.emit("INSERT");
    StatusCode::CREATED
}

async fn delete_rows(
    State(fake): State<FakeSupabase>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> StatusCode {
    if !fake.authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    let Some(id) = params.get("id").and_then(|v| v.strip_prefix("eq.")) else {
        return StatusCode::BAD_REQUEST;
    };
    fake.rows
        .lock()
        .unwrap()
        .retain(|r| r["id"].as_str() != Some(id));
    fake.emit("DELETE");
    StatusCode::NO_CONTENT
}

//=========================================================================================
// Realtime (Phoenix channel protocol, just enough for one channel)
//=========================================================================================

async fn realtime(State(fake): State<FakeSupabase>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| realtime_socket(fake, socket))
}

async fn realtime_socket(fake: FakeSupabase, mut socket: WebSocket) {
    let mut changes = fake.changes.subscribe();
    let mut joined_topic: Option<String> = None;

    loop {
        tokio::select! {
            frame = socket.recv() => {
                let Some(Ok(WsMessage::Text(text))) = frame else { break };
                let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else { continue };
                match message["event"].as_str().unwrap_or_default() {
                    "phx_join" => {
                        joined_topic = message["topic"].as_str().map(str::to_string);
                        fake.realtime_joins.fetch_add(1, Ordering::SeqCst);
                    }
                    "phx_leave" => {
                        fake.realtime_leaves.fetch_add(1, Ordering::SeqCst);
                        break;
                    }
                    _ => {}
                }
                let reply = json!({
                    "topic": message["topic"],
                    "event": "phx_reply",
                    "payload": { "status": "ok", "response": {} },
                    "ref": message["ref"],
                });
                if socket.send(WsMessage::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
            change = changes.recv() => {
                let kind = match change {
                    Ok(kind) => kind,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(topic) = &joined_topic else { continue };
                let frame = json!({
                    "topic": topic,
                    "event": "postgres_changes",
                    "payload": {
                        "data": { "type": kind, "schema": "public", "table": "bookmarks" }
                    },
                    "ref": null,
                });
                if socket.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}
