//! services/api/src/adapters/realtime.rs
//!
//! Supabase Realtime change-feed adapter. Speaks the Phoenix channel protocol
//! over a WebSocket: join a `postgres_changes` channel for one table, keep it
//! alive with heartbeats, and forward every row change as a `ChangeEvent`.

use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use smart_bookmarks_core::{ChangeEvent, ChangeKind, ChangeStream, PortError, PortResult, Subscription};
use tokio::net::TcpStream;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// The channel name the bookmark view joins.
pub const CHANNEL_NAME: &str = "realtime-bookmarks";

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PHOENIX_VSN: &str = "1.0.0";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

//=========================================================================================
// Wire Protocol
//=========================================================================================

/// A Phoenix channel frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
}

impl PhoenixMessage {
    /// The join request for a `postgres_changes` channel on `table`.
    pub fn join(topic: &str, table: &str, access_token: Option<&str>, msg_ref: u64) -> Self {
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [
                    { "event": "*", "schema": "public", "table": table }
                ]
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = serde_json::json!(token);
        }
        Self {
            topic: topic.to_string(),
            event: "phx_join".to_string(),
            payload,
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "phx_leave".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    /// Hands the channel a refreshed access token.
    pub fn access_token(topic: &str, access_token: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: "access_token".to_string(),
            payload: serde_json::json!({ "access_token": access_token }),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(msg_ref.to_string()),
        }
    }

    fn to_ws(&self) -> PortResult<Message> {
        let json = serde_json::to_string(self).map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(Message::Text(json.into()))
    }
}

/// Derives the realtime WebSocket endpoint from the project URL.
pub fn realtime_url(api_url: &str, anon_key: &str) -> PortResult<String> {
    let mut url = Url::parse(api_url)
        .map_err(|e| PortError::Unexpected(format!("Invalid backend URL: {}", e)))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(PortError::Unexpected(format!(
                "Unsupported backend URL scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| PortError::Unexpected("Failed to derive realtime URL".to_string()))?;
    url.set_path("/realtime/v1/websocket");
    url.query_pairs_mut()
        .clear()
        .append_pair("apikey", anon_key)
        .append_pair("vsn", PHOENIX_VSN);
    Ok(url.into())
}

/// Extracts a change event from a `postgres_changes` frame.
pub fn parse_change_event(message: &PhoenixMessage) -> Option<ChangeEvent> {
    if message.event != "postgres_changes" {
        return None;
    }
    let data = message.payload.get("data")?;
    let kind = match data.get("type")?.as_str()? {
        "INSERT" => ChangeKind::Insert,
        "UPDATE" => ChangeKind::Update,
        "DELETE" => ChangeKind::Delete,
        _ => return None,
    };
    let table = data.get("table")?.as_str()?.to_string();
    Some(ChangeEvent { kind, table })
}

//=========================================================================================
// Subscription
//=========================================================================================

/// Connects, joins the channel for `table`, and returns the event stream.
///
/// `access_token` is shared with the REST side of the session; when it is
/// refreshed the channel is told on its next heartbeat.
pub async fn subscribe(
    url: &str,
    access_token: Arc<RwLock<Option<String>>>,
    table: &str,
) -> PortResult<Subscription> {
    info!("Connecting to realtime");
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| PortError::Unexpected(format!("Realtime connection failed: {}", e)))?;
    let (mut write, read) = ws_stream.split();

    let topic = format!("realtime:{}", CHANNEL_NAME);
    let joined_with = access_token.read().await.clone();
    let join = PhoenixMessage::join(&topic, table, joined_with.as_deref(), 1);
    write
        .send(join.to_ws()?)
        .await
        .map_err(|e| PortError::Unexpected(format!("Failed to join realtime channel: {}", e)))?;
    debug!(%topic, table, "Sent phx_join");

    let (event_tx, mut event_rx) = mpsc::channel::<ChangeEvent>(32);
    let cancellation_token = CancellationToken::new();
    tokio::spawn(run_channel(
        write,
        read,
        topic,
        TokenWatch {
            shared: access_token,
            sent: joined_with,
        },
        event_tx,
        cancellation_token.clone(),
    ));

    let events: ChangeStream = Box::pin(async_stream::stream! {
        while let Some(event) = event_rx.recv().await {
            yield event;
        }
    });
    Ok(Subscription::new(events, cancellation_token))
}

/// The session's current access token and the last one the channel was given.
struct TokenWatch {
    shared: Arc<RwLock<Option<String>>>,
    sent: Option<String>,
}

impl TokenWatch {
    /// Returns the current token when it differs from the one last sent.
    async fn changed(&mut self) -> Option<String> {
        let current = self.shared.read().await.clone();
        if current.is_none() || current == self.sent {
            return None;
        }
        self.sent = current.clone();
        current
    }
}

/// Drives one channel until it is cancelled or closed by the server, or until
/// the subscriber goes away.
async fn run_channel(
    mut write: WsSink,
    mut read: futures::stream::SplitStream<WsStream>,
    topic: String,
    mut token: TokenWatch,
    event_tx: mpsc::Sender<ChangeEvent>,
    cancellation_token: CancellationToken,
) {
    let mut next_ref: u64 = 2;
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = cancellation_token.cancelled() => {
                debug!(%topic, "Leaving realtime channel");
                if let Ok(leave) = PhoenixMessage::leave(&topic, next_ref).to_ws() {
                    let _ = write.send(leave).await;
                }
                let _ = write.close().await;
                break;
            }
            _ = heartbeat.tick() => {
                if let Some(fresh) = token.changed().await {
                    debug!(%topic, "Pushing refreshed access token to realtime");
                    let Ok(frame) = PhoenixMessage::access_token(&topic, &fresh, next_ref).to_ws() else { continue };
                    next_ref += 1;
                    if write.send(frame).await.is_err() {
                        warn!("Failed to send refreshed access token");
                        break;
                    }
                }
                let Ok(frame) = PhoenixMessage::heartbeat(next_ref).to_ws() else { continue };
                next_ref += 1;
                if write.send(frame).await.is_err() {
                    warn!("Failed to send realtime heartbeat");
                    break;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let message = match serde_json::from_str::<PhoenixMessage>(text.as_str()) {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("Failed to parse realtime frame: {}", e);
                            continue;
                        }
                    };
                    if !handle_frame(&topic, &message, &event_tx).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Realtime socket closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Realtime socket error: {}", e);
                    break;
                }
            },
        }
    }
}

/// Returns `false` when the channel should shut down.
async fn handle_frame(
    topic: &str,
    message: &PhoenixMessage,
    event_tx: &mpsc::Sender<ChangeEvent>,
) -> bool {
    if message.topic != topic {
        return true;
    }

    match message.event.as_str() {
        "postgres_changes" => match parse_change_event(message) {
            Some(event) => event_tx.send(event).await.is_ok(),
            None => {
                warn!("Ignoring malformed postgres_changes payload");
                true
            }
        },
        "phx_reply" => {
            let status = message.payload.get("status").and_then(|s| s.as_str());
            if status == Some("ok") {
                debug!(%topic, "Realtime channel acknowledged");
            } else {
                warn!(%topic, payload = %message.payload, "Realtime channel replied with an error");
            }
            true
        }
        "phx_error" | "phx_close" => {
            warn!(%topic, event = %message.event, "Realtime channel closed by server");
            false
        }
        _ => true,
    }
}
