//! services/api/src/web/ws_handler.rs
//!
//! The live bookmark view. One WebSocket connection is one mounted view: it
//! resolves the session, starts the change listener, pushes a snapshot after
//! every store change, and runs client mutations as background tasks. The
//! backend access token is kept fresh for as long as the socket is open.

use crate::{
    adapters::SupabaseClient,
    error::ApiError,
    web::{
        protocol::{ClientMessage, ServerMessage},
        state::{AppState, BrowserSession},
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use smart_bookmarks_core::LiveChangeListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

type WsSender = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// How often an open view checks whether its access token needs refreshing.
const TOKEN_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Arc<BrowserSession>>,
) -> Response {
    let Ok(client) = state.backend().cloned() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    ws.on_upgrade(move |socket| handle_socket(socket, session, client))
}

async fn handle_socket(socket: WebSocket, session: Arc<BrowserSession>, client: SupabaseClient) {
    info!(user_id = %session.user_id, "Live view connected");

    // The sender is wrapped in an Arc<Mutex<>> to allow for shared mutable access across tasks.
    let (sender, mut receiver) = socket.split();
    let ws_sender: WsSender = Arc::new(Mutex::new(sender));
    let controller = session.controller.clone();

    // --- 1. Mount: resolve the session and render ---
    let mut snapshots = controller.store().subscribe();
    controller.resolve_session().await;
    snapshots.mark_unchanged();
    if send_message(&ws_sender, &ServerMessage::from(&controller.snapshot()))
        .await
        .is_err()
    {
        error!("Failed to send the initial snapshot.");
        return;
    }

    // --- 2. Start listening for remote changes ---
    let listener = match LiveChangeListener::start(controller.clone()).await {
        Ok(listener) => Some(listener),
        Err(e) => {
            warn!("Live updates unavailable: {}", e);
            let alert = ServerMessage::Alert {
                message: "Live updates are unavailable; changes from elsewhere will not appear.".to_string(),
            };
            let _ = send_message(&ws_sender, &alert).await;
            None
        }
    };

    // --- 3. Main Message Loop ---
    let mut token_check = interval(TOKEN_CHECK_INTERVAL);
    token_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    token_check.tick().await;

    loop {
        tokio::select! {
            _ = token_check.tick() => {
                if let Err(e) = session.ensure_fresh_token(&client).await {
                    warn!(user_id = %session.user_id, "Failed to refresh access token: {}", e);
                    let alert = ServerMessage::Alert { message: SESSION_EXPIRED.to_string() };
                    let _ = send_message(&ws_sender, &alert).await;
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let message = ServerMessage::from(&*snapshots.borrow_and_update());
                if send_message(&ws_sender, &message).await.is_err() {
                    info!("Client went away while sending a snapshot.");
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_text_message(text.as_str(), &session, &client, &ws_sender);
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
        }
    }

    // --- 4. Unmount: release the subscription ---
    if let Some(listener) = listener {
        listener.stop().await;
    }
    info!("Live view closed.");
}

/// Dispatches one client message. Mutations run as spawned tasks so the
/// receive loop never queues behind them; a second add while one is in flight
/// is rejected by the controller and reported as an alert.
fn handle_text_message(
    text: &str,
    session: &Arc<BrowserSession>,
    client: &SupabaseClient,
    ws_sender: &WsSender,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            return;
        }
    };

    let session = session.clone();
    let client = client.clone();
    let ws_sender = ws_sender.clone();
    tokio::spawn(async move {
        if let Err(e) = session.ensure_fresh_token(&client).await {
            warn!(user_id = %session.user_id, "Failed to refresh access token: {}", e);
            let alert = ServerMessage::Alert { message: SESSION_EXPIRED.to_string() };
            if let Err(e) = send_message(&ws_sender, &alert).await {
                warn!("Failed to send reply: {}", e);
            }
            return;
        }

        let controller = &session.controller;
        let outcome = match client_msg {
            ClientMessage::AddBookmark { title, url } => controller
                .add_bookmark(&title, &url)
                .await
                .map(|()| Some(ServerMessage::BookmarkAdded)),
            ClientMessage::DeleteBookmark { id } => {
                controller.delete_bookmark(id).await.map(|()| None)
            }
            ClientMessage::Refresh => controller.refresh().await.map(|()| None),
        };

        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => Some(ServerMessage::Alert {
                message: e.to_string(),
            }),
        };
        if let Some(reply) = reply {
            if let Err(e) = send_message(&ws_sender, &reply).await {
                warn!("Failed to send reply: {}", e);
            }
        }
    });
}

async fn send_message(ws_sender: &WsSender, message: &ServerMessage) -> Result<(), ApiError> {
    let json = serde_json::to_string(message).map_err(|e| ApiError::Internal(e.to_string()))?;
    ws_sender
        .lock()
        .await
        .send(Message::Text(json.into()))
        .await?;
    Ok(())
}
