//! services/api/src/web/auth.rs
//!
//! Authentication endpoints: OAuth sign-in, the provider callback, logout, and
//! session resolution.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use smart_bookmarks_core::PortError;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::web::{
    middleware::{read_cookie, SESSION_COOKIE},
    state::AppState,
};

/// The cookie tying a provider callback to the sign-in that started it.
const FLOW_COOKIE: &str = "sb_flow";

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    /// The authorization code issued by the identity backend.
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub signed_in: bool,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

fn unavailable(e: PortError) -> (StatusCode, String) {
    warn!("Backend unavailable: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        "The bookmark backend is not configured".to_string(),
    )
}

fn expire_cookie(name: &str) -> String {
    format!("{}=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0", name)
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /auth/login - Start the OAuth sign-in
#[utoipa::path(
    get,
    path = "/auth/login",
    responses(
        (status = 303, description = "Redirect to the identity provider"),
        (status = 503, description = "Backend not configured")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Ask the identity backend where to send the browser
    let controller = state.anonymous_controller().map_err(unavailable)?;
    let redirect = controller
        .login(state.config.oauth_provider)
        .await
        .map_err(|e| {
            error!("Failed to start sign-in: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to start sign-in".to_string())
        })?;

    // 2. Remember the verifier until the provider sends the browser back
    let verifier = redirect.flow_state.unwrap_or_default();
    let flow_id = state.sessions.begin_sign_in(verifier).await;
    let cookie = format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        FLOW_COOKIE,
        flow_id,
        Duration::minutes(10).num_seconds()
    );

    Ok((
        StatusCode::SEE_OTHER,
        AppendHeaders([
            (header::LOCATION, redirect.location),
            (header::SET_COOKIE, cookie),
        ]),
    ))
}

/// GET /auth/callback - Finish the OAuth sign-in
#[utoipa::path(
    get,
    path = "/auth/callback",
    params(CallbackParams),
    responses(
        (status = 303, description = "Signed in; redirect to the app"),
        (status = 400, description = "Missing code or unknown sign-in"),
        (status = 401, description = "The provider or backend rejected the sign-in")
    )
)]
pub async fn callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let client = state.backend().map_err(unavailable)?;

    if let Some(err) = params.error {
        warn!(error = %err, description = ?params.error_description, "Provider rejected sign-in");
        return Err((StatusCode::UNAUTHORIZED, "Sign-in was not completed".to_string()));
    }

    // 1. Match the callback to its pending sign-in
    let code = params
        .code
        .ok_or((StatusCode::BAD_REQUEST, "Missing authorization code".to_string()))?;
    let flow_id = read_cookie(&headers, FLOW_COOKIE)
        .ok_or((StatusCode::BAD_REQUEST, "No sign-in in progress".to_string()))?;
    let verifier = state
        .sessions
        .take_sign_in(flow_id)
        .await
        .ok_or((StatusCode::BAD_REQUEST, "Sign-in expired, please try again".to_string()))?;

    // 2. Exchange the code for tokens
    let tokens = client.exchange_code(&code, &verifier).await.map_err(|e| {
        error!("Failed to exchange authorization code: {:?}", e);
        (StatusCode::UNAUTHORIZED, "Sign-in failed".to_string())
    })?;

    // 3. Create the browser session and load its bookmarks
    let ttl = Duration::days(state.config.session_ttl_days);
    let session = state.sessions.create(client, tokens, ttl).await;
    session.controller.resolve_session().await;
    info!(user_id = %session.user_id, "User signed in");

    // 4. Set the session cookie and return to the app
    let cookie = format!(
        "{}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        SESSION_COOKIE,
        session.id,
        ttl.num_seconds()
    );

    Ok((
        StatusCode::SEE_OTHER,
        AppendHeaders([
            (header::LOCATION, "/".to_string()),
            (header::SET_COOKIE, cookie),
            (header::SET_COOKIE, expire_cookie(FLOW_COOKIE)),
        ]),
    ))
}

/// POST /auth/logout - Sign out and invalidate the session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Extract session cookie
    let session_id = read_cookie(&headers, SESSION_COOKIE)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    // 2. Drop the browser session
    let session = state
        .sessions
        .remove(session_id)
        .await
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    // 3. Sign out remotely and discard local state
    session.controller.logout().await;
    info!(user_id = %session.user_id, "User signed out");

    // 4. Clear cookie
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, expire_cookie(SESSION_COOKIE))],
    ))
}

/// GET /auth/session - Resolve the current user
#[utoipa::path(
    get,
    path = "/auth/session",
    responses(
        (status = 200, description = "The current identity, if any", body = SessionResponse)
    )
)]
pub async fn session_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<SessionResponse> {
    let signed_out = SessionResponse {
        signed_in: false,
        user_id: None,
        email: None,
    };

    let Some(session_id) = read_cookie(&headers, SESSION_COOKIE) else {
        return Json(signed_out);
    };
    let Some(session) = state.sessions.get(session_id).await else {
        return Json(signed_out);
    };
    if let Ok(client) = state.backend() {
        if let Err(e) = session.ensure_fresh_token(client).await {
            warn!("Failed to refresh access token: {}", e);
        }
    }

    match session.controller.resolve_session().await {
        Some(identity) => Json(SessionResponse {
            signed_in: true,
            user_id: Some(identity.user_id),
            email: identity.email,
        }),
        None => Json(signed_out),
    }
}
