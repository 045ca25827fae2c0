//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::web::state::AppState;

/// The cookie holding the opaque browser session id.
pub const SESSION_COOKIE: &str = "session";

/// Reads a cookie value from the request headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|c| {
            let (key, value) = c.trim().split_once('=')?;
            (key == name).then_some(value)
        })
        .filter(|v| !v.is_empty())
}

/// Middleware that resolves the session cookie to a signed-in browser session.
///
/// If valid, inserts the `BrowserSession` into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized. When the backend is not
/// configured, returns 503 Service Unavailable.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client = state
        .backend()
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    // 1. Parse session ID from cookie
    let session_id = read_cookie(req.headers(), SESSION_COOKIE).ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Look the session up
    let session = state
        .sessions
        .get(session_id)
        .await
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 3. Keep the backend token usable
    if let Err(e) = session.ensure_fresh_token(client).await {
        error!(session_id = %session.id, "Failed to refresh access token: {:?}", e);
        warn!(session_id = %session.id, "Dropping browser session");
        state.sessions.remove(&session.id).await;
        return Err(StatusCode::UNAUTHORIZED);
    }

    // 4. Insert the session into request extensions
    req.extensions_mut().insert(session);

    // 5. Continue to the handler
    Ok(next.run(req).await)
}
