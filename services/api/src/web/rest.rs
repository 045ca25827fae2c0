//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the bookmark REST endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::{
    auth::{self, SessionResponse},
    protocol::{BookmarkView, UserView},
    state::BrowserSession,
};
use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use serde::Deserialize;
use smart_bookmarks_core::{PortError, SyncError};
use std::sync::Arc;
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_bookmarks_handler,
        create_bookmark_handler,
        delete_bookmark_handler,
        auth::login_handler,
        auth::callback_handler,
        auth::logout_handler,
        auth::session_handler,
    ),
    components(
        schemas(BookmarkView, UserView, CreateBookmarkRequest, SessionResponse)
    ),
    tags(
        (name = "Smart Bookmarks API", description = "Personal bookmarks with live updates.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Payload Structs
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateBookmarkRequest {
    pub title: String,
    pub url: String,
}

//=========================================================================================
// Error Mapping
//=========================================================================================

/// Maps a sync failure onto an HTTP status and message.
pub fn sync_error_response(e: SyncError) -> (StatusCode, String) {
    let status = match &e {
        SyncError::MissingField(_) => StatusCode::BAD_REQUEST,
        SyncError::NotSignedIn => StatusCode::UNAUTHORIZED,
        SyncError::AddInFlight | SyncError::DeleteInFlight(_) => StatusCode::CONFLICT,
        SyncError::Port(PortError::Unauthorized) => StatusCode::UNAUTHORIZED,
        SyncError::Port(PortError::NotFound(_)) => StatusCode::NOT_FOUND,
        SyncError::Port(PortError::NotConfigured) => StatusCode::SERVICE_UNAVAILABLE,
        SyncError::Port(PortError::Unexpected(_)) => StatusCode::BAD_GATEWAY,
    };
    if status.is_server_error() {
        error!("Bookmark operation failed: {:?}", e);
    }
    (status, e.to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// List the signed-in user's bookmarks, newest first.
///
/// Always re-fetches from the backend before answering.
#[utoipa::path(
    get,
    path = "/bookmarks",
    responses(
        (status = 200, description = "The user's bookmarks", body = [BookmarkView]),
        (status = 401, description = "Not signed in"),
        (status = 502, description = "Backend query failed")
    )
)]
pub async fn list_bookmarks_handler(
    Extension(session): Extension<Arc<BrowserSession>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let controller = &session.controller;
    match controller.refresh().await {
        Ok(()) => {}
        Err(SyncError::NotSignedIn) => {
            if controller.resolve_session().await.is_none() {
                return Err(sync_error_response(SyncError::NotSignedIn));
            }
        }
        Err(e) => return Err(sync_error_response(e)),
    }

    let bookmarks: Vec<BookmarkView> = controller
        .snapshot()
        .bookmarks
        .iter()
        .map(BookmarkView::from)
        .collect();
    Ok(Json(bookmarks))
}

/// Add a bookmark for the signed-in user.
#[utoipa::path(
    post,
    path = "/bookmarks",
    request_body = CreateBookmarkRequest,
    responses(
        (status = 201, description = "Bookmark added; body is the refreshed list", body = [BookmarkView]),
        (status = 400, description = "Title or URL is empty"),
        (status = 409, description = "Another add is still in flight"),
        (status = 502, description = "Backend insert failed")
    )
)]
pub async fn create_bookmark_handler(
    Extension(session): Extension<Arc<BrowserSession>>,
    Json(req): Json<CreateBookmarkRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let controller = &session.controller;
    if !controller.snapshot().is_signed_in() {
        controller.resolve_session().await;
    }

    controller
        .add_bookmark(&req.title, &req.url)
        .await
        .map_err(sync_error_response)?;

    let bookmarks: Vec<BookmarkView> = controller
        .snapshot()
        .bookmarks
        .iter()
        .map(BookmarkView::from)
        .collect();
    Ok((StatusCode::CREATED, Json(bookmarks)))
}

/// Delete one bookmark by id.
#[utoipa::path(
    delete,
    path = "/bookmarks/{id}",
    params(
        ("id" = Uuid, Path, description = "The bookmark to delete.")
    ),
    responses(
        (status = 204, description = "Bookmark deleted"),
        (status = 409, description = "This bookmark is already being deleted"),
        (status = 502, description = "Backend delete failed")
    )
)]
pub async fn delete_bookmark_handler(
    Extension(session): Extension<Arc<BrowserSession>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let controller = &session.controller;
    if !controller.snapshot().is_signed_in() {
        controller.resolve_session().await;
    }

    controller
        .delete_bookmark(id)
        .await
        .map_err(sync_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
