//! services/api/src/router.rs
//!
//! Assembles the web router from the shared application state.

use crate::web::{
    callback_handler, create_bookmark_handler, delete_bookmark_handler, list_bookmarks_handler,
    login_handler, logout_handler, require_auth, rest::ApiDoc, session_handler, state::AppState,
    ws_handler,
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn build_router(app_state: Arc<AppState>) -> Router {
    let mut cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);
    match app_state.config.public_url.parse::<HeaderValue>() {
        Ok(origin) => cors = cors.allow_origin(origin),
        Err(e) => warn!("PUBLIC_URL is not a valid CORS origin: {}", e),
    }

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/login", get(login_handler))
        .route("/auth/callback", get(callback_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/session", get(session_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route(
            "/bookmarks",
            get(list_bookmarks_handler).post(create_bookmark_handler),
        )
        .route("/bookmarks/{id}", delete(delete_bookmark_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    // Combine API routes
    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
