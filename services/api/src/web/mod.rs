pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

// Re-export the handlers to make them easily accessible
// to the binary that builds the web server router.
pub use auth::{callback_handler, login_handler, logout_handler, session_handler};
pub use middleware::require_auth;
pub use rest::{create_bookmark_handler, delete_bookmark_handler, list_bookmarks_handler};
pub use ws_handler::ws_handler;
