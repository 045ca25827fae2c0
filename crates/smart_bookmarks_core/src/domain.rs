//! crates/smart_bookmarks_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any backend or wire format.

use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

/// The backend table that holds bookmark rows.
pub const BOOKMARKS_TABLE: &str = "bookmarks";

/// A user-owned bookmark record. The backend assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// The payload sent to the backend when creating a bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBookmark {
    pub url: String,
    pub title: String,
    pub user_id: Uuid,
}

/// The authenticated identity bound to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// OAuth providers the app can sign in with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OAuthProvider {
    #[default]
    Google,
}

impl OAuthProvider {
    /// The provider slug understood by the identity backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to send the browser to start an OAuth sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignInRedirect {
    pub location: String,
    /// Opaque state that must be presented again when the redirect returns
    /// (for example a PKCE code verifier).
    pub flow_state: Option<String>,
}

/// The kind of row change reported by the change-feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change-feed notification. Only its occurrence matters; row data is not carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
}
