//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the live bookmark view, plus the JSON views shared with the REST endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smart_bookmarks_core::{Bookmark, Identity, SyncSnapshot};
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Shared JSON Views
//=========================================================================================

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct BookmarkView {
    pub id: Uuid,
    pub url: String,
    pub title: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl From<&Bookmark> for BookmarkView {
    fn from(b: &Bookmark) -> Self {
        Self {
            id: b.id,
            url: b.url.clone(),
            title: b.title.clone(),
            user_id: b.user_id,
            created_at: b.created_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct UserView {
    pub user_id: Uuid,
    pub email: Option<String>,
}

impl From<&Identity> for UserView {
    fn from(i: &Identity) -> Self {
        Self {
            user_id: i.user_id,
            email: i.email.clone(),
        }
    }
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add a bookmark for the signed-in user.
    AddBookmark { title: String, url: String },

    /// Delete one bookmark by id.
    DeleteBookmark { id: Uuid },

    /// Re-fetch the whole list.
    Refresh,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full render state. Sent on connect and after every change.
    Snapshot {
        user: Option<UserView>,
        bookmarks: Vec<BookmarkView>,
        /// The add control should be disabled.
        adding: bool,
        /// Rows whose delete control should be disabled.
        deleting: Vec<Uuid>,
    },

    /// The add succeeded; the client should clear its input fields.
    BookmarkAdded,

    /// A user-facing error that should interrupt the user (e.g. a popup).
    Alert { message: String },
}

impl From<&SyncSnapshot> for ServerMessage {
    fn from(snapshot: &SyncSnapshot) -> Self {
        ServerMessage::Snapshot {
            user: snapshot.identity.as_ref().map(UserView::from),
            bookmarks: snapshot.bookmarks.iter().map(BookmarkView::from).collect(),
            adding: snapshot.adding,
            deleting: snapshot.deleting.iter().copied().collect(),
        }
    }
}
