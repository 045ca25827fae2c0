//! crates/smart_bookmarks_core/src/controller.rs
//!
//! The bookmark sync controller: session resolution, the full-snapshot refresh,
//! and the add/delete mutations. Every path that changes remote state ends in
//! a refresh of the whole list, so interleaved operations converge on the same
//! result regardless of order.

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{ChangeEvent, Identity, NewBookmark, OAuthProvider, SignInRedirect};
use crate::ports::{BookmarkRepository, ChangeFeed, IdentityProvider, PortError};
use crate::store::{BookmarkStore, SyncSnapshot};

//=========================================================================================
// Error Types
//=========================================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("The {0} must not be empty")]
    MissingField(&'static str),
    #[error("No user is signed in")]
    NotSignedIn,
    #[error("A bookmark is already being added")]
    AddInFlight,
    #[error("Bookmark {0} is already being deleted")]
    DeleteInFlight(Uuid),
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type SyncResult<T> = Result<T, SyncError>;

//=========================================================================================
// The Controller
//=========================================================================================

/// Owns one session's view of the bookmarks table.
///
/// Cloning is cheap; clones share the same store and backend handles.
#[derive(Clone)]
pub struct BookmarkSyncController {
    identity: Arc<dyn IdentityProvider>,
    repository: Arc<dyn BookmarkRepository>,
    feed: Arc<dyn ChangeFeed>,
    store: Arc<BookmarkStore>,
}

impl BookmarkSyncController {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        repository: Arc<dyn BookmarkRepository>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        Self {
            identity,
            repository,
            feed,
            store: Arc::new(BookmarkStore::new()),
        }
    }

    /// Builds a controller from a single backend that provides all three ports.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: IdentityProvider + BookmarkRepository + ChangeFeed + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend)
    }

    pub fn store(&self) -> &BookmarkStore {
        &self.store
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.store.snapshot()
    }

    pub(crate) fn feed(&self) -> &Arc<dyn ChangeFeed> {
        &self.feed
    }

    // --- Session Manager ---

    /// Resolves the current identity and loads its bookmarks.
    ///
    /// A failed identity check is logged and treated as signed out.
    pub async fn resolve_session(&self) -> Option<Identity> {
        let identity = match self.identity.current_user().await {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Failed to resolve the current user: {}", e);
                None
            }
        };

        self.store.set_identity(identity.clone());

        match &identity {
            Some(user) => {
                debug!(user_id = %user.user_id, "Session resolved");
                if let Err(e) = self.refresh_for(user.user_id).await {
                    warn!(user_id = %user.user_id, "Initial bookmark fetch failed: {}", e);
                }
            }
            None => {
                debug!("No signed-in user");
                self.store.clear_bookmarks();
            }
        }

        identity
    }

    /// Starts an OAuth sign-in with the given provider.
    pub async fn login(&self, provider: OAuthProvider) -> SyncResult<SignInRedirect> {
        info!(%provider, "Starting OAuth sign-in");
        Ok(self.identity.begin_sign_in(provider).await?)
    }

    /// Signs out remotely and discards all local state.
    ///
    /// Local state is discarded even when the remote sign-out fails.
    pub async fn logout(&self) {
        if let Err(e) = self.identity.sign_out().await {
            warn!("Remote sign-out failed: {}", e);
        }
        self.store.reset();
        info!("Signed out");
    }

    // --- Bookmark Store ---

    /// Re-fetches the whole list for the signed-in user.
    pub async fn refresh(&self) -> SyncResult<()> {
        let user = self.store.identity().ok_or(SyncError::NotSignedIn)?;
        self.refresh_for(user.user_id).await
    }

    /// Fetches and replaces the list. On failure the previous list is kept.
    async fn refresh_for(&self, user_id: Uuid) -> SyncResult<()> {
        match self.repository.list_for_user(user_id).await {
            Ok(bookmarks) => {
                let count = bookmarks.len();
                if self.store.replace_bookmarks(user_id, bookmarks) {
                    debug!(%user_id, count, "Bookmarks refreshed");
                } else {
                    debug!(%user_id, "Discarding fetch for a user who is no longer signed in");
                }
                Ok(())
            }
            Err(e) => {
                warn!(%user_id, "Bookmark fetch failed, keeping the previous list: {}", e);
                Err(e.into())
            }
        }
    }

    // --- Mutations ---

    /// Inserts a bookmark for the signed-in user, then refreshes.
    ///
    /// Rejected without a remote call when a field is empty, nobody is signed
    /// in, or another add is still in flight.
    pub async fn add_bookmark(&self, title: &str, url: &str) -> SyncResult<()> {
        if title.trim().is_empty() {
            return Err(SyncError::MissingField("title"));
        }
        if url.trim().is_empty() {
            return Err(SyncError::MissingField("url"));
        }
        let user = self.store.identity().ok_or(SyncError::NotSignedIn)?;

        if !self.store.try_begin_add() {
            return Err(SyncError::AddInFlight);
        }

        let result = self
            .repository
            .insert(NewBookmark {
                url: url.to_string(),
                title: title.to_string(),
                user_id: user.user_id,
            })
            .await;
        self.store.finish_add();

        if let Err(e) = result {
            warn!(user_id = %user.user_id, "Failed to add bookmark: {}", e);
            return Err(e.into());
        }

        info!(user_id = %user.user_id, "Bookmark added");
        if let Err(e) = self.refresh_for(user.user_id).await {
            warn!("Refresh after add failed: {}", e);
        }
        Ok(())
    }

    /// Deletes a bookmark by id, then refreshes.
    ///
    /// Ownership is not re-checked here; the backend's access policy enforces it.
    pub async fn delete_bookmark(&self, bookmark_id: Uuid) -> SyncResult<()> {
        let user = self.store.identity().ok_or(SyncError::NotSignedIn)?;

        if !self.store.try_begin_delete(bookmark_id) {
            return Err(SyncError::DeleteInFlight(bookmark_id));
        }

        let result = self.repository.delete(bookmark_id).await;
        self.store.finish_delete(bookmark_id);

        if let Err(e) = result {
            warn!(%bookmark_id, "Failed to delete bookmark: {}", e);
            return Err(e.into());
        }

        info!(%bookmark_id, "Bookmark deleted");
        if let Err(e) = self.refresh_for(user.user_id).await {
            warn!("Refresh after delete failed: {}", e);
        }
        Ok(())
    }

    // --- Change Notifications ---

    /// Reacts to a change-feed event by re-resolving the user and refreshing.
    ///
    /// The event's own row is never inspected: any change, by anyone, triggers
    /// a refresh of this session's list.
    pub async fn handle_change(&self, event: &ChangeEvent) -> SyncResult<()> {
        debug!(table = %event.table, kind = ?event.kind, "Change notification received");
        match self.identity.current_user().await {
            Ok(Some(user)) => self.refresh_for(user.user_id).await,
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("Failed to resolve the current user after a change: {}", e);
                Ok(())
            }
        }
    }
}
