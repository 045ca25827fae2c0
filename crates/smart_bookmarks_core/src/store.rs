//! crates/smart_bookmarks_core/src/store.rs
//!
//! The client-side projection of the current user's bookmarks.
//!
//! The list is derived state: every fetch replaces it wholesale. Alongside the
//! list the store tracks the busy flags that gate the add and delete controls.
//! Every change is published through a `watch` channel so views re-render from
//! the latest snapshot.

use std::collections::BTreeSet;
use tokio::sync::watch;
use uuid::Uuid;

use crate::domain::{Bookmark, Identity};

/// Everything a view needs to render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub identity: Option<Identity>,
    /// Newest first.
    pub bookmarks: Vec<Bookmark>,
    /// An add is in flight; the add control is disabled.
    pub adding: bool,
    /// Ids with a delete in flight; their delete controls are disabled.
    pub deleting: BTreeSet<Uuid>,
}

impl SyncSnapshot {
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some()
    }

    pub fn is_deleting(&self, bookmark_id: Uuid) -> bool {
        self.deleting.contains(&bookmark_id)
    }
}

/// Holds the snapshot and notifies subscribers on every change.
#[derive(Debug)]
pub struct BookmarkStore {
    state: watch::Sender<SyncSnapshot>,
}

impl Default for BookmarkStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookmarkStore {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SyncSnapshot::default());
        Self { state }
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> SyncSnapshot {
        self.state.borrow().clone()
    }

    /// A receiver that observes every subsequent change.
    pub fn subscribe(&self) -> watch::Receiver<SyncSnapshot> {
        self.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn set_identity(&self, identity: Option<Identity>) {
        self.state.send_if_modified(|s| {
            if s.identity == identity {
                return false;
            }
            s.identity = identity;
            true
        });
    }

    /// Replaces the whole list with a fresh fetch result for `user_id`.
    ///
    /// Returns `false` and leaves the list untouched when `user_id` is no
    /// longer the signed-in user, so a fetch that completes after a sign-out
    /// cannot bring the old rows back.
    pub fn replace_bookmarks(&self, user_id: Uuid, bookmarks: Vec<Bookmark>) -> bool {
        self.state.send_if_modified(|s| {
            if s.identity.as_ref().map(|i| i.user_id) != Some(user_id) {
                return false;
            }
            s.bookmarks = bookmarks;
            true
        })
    }

    pub fn clear_bookmarks(&self) {
        self.state.send_if_modified(|s| {
            if s.bookmarks.is_empty() {
                return false;
            }
            s.bookmarks.clear();
            true
        });
    }

    /// Returns the store to its blank, signed-out state.
    pub fn reset(&self) {
        self.state.send_replace(SyncSnapshot::default());
    }

    /// Raises the add flag. Returns `false` when an add is already in flight.
    pub fn try_begin_add(&self) -> bool {
        self.state.send_if_modified(|s| {
            if s.adding {
                return false;
            }
            s.adding = true;
            true
        })
    }

    pub fn finish_add(&self) {
        self.state.send_if_modified(|s| std::mem::replace(&mut s.adding, false));
    }

    /// Marks `bookmark_id` as being deleted. Returns `false` when a delete of
    /// that id is already in flight.
    pub fn try_begin_delete(&self, bookmark_id: Uuid) -> bool {
        self.state.send_if_modified(|s| s.deleting.insert(bookmark_id))
    }

    pub fn finish_delete(&self, bookmark_id: Uuid) {
        self.state.send_if_modified(|s| s.deleting.remove(&bookmark_id));
    }
}
