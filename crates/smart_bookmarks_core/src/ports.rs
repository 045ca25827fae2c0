//! crates/smart_bookmarks_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the hosted backend that provides identity, storage and
//! change notifications.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{Bookmark, ChangeEvent, Identity, NewBookmark, OAuthProvider, SignInRedirect};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., HTTP, WebSocket).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Backend is not configured")]
    NotConfigured,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// A boxed stream of change notifications.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

//=========================================================================================
// Subscription Handle
//=========================================================================================

/// An open change-feed subscription.
///
/// Yields change events until the remote channel closes. Calling
/// [`Subscription::unsubscribe`] or dropping the handle cancels the token the
/// adapter watches, which releases the remote channel.
pub struct Subscription {
    events: ChangeStream,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(events: ChangeStream, cancel: CancellationToken) -> Self {
        Self { events, cancel }
    }

    /// Explicitly tears the subscription down.
    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns the currently authenticated user, or `None` when signed out.
    async fn current_user(&self) -> PortResult<Option<Identity>>;

    /// Prepares an OAuth redirect for the given provider.
    async fn begin_sign_in(&self, provider: OAuthProvider) -> PortResult<SignInRedirect>;

    /// Invalidates the current remote session.
    async fn sign_out(&self) -> PortResult<()>;
}

#[async_trait]
pub trait BookmarkRepository: Send + Sync {
    /// All bookmarks owned by `user_id`, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Bookmark>>;

    async fn insert(&self, bookmark: NewBookmark) -> PortResult<()>;

    async fn delete(&self, bookmark_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens a subscription to every change event on `table`.
    async fn subscribe(&self, table: &str) -> PortResult<Subscription>;
}
