//! crates/smart_bookmarks_core/src/listener.rs
//!
//! The live change listener: one change-feed subscription per mounted view,
//! turning every notification on the bookmarks table into a refresh.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::{BookmarkSyncController, SyncResult};
use crate::domain::BOOKMARKS_TABLE;

/// A running listener. Stopping or dropping it releases the subscription.
pub struct LiveChangeListener {
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LiveChangeListener {
    /// Subscribes to the bookmarks table and spawns the notification loop.
    pub async fn start(controller: BookmarkSyncController) -> SyncResult<Self> {
        let mut subscription = controller.feed().subscribe(BOOKMARKS_TABLE).await?;
        info!("Subscribed to {} changes", BOOKMARKS_TABLE);

        let cancellation_token = CancellationToken::new();
        let token = cancellation_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Change listener cancelled");
                        break;
                    }
                    event = subscription.next() => match event {
                        Some(event) => {
                            if let Err(e) = controller.handle_change(&event).await {
                                warn!("Refresh after change notification failed: {}", e);
                            }
                        }
                        None => {
                            info!("Change feed closed");
                            break;
                        }
                    },
                }
            }
            subscription.unsubscribe();
        });

        Ok(Self {
            cancellation_token,
            handle: Some(handle),
        })
    }

    /// Cancels the loop and waits for the subscription to be released.
    pub async fn stop(mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Change listener task ended abnormally: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for LiveChangeListener {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}
