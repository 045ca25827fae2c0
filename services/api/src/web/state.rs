//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-browser-session state.

use crate::adapters::supabase::{AuthTokens, SupabaseClient, SupabaseSession};
use crate::config::Config;
use chrono::{DateTime, Duration, Utc};
use smart_bookmarks_core::{BookmarkSyncController, Identity, PortError, PortResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// How long a started sign-in may take before its verifier is discarded.
const SIGN_IN_WINDOW_MINUTES: i64 = 10;
/// Access tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_SECONDS: i64 = 60;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub config: Arc<Config>,
    /// `None` when the backend is not configured; the service is then inert.
    pub supabase: Option<SupabaseClient>,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(config: Arc<Config>, supabase: Option<SupabaseClient>) -> Self {
        Self {
            config,
            supabase,
            sessions: SessionRegistry::default(),
        }
    }

    pub fn backend(&self) -> PortResult<&SupabaseClient> {
        self.supabase.as_ref().ok_or(PortError::NotConfigured)
    }

    /// A controller for a visitor without a session (used to start sign-in).
    pub fn anonymous_controller(&self) -> PortResult<BookmarkSyncController> {
        let backend = self.backend()?;
        Ok(BookmarkSyncController::from_backend(Arc::new(
            backend.session(None),
        )))
    }
}

//=========================================================================================
// BrowserSession (Specific to One Signed-In Browser)
//=========================================================================================

struct SessionTokens {
    refresh_token: String,
    access_expires_at: DateTime<Utc>,
}

/// A signed-in browser, keyed by the opaque `session` cookie.
///
/// The controller is shared by every request and socket of this browser, so
/// the in-flight guards apply across all of them.
pub struct BrowserSession {
    pub id: String,
    pub user_id: Uuid,
    pub controller: BookmarkSyncController,
    pub expires_at: DateTime<Utc>,
    backend: SupabaseSession,
    tokens: Mutex<SessionTokens>,
}

impl BrowserSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Refreshes the backend access token when it is about to expire.
    pub async fn ensure_fresh_token(&self, client: &SupabaseClient) -> PortResult<()> {
        let mut tokens = self.tokens.lock().await;
        if tokens.access_expires_at > Utc::now() + Duration::seconds(REFRESH_MARGIN_SECONDS) {
            return Ok(());
        }

        debug!(session_id = %self.id, "Refreshing access token");
        let fresh = client.refresh_tokens(&tokens.refresh_token).await?;
        self.backend.set_access_token(Some(fresh.access_token)).await;
        tokens.refresh_token = fresh.refresh_token;
        tokens.access_expires_at = fresh.expires_at;
        Ok(())
    }
}

//=========================================================================================
// SessionRegistry
//=========================================================================================

struct PendingSignIn {
    code_verifier: String,
    started_at: DateTime<Utc>,
}

/// In-memory map of browser sessions and sign-ins awaiting their callback.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<BrowserSession>>>,
    pending: Mutex<HashMap<String, PendingSignIn>>,
}

impl SessionRegistry {
    /// Remembers a PKCE verifier and returns the flow id to hand the browser.
    pub async fn begin_sign_in(&self, code_verifier: String) -> String {
        let flow_id = Uuid::new_v4().to_string();
        let mut pending = self.pending.lock().await;
        let cutoff = Utc::now() - Duration::minutes(SIGN_IN_WINDOW_MINUTES);
        pending.retain(|_, p| p.started_at > cutoff);
        pending.insert(
            flow_id.clone(),
            PendingSignIn {
                code_verifier,
                started_at: Utc::now(),
            },
        );
        flow_id
    }

    /// Consumes a pending sign-in. Unknown or stale flows yield `None`.
    pub async fn take_sign_in(&self, flow_id: &str) -> Option<String> {
        let pending = self.pending.lock().await.remove(flow_id)?;
        let cutoff = Utc::now() - Duration::minutes(SIGN_IN_WINDOW_MINUTES);
        (pending.started_at > cutoff).then_some(pending.code_verifier)
    }

    /// Creates a browser session for freshly issued tokens.
    pub async fn create(
        &self,
        client: &SupabaseClient,
        tokens: AuthTokens,
        ttl: Duration,
    ) -> Arc<BrowserSession> {
        let AuthTokens {
            access_token,
            refresh_token,
            expires_at,
            identity,
        } = tokens;
        let Identity { user_id, .. } = identity;

        let backend = client.session(Some(access_token));
        let session = Arc::new(BrowserSession {
            id: Uuid::new_v4().to_string(),
            user_id,
            controller: BookmarkSyncController::from_backend(Arc::new(backend.clone())),
            expires_at: Utc::now() + ttl,
            backend,
            tokens: Mutex::new(SessionTokens {
                refresh_token,
                access_expires_at: expires_at,
            }),
        });

        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        info!(%user_id, "Browser session created");
        session
    }

    /// Looks up a live session; expired sessions are evicted.
    pub async fn get(&self, session_id: &str) -> Option<Arc<BrowserSession>> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        if session.is_expired() {
            self.remove(session_id).await;
            return None;
        }
        Some(session)
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<BrowserSession>> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
