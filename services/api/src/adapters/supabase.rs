//! services/api/src/adapters/supabase.rs
//!
//! This module contains the Supabase adapter, the concrete implementation of the
//! `IdentityProvider`, `BookmarkRepository` and `ChangeFeed` ports from the core
//! crate. Auth and table access go over the Supabase REST API with `reqwest`;
//! change notifications are delegated to the realtime adapter.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smart_bookmarks_core::{
    Bookmark, BookmarkRepository, ChangeFeed, Identity, IdentityProvider, NewBookmark,
    OAuthProvider, PortError, PortResult, SignInRedirect, Subscription, BOOKMARKS_TABLE,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use url::Url;
use uuid::Uuid;

use crate::adapters::realtime;

//=========================================================================================
// The Shared Client
//=========================================================================================

/// The process-wide backend handle, built once at startup from configuration.
#[derive(Clone)]
pub struct SupabaseClient {
    http_client: reqwest::Client,
    api_url: String,
    anon_key: String,
    callback_url: String,
}

/// Tokens issued by the identity backend after a sign-in or refresh.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub identity: Identity,
}

impl SupabaseClient {
    /// Creates a new `SupabaseClient`.
    ///
    /// * `api_url` - The project API URL (e.g., `https://xyz.supabase.co`)
    /// * `anon_key` - The project's anonymous API key
    /// * `callback_url` - Where the identity provider sends the browser back to
    pub fn new(
        api_url: impl Into<String>,
        anon_key: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_url: api_url.into(),
            anon_key: anon_key.into(),
            callback_url: callback_url.into(),
        }
    }

    /// A per-browser-session view of the backend.
    pub fn session(&self, access_token: Option<String>) -> SupabaseSession {
        SupabaseSession {
            client: self.clone(),
            access_token: Arc::new(RwLock::new(access_token)),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.api_url, table)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.api_url, path)
    }

    /// Builds the provider authorization URL for a PKCE sign-in.
    pub fn authorize_url(
        &self,
        provider: OAuthProvider,
        redirect_to: &str,
        code_challenge: &str,
    ) -> PortResult<String> {
        let url = Url::parse_with_params(
            &self.auth_url("authorize"),
            &[
                ("provider", provider.as_str()),
                ("redirect_to", redirect_to),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "s256"),
            ],
        )
        .map_err(|e| PortError::Unexpected(format!("Invalid authorize URL: {}", e)))?;
        Ok(url.into())
    }

    /// Exchanges the authorization code returned to the callback for tokens.
    pub async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> PortResult<AuthTokens> {
        let body = serde_json::json!({
            "auth_code": auth_code,
            "code_verifier": code_verifier,
        });
        self.token_grant("pkce", &body).await
    }

    /// Trades a refresh token for a fresh access token.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> PortResult<AuthTokens> {
        let body = serde_json::json!({ "refresh_token": refresh_token });
        self.token_grant("refresh_token", &body).await
    }

    async fn token_grant(&self, grant_type: &str, body: &serde_json::Value) -> PortResult<AuthTokens> {
        let url = format!("{}?grant_type={}", self.auth_url("token"), grant_type);
        debug!(grant_type, "Requesting token grant");

        let response = self
            .http_client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_response(response).await?;

        let grant: TokenGrantResponse = response.json().await.map_err(transport_error)?;
        Ok(AuthTokens {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
            identity: grant.user.to_domain(),
        })
    }

    /// The realtime endpoint for this project.
    pub fn realtime_url(&self) -> PortResult<String> {
        realtime::realtime_url(&self.api_url, &self.anon_key)
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

//=========================================================================================
// PKCE Helpers
//=========================================================================================

/// A fresh random PKCE code verifier (43 URL-safe characters).
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The S256 code challenge for a verifier.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

//=========================================================================================
// "Impure" Wire Record Structs
//=========================================================================================

#[derive(Deserialize)]
struct UserResponse {
    id: Uuid,
    email: Option<String>,
}
impl UserResponse {
    fn to_domain(self) -> Identity {
        Identity {
            user_id: self.id,
            email: self.email,
        }
    }
}

#[derive(Deserialize)]
struct TokenGrantResponse {
    access_token: String,
    refresh_token: String,
    expires_in: i64,
    user: UserResponse,
}

#[derive(Deserialize)]
struct BookmarkRow {
    id: Uuid,
    url: String,
    title: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
}
impl BookmarkRow {
    fn to_domain(self) -> Bookmark {
        Bookmark {
            id: self.id,
            url: self.url,
            title: self.title,
            user_id: self.user_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Serialize)]
struct BookmarkInsert<'a> {
    url: &'a str,
    title: &'a str,
    user_id: Uuid,
}

//=========================================================================================
// The Per-Session Adapter
//=========================================================================================

/// The backend as seen by one browser session.
#[derive(Clone)]
pub struct SupabaseSession {
    client: SupabaseClient,
    access_token: Arc<RwLock<Option<String>>>,
}

impl SupabaseSession {
    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    /// Swaps in a refreshed access token.
    pub async fn set_access_token(&self, access_token: Option<String>) {
        *self.access_token.write().await = access_token;
    }

    /// The bearer used for table access: the user's token, or the anon key.
    async fn bearer(&self) -> String {
        self.access_token()
            .await
            .unwrap_or_else(|| self.client.anon_key.clone())
    }

    fn request(&self, method: reqwest::Method, url: &str, bearer: &str) -> reqwest::RequestBuilder {
        self.client
            .http_client
            .request(method, url)
            .header("apikey", &self.client.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }
}

#[async_trait]
impl IdentityProvider for SupabaseSession {
    async fn current_user(&self) -> PortResult<Option<Identity>> {
        let Some(access_token) = self.access_token().await else {
            return Ok(None);
        };

        let response = self
            .request(reqwest::Method::GET, &self.client.auth_url("user"), &access_token)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_response(response).await?;

        let user: UserResponse = response.json().await.map_err(transport_error)?;
        debug!(user_id = %user.id, "Session verified with server");
        Ok(Some(user.to_domain()))
    }

    async fn begin_sign_in(&self, provider: OAuthProvider) -> PortResult<SignInRedirect> {
        let verifier = generate_code_verifier();
        let location = self.client.authorize_url(
            provider,
            &self.client.callback_url,
            &code_challenge(&verifier),
        )?;
        Ok(SignInRedirect {
            location,
            flow_state: Some(verifier),
        })
    }

    async fn sign_out(&self) -> PortResult<()> {
        let Some(access_token) = self.access_token().await else {
            return Ok(());
        };

        let response = self
            .request(reqwest::Method::POST, &self.client.auth_url("logout"), &access_token)
            .send()
            .await
            .map_err(transport_error)?;
        self.set_access_token(None).await;
        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl BookmarkRepository for SupabaseSession {
    async fn list_for_user(&self, user_id: Uuid) -> PortResult<Vec<Bookmark>> {
        let url = format!(
            "{}?select=*&user_id=eq.{}&order=created_at.desc",
            self.client.rest_url(BOOKMARKS_TABLE),
            user_id
        );
        let bearer = self.bearer().await;

        let response = self
            .request(reqwest::Method::GET, &url, &bearer)
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_response(response).await?;

        let rows: Vec<BookmarkRow> = response.json().await.map_err(transport_error)?;
        Ok(rows.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn insert(&self, bookmark: NewBookmark) -> PortResult<()> {
        let url = self.client.rest_url(BOOKMARKS_TABLE);
        let bearer = self.bearer().await;
        let body = [BookmarkInsert {
            url: &bookmark.url,
            title: &bookmark.title,
            user_id: bookmark.user_id,
        }];

        debug!(user_id = %bookmark.user_id, "Inserting bookmark");
        let response = self
            .request(reqwest::Method::POST, &url, &bearer)
            .header("Prefer", "return=minimal")
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await?;
        Ok(())
    }

    async fn delete(&self, bookmark_id: Uuid) -> PortResult<()> {
        let url = format!("{}?id=eq.{}", self.client.rest_url(BOOKMARKS_TABLE), bookmark_id);
        let bearer = self.bearer().await;

        debug!(%bookmark_id, "Deleting bookmark");
        let response = self
            .request(reqwest::Method::DELETE, &url, &bearer)
            .send()
            .await
            .map_err(transport_error)?;
        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeFeed for SupabaseSession {
    async fn subscribe(&self, table: &str) -> PortResult<Subscription> {
        let url = self.client.realtime_url()?;
        realtime::subscribe(&url, self.access_token.clone(), table).await
    }
}

//=========================================================================================
// HTTP Helpers
//=========================================================================================

fn transport_error(e: reqwest::Error) -> PortError {
    error!("Supabase transport error: {}", e);
    PortError::Unexpected(e.to_string())
}

/// Maps non-success statuses onto port errors.
async fn check_response(response: reqwest::Response) -> PortResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = %status, body = %body, "Supabase request failed");
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        StatusCode::NOT_FOUND => PortError::NotFound(body),
        _ => PortError::Unexpected(format!("HTTP {}: {}", status, body)),
    })
}
