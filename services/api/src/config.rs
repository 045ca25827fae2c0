//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use smart_bookmarks_core::OAuthProvider;
use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection settings for the hosted backend.
#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    /// The externally visible origin of this service, used for OAuth redirects and CORS.
    pub public_url: String,
    /// `None` when the backend credentials are absent; the service then runs inert.
    pub supabase: Option<SupabaseConfig>,
    pub oauth_provider: OAuthProvider,
    pub session_ttl_days: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Load Server Settings ---
        let bind_address_str =
            lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let public_url = lookup("PUBLIC_URL")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        // --- Load Backend Credentials (both or nothing) ---
        let supabase = match (
            lookup("SUPABASE_URL").filter(|v| !v.is_empty()),
            lookup("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()),
        ) {
            (Some(url), Some(anon_key)) => Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            }),
            _ => None,
        };

        // --- Load Auth Settings ---
        let oauth_provider = match lookup("OAUTH_PROVIDER")
            .unwrap_or_else(|| "google".to_string())
            .to_lowercase()
            .as_str()
        {
            "google" => OAuthProvider::Google,
            other => {
                return Err(ConfigError::InvalidValue(
                    "OAUTH_PROVIDER".to_string(),
                    format!("'{}' is not a supported provider", other),
                ))
            }
        };

        let session_ttl_days = match lookup("SESSION_TTL_DAYS") {
            Some(v) => v
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "SESSION_TTL_DAYS".to_string(),
                        format!("'{}' is not a positive number of days", v),
                    )
                })?,
            None => 7,
        };

        Ok(Self {
            bind_address,
            log_level,
            public_url,
            supabase,
            oauth_provider,
            session_ttl_days,
        })
    }

    /// The OAuth callback URL registered with the identity provider.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_url)
    }
}
