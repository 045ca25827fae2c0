//! services/api/src/bin/api.rs

use api_lib::{
    adapters::SupabaseClient, config::Config, error::ApiError, router::build_router,
    web::state::AppState,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize the Backend Client ---
    let supabase = match &config.supabase {
        Some(supabase) => {
            info!(url = %supabase.url, "Backend client configured");
            Some(SupabaseClient::new(
                supabase.url.clone(),
                supabase.anon_key.clone(),
                config.callback_url(),
            ))
        }
        None => {
            warn!("SUPABASE_URL or SUPABASE_ANON_KEY is missing; bookmark endpoints will be unavailable");
            None
        }
    };

    // --- 3. Build the Shared AppState ---
    let app_state = Arc::new(AppState::new(config.clone(), supabase));

    // --- 4. Create the Web Router ---
    let app = build_router(app_state);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
