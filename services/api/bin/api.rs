//! Main Entrypoint for the Tutorlink API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting the optional database and running migrations.
//! 3. Building the realtime provider and supervisor clients.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tutorlink_api::{
    config::Config, db::Db, provider::HttpRealtimeProvider, router::create_router,
    state::AppState,
};
use tutorlink_core::llm_client::OpenAICompatibleClient;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    if config.openai_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; session creation will fail with provider_unavailable");
    }

    // --- 3. Initialize Shared Services ---
    let provider = Arc::new(HttpRealtimeProvider::from_config(&config));

    let mut openai_config = OpenAIConfig::new();
    if let Some(key) = &config.openai_api_key {
        openai_config = openai_config.with_api_key(key.expose_secret());
    }
    let supervisor = Arc::new(OpenAICompatibleClient::new(
        openai_config,
        config.supervisor_model.clone(),
    ));

    let mut app_state = AppState::new(provider, supervisor);

    // --- 4. Initialize Database ---
    match &config.database_url {
        Some(database_url) => {
            let pool = PgPool::connect(database_url)
                .await
                .context("Failed to connect to database")?;
            let db = Arc::new(Db::new(pool));
            db.run_migrations().await?;
            info!("Database connection established and migrations are up-to-date.");
            app_state = app_state.with_db(db);
        }
        None => info!("DATABASE_URL is not set; session records are disabled."),
    }

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(Arc::new(app_state)).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.realtime_model,
        supervisor_model = %config.supervisor_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
