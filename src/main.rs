// src/main.rs

use std::sync::Arc;
use std::time::Duration;

use assessment::cache::RedisCache;
use assessment::clients::{forms::FormsClient, mailer::HttpMailer};
use assessment::config::Config;
use assessment::repository::PgRepository;
use assessment::routes;
use assessment::state::AppState;
use assessment::utils::sink::ErrorSink;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env();

    let file_appender = tracing_appender::rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    // Initialize Database Pool with Retry
    let mut retry_count = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to database after 5 retries: {}", e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Migrations applied successfully.");

    // Initialize Redis with Retry
    let mut retry_count = 0;
    let cache = loop {
        match RedisCache::connect(&config.redis_url).await {
            Ok(cache) => break cache,
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    panic!("Failed to connect to Redis after 5 retries: {}", e);
                }
                tracing::warn!("Redis not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    };

    tracing::info!("Redis connected...");

    // External collaborators
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");
    let provider = FormsClient::new(
        http.clone(),
        &config.forms_api_base,
        &config.drive_api_base,
        config.forms_api_token.clone(),
    )
    .expect("Invalid form provider configuration");
    let mailer = HttpMailer::new(
        http,
        &config.mail_api_url,
        config.mail_api_key.clone(),
        config.mail_from.clone(),
    )
    .expect("Invalid mail API configuration");

    let (sink, _reporter) = ErrorSink::spawn_reporter();

    // Create AppState
    let state = AppState::new(
        config.clone(),
        Arc::new(PgRepository::new(pool)),
        Arc::new(cache),
        Arc::new(provider),
        Arc::new(mailer),
        sink,
    );

    // Background result pipeline
    let poller = state.poller().spawn();
    tokio::spawn(async move {
        match poller.await {
            Ok(Err(e)) => tracing::error!("Result poller stopped: {}", e),
            Err(e) => tracing::error!("Result poller panicked: {}", e),
            Ok(Ok(())) => {}
        }
    });

    // Create the Axum application router
    let app = routes::create_router(state);

    // Bind to the listening address
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind listening address");
    tracing::info!("Listening on {}", config.bind_addr);

    // Start the server
    axum::serve(listener, app).await.expect("Server error");
}
