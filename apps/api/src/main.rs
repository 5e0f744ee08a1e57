mod automation;
mod config;
mod db;
mod driver;
mod errors;
mod models;
mod profile;
mod routes;
mod state;
mod storage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::automation::heuristics::HeuristicTables;
use crate::automation::retry::RetryPolicy;
use crate::automation::session::{AutomationService, AutomationSettings};
use crate::config::Config;
use crate::db::create_pool;
use crate::driver::webdriver::WebDriverFactory;
use crate::profile::PgProfileStore;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::S3Storage;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting AutoApply API v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (runs migrations)
    let db = create_pool(&config.database_url).await?;

    // S3 / MinIO: checkpoints and résumés
    let s3 = build_s3_client(&config).await;
    let storage = Arc::new(S3Storage::new(
        s3,
        config.s3_bucket.clone(),
        config.artifact_url_ttl,
    ));
    info!("S3 client initialized (bucket: {})", config.s3_bucket);

    // Heuristic tables: built-in unless overridden from a file
    let tables = match &config.heuristics_path {
        Some(path) => {
            info!("Loading heuristic tables from {}", path.display());
            HeuristicTables::from_json_file(path)?
        }
        None => HeuristicTables::default(),
    };

    // Browser sessions
    let drivers = Arc::new(WebDriverFactory::new(
        config.webdriver_url.clone(),
        config.webdriver_headless,
    ));
    info!(
        "WebDriver endpoint: {} (headless: {})",
        config.webdriver_url, config.webdriver_headless
    );

    let automation = AutomationService::new(
        drivers,
        Arc::new(PgProfileStore::new(db.clone())),
        storage.clone(),
        storage,
        Arc::new(tables),
        AutomationSettings {
            default_country: config.default_country.clone(),
            option_retry: RetryPolicy::new(config.option_retry_attempts, config.option_retry_backoff),
            settle: config.submit_settle,
        },
    );

    let state = AppState { db, automation };

    let app = build_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "autoapply-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    let s3_config = aws_sdk_s3::config::Builder::from(&s3_config)
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(s3_config)
}
