use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub webdriver_url: String,
    pub webdriver_headless: bool,
    pub port: u16,
    pub rust_log: String,
    /// Answer for country questions the profile leaves blank.
    pub default_country: String,
    pub option_retry_attempts: u32,
    pub option_retry_backoff: Duration,
    /// Wait between clicking submit and reading the result.
    pub submit_settle: Duration,
    pub artifact_url_ttl: Duration,
    pub heuristics_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            webdriver_url: require_env("WEBDRIVER_URL")?,
            webdriver_headless: parse_env("WEBDRIVER_HEADLESS", true)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            default_country: std::env::var("DEFAULT_COUNTRY")
                .unwrap_or_else(|_| "United States".to_string()),
            option_retry_attempts: parse_env("OPTION_RETRY_ATTEMPTS", 3)?,
            option_retry_backoff: Duration::from_millis(parse_env("OPTION_RETRY_BACKOFF_MS", 250)?),
            submit_settle: Duration::from_millis(parse_env("SUBMIT_SETTLE_MS", 1500)?),
            artifact_url_ttl: Duration::from_secs(parse_env("ARTIFACT_URL_TTL_SECS", 3600)?),
            heuristics_path: std::env::var("HEURISTICS_PATH").ok().map(PathBuf::from),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}
