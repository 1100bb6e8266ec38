// src/config.rs

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;

/// Test result pipeline defaults.
pub const DEFAULT_RESULTS_DIR: &str = "./test_result";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_POLL_ERROR_QUOTA: u32 = 4;
pub const DEFAULT_PRIMARY_WORKERS: usize = 4;
pub const DEFAULT_RETRY_WORKERS: usize = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_RETRY_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
pub const DEFAULT_BOOTSTRAP_WAIT_SECS: u64 = 30;
pub const DEFAULT_RESULTS_CLAIM_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Session timers and cached form content live here.
    pub redis_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub bind_addr: String,

    /// Base URL of the form provider API (e.g. `https://forms.googleapis.com`).
    pub forms_api_base: String,
    /// Base URL of the drive change feed API.
    pub drive_api_base: String,
    pub forms_api_token: Option<String>,

    pub mail_api_url: String,
    pub mail_api_key: Option<String>,
    pub mail_from: String,

    pub results_dir: PathBuf,
    pub bootstrap_wait_secs: u64,

    pub poll_interval_secs: u64,
    pub poll_error_quota: u32,
    /// A result run claimed longer ago than this is presumed dead and may be retaken.
    pub results_claim_timeout_secs: u64,

    pub primary_workers: usize,
    pub retry_workers: usize,
    pub queue_capacity: usize,
    pub retry_queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let redis_url = env::var("REDIS_URL").expect("REDIS_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let forms_api_base = env::var("FORMS_API_BASE").expect("FORMS_API_BASE must be set");

        let mail_api_url = env::var("MAIL_API_URL").expect("MAIL_API_URL must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            redis_url,
            jwt_secret,
            rust_log,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            drive_api_base: env::var("DRIVE_API_BASE")
                .unwrap_or_else(|_| "https://www.googleapis.com".to_string()),
            forms_api_base,
            forms_api_token: env::var("FORMS_API_TOKEN").ok(),
            mail_api_url,
            mail_api_key: env::var("MAIL_API_KEY").ok(),
            mail_from: env::var("MAIL_FROM").unwrap_or_else(|_| "results@localhost".to_string()),
            results_dir: env::var("RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_RESULTS_DIR)),
            bootstrap_wait_secs: parse_or("BOOTSTRAP_WAIT_SECS", DEFAULT_BOOTSTRAP_WAIT_SECS),
            poll_interval_secs: parse_or("RESULT_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS),
            poll_error_quota: parse_or("RESULT_POLL_ERROR_QUOTA", DEFAULT_POLL_ERROR_QUOTA),
            results_claim_timeout_secs: parse_or(
                "RESULTS_CLAIM_TIMEOUT_SECS",
                DEFAULT_RESULTS_CLAIM_TIMEOUT_SECS,
            ),
            primary_workers: parse_or("PUBLISH_PRIMARY_WORKERS", DEFAULT_PRIMARY_WORKERS),
            retry_workers: parse_or("PUBLISH_RETRY_WORKERS", DEFAULT_RETRY_WORKERS),
            queue_capacity: parse_or("PUBLISH_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY),
            retry_queue_capacity: parse_or(
                "PUBLISH_RETRY_QUEUE_CAPACITY",
                DEFAULT_RETRY_QUEUE_CAPACITY,
            ),
            max_attempts: parse_or("PUBLISH_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
            retry_backoff_ms: parse_or("PUBLISH_RETRY_BACKOFF_MS", DEFAULT_RETRY_BACKOFF_MS),
        }
    }

    /// Configuration for tests and local runs; points every collaborator at localhost.
    pub fn for_tests(results_dir: PathBuf) -> Self {
        Self {
            database_url: "postgres://localhost/assessment".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            jwt_secret: "test_secret_for_integration_tests".to_string(),
            rust_log: "error".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            forms_api_base: "http://127.0.0.1:9".to_string(),
            drive_api_base: "http://127.0.0.1:9".to_string(),
            forms_api_token: None,
            mail_api_url: "http://127.0.0.1:9/send".to_string(),
            mail_api_key: None,
            mail_from: "results@localhost".to_string(),
            results_dir,
            bootstrap_wait_secs: 2,
            poll_interval_secs: 1,
            poll_error_quota: DEFAULT_POLL_ERROR_QUOTA,
            results_claim_timeout_secs: DEFAULT_RESULTS_CLAIM_TIMEOUT_SECS,
            primary_workers: 2,
            retry_workers: 1,
            queue_capacity: 8,
            retry_queue_capacity: 4,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_backoff_ms: 1,
        }
    }

    pub fn bootstrap_wait(&self) -> Duration {
        Duration::from_secs(self.bootstrap_wait_secs)
    }

    pub fn results_claim_timeout(&self) -> Duration {
        Duration::from_secs(self.results_claim_timeout_secs)
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
