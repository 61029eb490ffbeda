use std::time::Duration;

use crate::error::{AppError, Result};

pub const REGISTRY_API_URL: &str = "http://localhost:8080";

/// A YES price move at or above this percentage emits a `PriceChange`.
pub const PRICE_CHANGE_THRESHOLD_PCT: f64 = 20.0;

/// Maximum number of serialized stories kept in the event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Pipeline run interval (seconds).
pub const RUN_INTERVAL_SECS: u64 = 300;

/// Timeout applied to every external collaborator call (seconds).
pub const COLLABORATOR_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Market Detail Fetch base URL (REGISTRY_API_URL)
    pub registry_api_url: String,
    /// Optional collaborator endpoints. Unset falls back to the rule-based stand-ins.
    pub classifier_url: Option<String>,
    pub selector_url: Option<String>,
    pub enricher_url: Option<String>,
    pub ranker_url: Option<String>,
    pub run_interval_secs: u64,
    /// Perform a single pipeline run and exit (RUN_ONCE)
    pub run_once: bool,
    /// Pre-filter bound before enrichment (MAX_NEW_EVENTS)
    pub max_new_events: usize,
    /// Ranked events retained per run (MAX_POSTS)
    pub max_posts: usize,
    pub queue_capacity: usize,
    /// Markets diffed in parallel; 1 keeps the sequential reference ordering (DIFF_CONCURRENCY)
    pub diff_concurrency: usize,
    pub enrich_concurrency: usize,
    pub collaborator_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            db_path: "newsroom.db".to_string(),
            api_port: 3000,
            registry_api_url: REGISTRY_API_URL.to_string(),
            classifier_url: None,
            selector_url: None,
            enricher_url: None,
            ranker_url: None,
            run_interval_secs: RUN_INTERVAL_SECS,
            run_once: false,
            max_new_events: 10,
            max_posts: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            diff_concurrency: 1,
            enrich_concurrency: 4,
            collaborator_timeout: Duration::from_secs(COLLABORATOR_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            registry_api_url: std::env::var("REGISTRY_API_URL")
                .unwrap_or(defaults.registry_api_url),
            classifier_url: optional_url("CLASSIFIER_URL"),
            selector_url: optional_url("SELECTOR_URL"),
            enricher_url: optional_url("ENRICHER_URL"),
            ranker_url: optional_url("RANKER_URL"),
            run_interval_secs: std::env::var("RUN_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.run_interval_secs),
            run_once: std::env::var("RUN_ONCE")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            max_new_events: positive("MAX_NEW_EVENTS", defaults.max_new_events)?,
            max_posts: positive("MAX_POSTS", defaults.max_posts)?,
            queue_capacity: positive("QUEUE_CAPACITY", defaults.queue_capacity)?,
            diff_concurrency: positive("DIFF_CONCURRENCY", defaults.diff_concurrency)?,
            enrich_concurrency: positive("ENRICH_CONCURRENCY", defaults.enrich_concurrency)?,
            collaborator_timeout: Duration::from_secs(
                std::env::var("COLLABORATOR_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(COLLABORATOR_TIMEOUT_SECS),
            ),
        })
    }
}

fn optional_url(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
}

/// Bounds and concurrency limits must be at least 1.
fn positive(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(AppError::Config(format!("{key} must be a positive integer, got {raw:?}"))),
        },
    }
}
