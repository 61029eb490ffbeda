//! External services the pipeline depends on, expressed as injected strategy
//! traits. `http` talks to real endpoints; `rules` holds deterministic
//! stand-ins used when no endpoint is configured.

pub mod http;
pub mod rules;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::types::{Category, EnrichedEvent, MarketDetail, MarketId, NewsEvent};

/// Market registry reads.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Number of markets; valid ids are `0..count`.
    async fn market_count(&self) -> Result<u64>;

    async fn fetch_market(&self, id: MarketId) -> Result<MarketDetail>;
}

#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    async fn classify(&self, question: &str) -> Result<Category>;
}

/// Interest pre-selector. Returns indices into `events`; callers must
/// tolerate duplicates and out-of-range values.
#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(&self, events: &[NewsEvent], k: usize) -> Result<Vec<i64>>;
}

/// Contextual search used for enrichment. `Ok(None)` means nothing relevant.
#[async_trait]
pub trait ContextSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Option<String>>;
}

/// One scoring decision, matched back to the input batch by `index`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankEntry {
    pub index: i64,
    pub interest_score: f64,
    pub headline: String,
    pub description: String,
    #[serde(default)]
    pub image_prompt: Option<String>,
}

/// Scores and describes a whole batch in one call.
#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank(&self, events: &[EnrichedEvent]) -> Result<Vec<RankEntry>>;
}

/// The full set of collaborators handed to the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn MarketSource>,
    pub classifier: Arc<dyn CategoryClassifier>,
    pub selector: Arc<dyn Selector>,
    pub search: Arc<dyn ContextSearch>,
    pub ranker: Arc<dyn Ranker>,
}

impl Collaborators {
    /// HTTP adapters where an endpoint is configured, rule-based stand-ins otherwise.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let client = http::build_client(cfg.collaborator_timeout)?;

        let classifier: Arc<dyn CategoryClassifier> = match &cfg.classifier_url {
            Some(url) => Arc::new(http::HttpCategoryClassifier::new(client.clone(), url)),
            None => Arc::new(rules::KeywordClassifier),
        };
        let selector: Arc<dyn Selector> = match &cfg.selector_url {
            Some(url) => Arc::new(http::HttpSelector::new(client.clone(), url)),
            None => Arc::new(rules::PrioritySelector),
        };
        let search: Arc<dyn ContextSearch> = match &cfg.enricher_url {
            Some(url) => Arc::new(http::HttpContextSearch::new(client.clone(), url)),
            None => Arc::new(rules::NoContext),
        };
        let ranker: Arc<dyn Ranker> = match &cfg.ranker_url {
            Some(url) => Arc::new(http::HttpRanker::new(client.clone(), url)),
            None => Arc::new(rules::HeuristicRanker),
        };

        Ok(Self {
            source: Arc::new(http::HttpMarketSource::new(client, &cfg.registry_api_url)),
            classifier,
            selector,
            search,
            ranker,
        })
    }
}

/// Bound an external call. Elapsed calls surface as `AppError::Timeout`;
/// nothing is retried.
pub async fn with_timeout<T, F>(what: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{what} after {:.1}s",
            limit.as_secs_f64()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let result: Result<()> = with_timeout("ranker", Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let result = with_timeout("selector", Duration::from_secs(1), async { Ok(3) }).await;
        assert_eq!(result.unwrap(), 3);
    }
}
