use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{CategoryClassifier, ContextSearch, MarketSource, RankEntry, Ranker, Selector};
use crate::error::{AppError, Result};
use crate::types::{Category, EnrichedEvent, MarketDetail, MarketId, NewsEvent, OutcomePrices};

pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.json().await?)
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> Result<Value> {
    let resp = client.post(url).json(body).send().await?.error_for_status()?;
    Ok(resp.json().await?)
}

/// Numbers arrive either as JSON numbers or numeric strings.
fn as_f64_loose(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn as_u64_loose(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

// ---------------------------------------------------------------------------
// Market Detail Fetch
// ---------------------------------------------------------------------------

pub struct HttpMarketSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMarketSource {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MarketSource for HttpMarketSource {
    async fn market_count(&self) -> Result<u64> {
        let url = format!("{}/markets/count", self.base_url);
        let v = get_json(&self.client, &url).await?;
        as_u64_loose(&v)
            .or_else(|| v.get("total").and_then(as_u64_loose))
            .or_else(|| v.get("count").and_then(as_u64_loose))
            .ok_or_else(|| AppError::Collaborator("market count response had no total".to_string()))
    }

    async fn fetch_market(&self, id: MarketId) -> Result<MarketDetail> {
        let url = format!("{}/markets/{}", self.base_url, id);
        let v = get_json(&self.client, &url).await?;
        parse_market_detail(&v)
    }
}

/// Parse a `{success, ...}` detail envelope. `success: false` becomes an error
/// carrying the service's message.
pub fn parse_market_detail(v: &Value) -> Result<MarketDetail> {
    if v.get("success").and_then(|s| s.as_bool()) == Some(false) {
        let msg = v
            .get("error")
            .and_then(|e| e.as_str())
            .unwrap_or("unknown error")
            .to_string();
        return Err(AppError::Collaborator(msg));
    }

    let market_address = v
        .get("marketAddress")
        .and_then(|a| a.as_str())
        .ok_or_else(|| AppError::Collaborator("detail missing marketAddress".to_string()))?
        .to_string();

    let question = v
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .to_string();

    let status_code = v
        .get("statusCode")
        .and_then(as_u64_loose)
        .and_then(|c| u8::try_from(c).ok());
    let status_text = v
        .get("statusText")
        .and_then(|s| s.as_str())
        .map(|s| s.to_string());

    let prices = v.get("prices");
    let yes = prices.and_then(|p| p.get("yes")).and_then(as_f64_loose).unwrap_or(0.0);
    let no = prices.and_then(|p| p.get("no")).and_then(as_f64_loose).unwrap_or(0.0);

    let tvl = v.get("tvl").and_then(as_f64_loose).unwrap_or(0.0);

    let tokens = v
        .get("tokens")
        .and_then(|t| t.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|t| t.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let additional_info = v
        .get("additionalInfo")
        .and_then(|a| a.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty());

    Ok(MarketDetail {
        market_address,
        question,
        status_code,
        status_text,
        prices: OutcomePrices { yes, no },
        tvl,
        tokens,
        additional_info,
    })
}

// ---------------------------------------------------------------------------
// Category classifier
// ---------------------------------------------------------------------------

pub struct HttpCategoryClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpCategoryClassifier {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self { client, url: url.to_string() }
    }
}

#[async_trait]
impl CategoryClassifier for HttpCategoryClassifier {
    async fn classify(&self, question: &str) -> Result<Category> {
        let v = post_json(&self.client, &self.url, &json!({ "question": question })).await?;
        let raw = v
            .get("category")
            .and_then(|c| c.as_str())
            .or_else(|| v.as_str())
            .ok_or_else(|| AppError::Collaborator("classifier returned no category".to_string()))?;
        Ok(Category::parse(raw))
    }
}

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

pub struct HttpSelector {
    client: reqwest::Client,
    url: String,
}

impl HttpSelector {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self { client, url: url.to_string() }
    }
}

#[async_trait]
impl Selector for HttpSelector {
    async fn select(&self, events: &[NewsEvent], k: usize) -> Result<Vec<i64>> {
        let body = json!({ "events": events, "maxCount": k });
        let v = post_json(&self.client, &self.url, &body).await?;
        let list = v
            .get("indices")
            .unwrap_or(&v)
            .as_array()
            .ok_or_else(|| AppError::Collaborator("selector response was not an index list".to_string()))?;
        // Non-integer entries are dropped here; range checks happen in the pre-filter.
        Ok(list.iter().filter_map(|i| i.as_i64()).collect())
    }
}

// ---------------------------------------------------------------------------
// Contextual search
// ---------------------------------------------------------------------------

pub struct HttpContextSearch {
    client: reqwest::Client,
    url: String,
}

impl HttpContextSearch {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self { client, url: url.to_string() }
    }
}

#[async_trait]
impl ContextSearch for HttpContextSearch {
    async fn search(&self, query: &str) -> Result<Option<String>> {
        let v = post_json(&self.client, &self.url, &json!({ "query": query })).await?;
        let context = v
            .get("context")
            .and_then(|c| c.as_str())
            .or_else(|| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        debug!(query, found = context.is_some(), "context search");
        Ok(context)
    }
}

// ---------------------------------------------------------------------------
// Ranker
// ---------------------------------------------------------------------------

pub struct HttpRanker {
    client: reqwest::Client,
    url: String,
}

impl HttpRanker {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self { client, url: url.to_string() }
    }
}

#[async_trait]
impl Ranker for HttpRanker {
    async fn rank(&self, events: &[EnrichedEvent]) -> Result<Vec<RankEntry>> {
        let v = post_json(&self.client, &self.url, &json!({ "events": events })).await?;
        let list = v.get("rankings").cloned().unwrap_or(v);
        Ok(serde_json::from_value(list)?)
    }
}
