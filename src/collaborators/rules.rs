//! Deterministic stand-ins for the model-backed services. They keep the
//! service usable without any external endpoint and give tests stable output.

use async_trait::async_trait;

use super::{CategoryClassifier, ContextSearch, RankEntry, Ranker, Selector};
use crate::error::Result;
use crate::types::{Category, EnrichedEvent, EventKind, MarketStatus, NewsEvent};

pub struct KeywordClassifier;

const KEYWORDS: &[(Category, &[&str])] = &[
    (Category::Crypto, &["bitcoin", " btc", " eth ", "ethereum", "solana", "crypto", "token", "defi"]),
    (Category::Politics, &["election", "president", "senate", "congress", "vote", "governor", "party"]),
    (Category::Sports, &["nba", "nfl", "match", "championship", "cup", "league", "win the", "finals"]),
    (Category::Economics, &[" fed ", "inflation", "cpi", "gdp", "rate cut", "recession", "unemployment"]),
    (Category::Weather, &["temperature", "rain", "snow", "hurricane", "weather"]),
    (Category::Technology, &[" ai ", "openai", "apple", "launch", "release", "spacex"]),
    (Category::Entertainment, &["oscar", "movie", "album", "box office", "grammy", "netflix"]),
];

#[async_trait]
impl CategoryClassifier for KeywordClassifier {
    async fn classify(&self, question: &str) -> Result<Category> {
        let q = format!(" {} ", question.to_lowercase().replace('?', " "));
        let category = KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| q.contains(w)))
            .map(|(c, _)| *c)
            .unwrap_or(Category::Other);
        Ok(category)
    }
}

/// Rough newsworthiness used by both the selector and the ranker:
/// finalization > resolution proposal > large moves > new markets by TVL.
fn priority(event: &NewsEvent) -> f64 {
    match &event.kind {
        EventKind::StatusChange { new_status, .. } => match new_status {
            MarketStatus::Finalized => 9.0,
            _ => 7.0,
        },
        EventKind::PriceChange { percent_change, .. } => {
            (4.0 + percent_change / 25.0).min(8.5)
        }
        EventKind::New { tvl, .. } => (2.0 + (1.0 + tvl.max(0.0)).log10()).min(6.0),
    }
}

pub struct PrioritySelector;

#[async_trait]
impl Selector for PrioritySelector {
    async fn select(&self, events: &[NewsEvent], k: usize) -> Result<Vec<i64>> {
        let mut order: Vec<usize> = (0..events.len()).collect();
        // Stable: equal priorities keep batch order.
        order.sort_by(|&a, &b| priority(&events[b]).total_cmp(&priority(&events[a])));
        Ok(order.into_iter().take(k).map(|i| i as i64).collect())
    }
}

pub struct NoContext;

#[async_trait]
impl ContextSearch for NoContext {
    async fn search(&self, _query: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct HeuristicRanker;

#[async_trait]
impl Ranker for HeuristicRanker {
    async fn rank(&self, events: &[EnrichedEvent]) -> Result<Vec<RankEntry>> {
        Ok(events
            .iter()
            .enumerate()
            .map(|(index, e)| {
                // A found context nudges the score: there is something to say.
                let bonus = if e.context.is_some() { 1.0 } else { 0.0 };
                RankEntry {
                    index: index as i64,
                    interest_score: (priority(&e.event) + bonus).round().clamp(1.0, 10.0),
                    headline: headline(&e.event),
                    description: e.event.summary(),
                    image_prompt: None,
                }
            })
            .collect())
    }
}

fn headline(event: &NewsEvent) -> String {
    match &event.kind {
        EventKind::New { .. } => format!("New market: {}", event.market_question),
        EventKind::StatusChange { status_text, .. } => {
            format!("{}: {}", status_text, event.market_question)
        }
        EventKind::PriceChange { percent_change, direction, .. } => format!(
            "Odds {} {:.0}%: {}",
            direction, percent_change, event.market_question
        ),
    }
}
