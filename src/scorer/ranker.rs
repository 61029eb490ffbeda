use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::collaborators::{with_timeout, RankEntry, Ranker};
use crate::types::{EnrichedEvent, RankedEvent};

#[derive(Debug)]
pub struct RankOutcome {
    /// One record per input event, in input order.
    pub events: Vec<RankedEvent>,
    /// False when the ranker failed and the batch passed through unscored.
    pub scored: bool,
}

/// Score the whole batch with a single ranker call.
///
/// Entries are matched back to events by `index`. A failed call degrades the
/// entire batch to unscored pass-through (score 0) in input order; an event
/// the ranker skipped is passed through unscored on its own.
pub async fn rank_batch(
    ranker: &dyn Ranker,
    enriched: Vec<EnrichedEvent>,
    timeout: Duration,
    latency: &LatencyStats,
) -> RankOutcome {
    if enriched.is_empty() {
        return RankOutcome { events: Vec::new(), scored: true };
    }

    let started = Instant::now();
    let result = with_timeout("ranker", timeout, ranker.rank(&enriched)).await;
    latency.record(started.elapsed());

    match result {
        Ok(entries) => RankOutcome {
            events: apply_rankings(enriched, entries),
            scored: true,
        },
        Err(e) => {
            warn!(
                batch = enriched.len(),
                "ranker failed, passing batch through unscored: {e}"
            );
            RankOutcome {
                events: enriched.into_iter().map(RankedEvent::unscored).collect(),
                scored: false,
            }
        }
    }
}

fn apply_rankings(enriched: Vec<EnrichedEvent>, entries: Vec<RankEntry>) -> Vec<RankedEvent> {
    let len = enriched.len();
    let mut by_index: HashMap<usize, RankEntry> = HashMap::new();
    for entry in entries {
        match usize::try_from(entry.index) {
            Ok(idx) if idx < len => {
                by_index.entry(idx).or_insert(entry);
            }
            _ => debug!(index = entry.index, "dropping ranking for unknown index"),
        }
    }

    let missing = len - by_index.len();
    if missing > 0 {
        warn!(missing, "ranker skipped {missing} events, passing them through unscored");
    }

    enriched
        .into_iter()
        .enumerate()
        .map(|(i, e)| match by_index.remove(&i) {
            Some(entry) => scored(e, entry),
            None => RankedEvent::unscored(e),
        })
        .collect()
}

fn scored(e: EnrichedEvent, entry: RankEntry) -> RankedEvent {
    let headline = non_empty(entry.headline).unwrap_or_else(|| e.event.market_question.clone());
    let description = non_empty(entry.description).unwrap_or_else(|| e.event.summary());
    RankedEvent {
        event: e.event,
        context: e.context,
        interest_score: clamp_score(entry.interest_score),
        headline,
        description,
        image_prompt: entry.image_prompt.and_then(non_empty),
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Scores land in 1..=10; non-finite values count as the minimum.
fn clamp_score(score: f64) -> u8 {
    if score.is_finite() {
        score.round().clamp(1.0, 10.0) as u8
    } else {
        1
    }
}

/// Ascending sort by score, keeping the `max_posts` highest. The result is in
/// publication order: the last element ends up at the head of the queue.
///
/// Equal scores rank earlier batch positions higher, so an unscored batch
/// keeps its first `max_posts` events and the batch head lands at the queue head.
pub fn select_top(ranked: Vec<RankedEvent>, max_posts: usize) -> Vec<RankedEvent> {
    let mut indexed: Vec<(usize, RankedEvent)> = ranked.into_iter().enumerate().collect();
    indexed.sort_by_key(|(i, r)| (r.interest_score, Reverse(*i)));
    let cut = indexed.len().saturating_sub(max_posts);
    let top: Vec<RankedEvent> = indexed.into_iter().skip(cut).map(|(_, r)| r).collect();
    info!(
        kept = top.len(),
        dropped = cut,
        best = top.last().map(|r| r.interest_score),
        "selected top ranked events"
    );
    top
}
