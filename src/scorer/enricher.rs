use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{stream, StreamExt};
use tracing::{debug, info, warn};

use crate::api::latency::LatencyStats;
use crate::collaborators::{with_timeout, ContextSearch};
use crate::types::{EnrichedEvent, EventKind, NewsEvent};

/// Attaches contextual search results to each event.
///
/// Calls run with at most `concurrency` in flight. Output has the same length
/// and order as the input; a failed lookup leaves `context` empty.
pub struct Enricher {
    search: Arc<dyn ContextSearch>,
    concurrency: usize,
    timeout: Duration,
    latency: Arc<LatencyStats>,
}

impl Enricher {
    pub fn new(
        search: Arc<dyn ContextSearch>,
        concurrency: usize,
        timeout: Duration,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            search,
            concurrency: concurrency.max(1),
            timeout,
            latency,
        }
    }

    pub async fn enrich(&self, events: Vec<NewsEvent>) -> Vec<EnrichedEvent> {
        let total = events.len();
        let enriched: Vec<EnrichedEvent> = stream::iter(events)
            .map(|event| self.enrich_one(event))
            .buffered(self.concurrency)
            .collect()
            .await;

        let with_context = enriched.iter().filter(|e| e.context.is_some()).count();
        info!(total, with_context, "enrichment complete: {with_context}/{total} events have context");
        enriched
    }

    async fn enrich_one(&self, event: NewsEvent) -> EnrichedEvent {
        let query = context_query(&event);
        let started = Instant::now();
        let result = with_timeout("context search", self.timeout, self.search.search(&query)).await;
        self.latency.record(started.elapsed());

        let context = match result {
            Ok(context) => context,
            Err(e) => {
                warn!(market_id = event.market_id, "enrichment failed, continuing without context: {e}");
                None
            }
        };
        debug!(market_id = event.market_id, found = context.is_some(), "enriched");
        EnrichedEvent { event, context }
    }
}

/// Search query built from the event's kind-specific fields.
pub fn context_query(event: &NewsEvent) -> String {
    let q = &event.market_question;
    let mut query = match &event.kind {
        EventKind::New { .. } => format!("{q} new prediction market background"),
        EventKind::StatusChange { status_text, .. } => {
            format!("{q} outcome {status_text} resolution")
        }
        EventKind::PriceChange { direction, percent_change, .. } => {
            format!("{q} latest news odds moved {direction} {percent_change:.0}%")
        }
    };
    if let Some(info) = &event.additional_info {
        query.push_str(" | ");
        query.push_str(info);
    }
    query
}
