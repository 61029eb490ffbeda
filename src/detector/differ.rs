use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tracing::{debug, info, warn};

use crate::collaborators::{with_timeout, CategoryClassifier, MarketSource};
use crate::detector::classify;
use crate::error::Result;
use crate::store::{Partition, SnapshotStore};
use crate::types::{Category, MarketId, MarketSnapshot, MarketStatus, NewsEvent};

/// Inputs fixed for the duration of one run.
#[derive(Debug, Clone, Copy)]
pub struct DiffContext {
    /// Highest market id present in either partition when the run started.
    /// `None` means nothing has ever been stored, so every market is new.
    pub highest_seen: Option<MarketId>,
    /// Unix milliseconds stamped on every snapshot and event of the run.
    pub observed_at: i64,
}

impl DiffContext {
    pub fn is_new_market(&self, id: MarketId) -> bool {
        self.highest_seen.map_or(true, |highest| id > highest)
    }
}

/// Compares the registry's current view of a market with its stored snapshot
/// and writes the new snapshot back.
///
/// One differ lives for the whole process, so its in-flight claims hold
/// across runs as well as within one.
pub struct MarketDiffer {
    store: Arc<dyn SnapshotStore>,
    source: Arc<dyn MarketSource>,
    classifier: Arc<dyn CategoryClassifier>,
    timeout: Duration,
    /// Markets with a compare-and-store in progress.
    in_flight: DashSet<MarketId>,
}

/// Releases a market's in-flight claim when the pass ends or is dropped.
struct Claim<'a> {
    set: &'a DashSet<MarketId>,
    id: MarketId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl MarketDiffer {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        source: Arc<dyn MarketSource>,
        classifier: Arc<dyn CategoryClassifier>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source,
            classifier,
            timeout,
            in_flight: DashSet::new(),
        }
    }

    /// Diff one market. Never fails: fetch and store errors are logged and the
    /// market contributes no events this run. A market already claimed by
    /// another pass is skipped.
    pub async fn diff(&self, id: MarketId, ctx: DiffContext) -> Vec<NewsEvent> {
        if !self.in_flight.insert(id) {
            warn!(market_id = id, "diff already in progress for market {id}, skipping");
            return Vec::new();
        }
        let _claim = Claim { set: &self.in_flight, id };

        match self.try_diff(id, ctx).await {
            Ok(events) => events,
            Err(e) => {
                warn!(market_id = id, "diff failed for market {id}: {e}");
                Vec::new()
            }
        }
    }

    async fn try_diff(&self, id: MarketId, ctx: DiffContext) -> Result<Vec<NewsEvent>> {
        // Finalization is terminal: no fetch, no events.
        if self.store.contains(Partition::Finalized, id).await? {
            debug!(market_id = id, "market {id} already finalized");
            return Ok(Vec::new());
        }

        let prev = self.store.get_snapshot(Partition::Active, id).await?;
        let detail = with_timeout("market fetch", self.timeout, self.source.fetch_market(id)).await?;

        let category = match &prev {
            Some(p) => p.category,
            None => self.categorize(id, &detail.question).await,
        };

        let curr = MarketSnapshot {
            market_id: id,
            market_address: detail.market_address.clone(),
            question: detail.question.clone(),
            status_code: detail.status(),
            yes_price: detail.prices.yes,
            no_price: detail.prices.no,
            tvl: detail.tvl,
            category,
            additional_info: detail.additional_info.clone(),
            updated_at: ctx.observed_at,
        };

        let events = classify(prev.as_ref(), &curr, ctx.is_new_market(id));

        if curr.status_code == MarketStatus::Finalized {
            self.store.finalize(&curr).await?;
            info!(market_id = id, "market {id} finalized, moved to finalized partition");
        } else {
            self.store.upsert_active(&curr).await?;
        }

        Ok(events)
    }

    async fn categorize(&self, id: MarketId, question: &str) -> Category {
        match with_timeout("category classifier", self.timeout, self.classifier.classify(question))
            .await
        {
            Ok(category) => category,
            Err(e) => {
                warn!(market_id = id, "category classification failed, using Other: {e}");
                Category::Other
            }
        }
    }
}
