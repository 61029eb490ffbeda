use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{stream, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::collaborators::{with_timeout, Collaborators};
use crate::config::Config;
use crate::db::QueueWriter;
use crate::detector::{dedupe, DiffContext, MarketDiffer};
use crate::error::Result;
use crate::scorer::{pre_filter, rank_batch, select_top, Enricher};
use crate::store::SnapshotStore;
use crate::types::{now_ms, NewsEvent};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_new_events: usize,
    pub max_posts: usize,
    pub queue_capacity: usize,
    pub diff_concurrency: usize,
    pub enrich_concurrency: usize,
    pub collaborator_timeout: Duration,
}

impl From<&Config> for PipelineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            max_new_events: cfg.max_new_events,
            max_posts: cfg.max_posts,
            queue_capacity: cfg.queue_capacity,
            diff_concurrency: cfg.diff_concurrency,
            enrich_concurrency: cfg.enrich_concurrency,
            collaborator_timeout: cfg.collaborator_timeout,
        }
    }
}

/// Counters for one run. Every stage's output size is recorded so a degraded
/// run is visible in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub store_unavailable: bool,
    /// Another run held the run-lock; nothing was done.
    pub skipped_concurrent: bool,
    pub reconciled: usize,
    pub markets_scanned: u64,
    pub raw_events: usize,
    pub deduped_events: usize,
    pub selected_events: usize,
    pub enriched_events: usize,
    pub ranked: bool,
    pub queued: usize,
    pub skipped_posted: usize,
}

/// Differ → dedup → pre-filter → enrich → rank → queue, over the injected
/// store and collaborators.
///
/// Runs are serialised by an internal run-lock; a run that finds the lock
/// held returns immediately. Separate processes sharing one store still need
/// an external scheduler lock.
pub struct Pipeline {
    store: Arc<dyn SnapshotStore>,
    collab: Collaborators,
    settings: PipelineSettings,
    differ: MarketDiffer,
    enricher: Enricher,
    writer: QueueWriter,
    latency: Arc<LatencyStats>,
    health: Arc<HealthState>,
    clock: fn() -> i64,
    run_lock: Mutex<()>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        collab: Collaborators,
        settings: PipelineSettings,
        latency: Arc<LatencyStats>,
        health: Arc<HealthState>,
    ) -> Self {
        let differ = MarketDiffer::new(
            Arc::clone(&store),
            Arc::clone(&collab.source),
            Arc::clone(&collab.classifier),
            settings.collaborator_timeout,
        );
        let enricher = Enricher::new(
            Arc::clone(&collab.search),
            settings.enrich_concurrency,
            settings.collaborator_timeout,
            Arc::clone(&latency),
        );
        let writer = QueueWriter::new(Arc::clone(&store), settings.queue_capacity);
        Self {
            store,
            collab,
            settings,
            differ,
            enricher,
            writer,
            latency,
            health,
            clock: now_ms,
            run_lock: Mutex::new(()),
        }
    }

    /// Replace the wall clock used to stamp snapshots and events.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Run on a fixed period. Missed ticks are skipped, never queued up.
    pub async fn run(self: Arc<Self>, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    pub async fn run_once(&self) -> RunReport {
        let Ok(_guard) = self.run_lock.try_lock() else {
            warn!("previous pipeline run still in progress, skipping");
            return RunReport { skipped_concurrent: true, ..Default::default() };
        };

        let started = Instant::now();
        let mut report = RunReport::default();

        if let Err(e) = self.store.ping().await {
            error!("store unavailable, skipping run: {e}");
            self.health.set_store_ok(false);
            report.store_unavailable = true;
            return report;
        }
        self.health.set_store_ok(true);

        if let Err(e) = self.execute(&mut report).await {
            error!("pipeline run aborted: {e}");
        }

        self.health.record_run((self.clock)(), report.queued, report.ranked);
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            markets = report.markets_scanned,
            raw = report.raw_events,
            deduped = report.deduped_events,
            selected = report.selected_events,
            enriched = report.enriched_events,
            ranked = report.ranked,
            queued = report.queued,
            skipped_posted = report.skipped_posted,
            "Pipeline run complete: {} markets, {} raw events, {} queued",
            report.markets_scanned,
            report.raw_events,
            report.queued,
        );
        report
    }

    async fn execute(&self, report: &mut RunReport) -> Result<()> {
        let timeout = self.settings.collaborator_timeout;

        match self.store.reconcile().await {
            Ok(0) => {}
            Ok(n) => {
                warn!(repaired = n, "reconciled {n} markets present in both partitions");
                report.reconciled = n;
            }
            Err(e) => warn!("reconcile failed, continuing: {e}"),
        }

        let ctx = DiffContext {
            highest_seen: self.store.highest_market_id().await?,
            observed_at: (self.clock)(),
        };
        let total = with_timeout("market count", timeout, self.collab.source.market_count()).await?;
        report.markets_scanned = total;

        let per_market: Vec<Vec<NewsEvent>> = stream::iter(0..total)
            .map(|id| self.differ.diff(id, ctx))
            .buffered(self.settings.diff_concurrency.max(1))
            .collect()
            .await;
        let raw: Vec<NewsEvent> = per_market.into_iter().flatten().collect();
        report.raw_events = raw.len();
        if raw.is_empty() {
            report.ranked = true;
            return Ok(());
        }

        let deduped = dedupe(raw);
        report.deduped_events = deduped.len();

        let selected = pre_filter(
            self.collab.selector.as_ref(),
            deduped,
            self.settings.max_new_events,
            timeout,
        )
        .await;
        report.selected_events = selected.len();

        let enriched = self.enricher.enrich(selected).await;
        report.enriched_events = enriched.iter().filter(|e| e.context.is_some()).count();

        let outcome = rank_batch(self.collab.ranker.as_ref(), enriched, timeout, &self.latency).await;
        report.ranked = outcome.scored;

        let top = select_top(outcome.events, self.settings.max_posts);
        let published = self.writer.publish(&top).await;
        report.queued = published.queued;
        report.skipped_posted = published.skipped_posted;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use crate::collaborators::rules::{HeuristicRanker, KeywordClassifier, NoContext, PrioritySelector};
    use crate::collaborators::{MarketSource, RankEntry, Ranker, Selector};
    use crate::error::AppError;
    use crate::store::{MemoryStore, Partition};
    use crate::types::{
        Category, EnrichedEvent, EventType, MarketDetail, MarketId, MarketSnapshot, MarketStatus,
        OutcomePrices, PostedRecord, RankedEvent,
    };

    const T0: i64 = 1_700_000_000_000;

    fn fixed_clock() -> i64 {
        T0
    }

    /// Registry double keyed by id: (status code, yes price). Optional delay per fetch.
    struct Registry {
        markets: StdMutex<HashMap<MarketId, (u8, f64)>>,
        delay: Duration,
    }

    impl Registry {
        fn new(markets: &[(MarketId, u8, f64)]) -> Self {
            Self {
                markets: StdMutex::new(markets.iter().map(|&(id, s, p)| (id, (s, p))).collect()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MarketSource for Registry {
        async fn market_count(&self) -> Result<u64> {
            let markets = self.markets.lock().unwrap();
            Ok(markets.keys().max().map_or(0, |m| m + 1))
        }

        async fn fetch_market(&self, id: MarketId) -> Result<MarketDetail> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let (status, yes) = *self
                .markets
                .lock()
                .unwrap()
                .get(&id)
                .ok_or_else(|| AppError::Collaborator(format!("no market {id}")))?;
            Ok(MarketDetail {
                market_address: format!("0x{id:x}"),
                question: format!("Will the election in district {id} flip?"),
                status_code: Some(status),
                status_text: None,
                prices: OutcomePrices { yes, no: 1.0 - yes },
                tvl: 1_000.0 * (id as f64 + 1.0),
                tokens: vec!["YES".to_string(), "NO".to_string()],
                additional_info: None,
            })
        }
    }

    struct FailingSelector;

    #[async_trait]
    impl Selector for FailingSelector {
        async fn select(&self, _events: &[NewsEvent], _k: usize) -> Result<Vec<i64>> {
            Err(AppError::Collaborator("selector model unavailable".to_string()))
        }
    }

    /// Fails every call and remembers the market ids it was asked to rank.
    #[derive(Default)]
    struct FailingRanker {
        seen: StdMutex<Vec<MarketId>>,
    }

    #[async_trait]
    impl Ranker for FailingRanker {
        async fn rank(&self, events: &[EnrichedEvent]) -> Result<Vec<RankEntry>> {
            self.seen.lock().unwrap().extend(events.iter().map(|e| e.event.market_id));
            Err(AppError::Collaborator("ranker timed out".to_string()))
        }
    }

    fn stored(id: MarketId, status: MarketStatus, yes: f64) -> MarketSnapshot {
        MarketSnapshot {
            market_id: id,
            market_address: format!("0x{id:x}"),
            question: format!("Will the election in district {id} flip?"),
            status_code: status,
            yes_price: yes,
            no_price: 1.0 - yes,
            tvl: 1_000.0,
            category: Category::Politics,
            additional_info: None,
            updated_at: T0 - 300_000,
        }
    }

    fn collaborators(
        registry: Arc<Registry>,
        selector: Arc<dyn Selector>,
        ranker: Arc<dyn Ranker>,
    ) -> Collaborators {
        Collaborators {
            source: registry,
            classifier: Arc::new(KeywordClassifier),
            selector,
            search: Arc::new(NoContext),
            ranker,
        }
    }

    fn settings(max_new_events: usize, max_posts: usize) -> PipelineSettings {
        PipelineSettings {
            max_new_events,
            max_posts,
            queue_capacity: 1000,
            diff_concurrency: 1,
            enrich_concurrency: 2,
            collaborator_timeout: Duration::from_secs(5),
        }
    }

    fn pipeline(store: Arc<MemoryStore>, collab: Collaborators, settings: PipelineSettings) -> Pipeline {
        Pipeline::new(
            store,
            collab,
            settings,
            Arc::new(LatencyStats::new()),
            Arc::new(HealthState::new()),
        )
        .with_clock(fixed_clock)
    }

    async fn queue(store: &MemoryStore) -> Vec<RankedEvent> {
        store
            .queued_events(1000)
            .await
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn end_to_end_run_queues_best_story_at_head() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_active(&stored(0, MarketStatus::Open, 0.30)).await.unwrap();
        store.upsert_active(&stored(1, MarketStatus::Open, 0.50)).await.unwrap();
        store.upsert_active(&stored(2, MarketStatus::Open, 0.60)).await.unwrap();
        // 0: +50% swing, 1: finalized, 2: flat, 3: brand new.
        let registry = Arc::new(Registry::new(&[(0, 0, 0.45), (1, 7, 0.50), (2, 0, 0.61), (3, 0, 0.5)]));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store.clone(), collab, settings(10, 5));

        let report = p.run_once().await;

        assert_eq!(report.markets_scanned, 4);
        assert_eq!(report.raw_events, 3);
        assert!(report.ranked);
        assert_eq!(report.queued, 3);

        let queued = queue(&store).await;
        assert_eq!(queued[0].event.market_id, 1, "finalization is the top story");
        assert_eq!(queued[0].event.event_type(), EventType::StatusChange);
        assert!(queued.windows(2).all(|w| w[0].interest_score >= w[1].interest_score));
        assert!(queued.iter().all(|r| r.event.timestamp == T0));

        assert!(store.contains(Partition::Finalized, 1).await.unwrap());
        assert!(!store.contains(Partition::Active, 1).await.unwrap());
        assert!(store.contains(Partition::Active, 3).await.unwrap());
    }

    #[tokio::test]
    async fn second_run_over_unchanged_registry_is_quiet() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_active(&stored(0, MarketStatus::Open, 0.30)).await.unwrap();
        let registry = Arc::new(Registry::new(&[(0, 2, 0.45), (1, 0, 0.5)]));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store.clone(), collab, settings(10, 5));

        let first = p.run_once().await;
        assert_eq!(first.queued, 2);

        let second = p.run_once().await;
        assert_eq!(second.raw_events, 0);
        assert_eq!(second.queued, 0);
        assert_eq!(store.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn status_and_price_for_same_market_queue_only_status() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_active(&stored(0, MarketStatus::Open, 0.30)).await.unwrap();
        let registry = Arc::new(Registry::new(&[(0, 2, 0.90)]));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store.clone(), collab, settings(10, 5));

        let report = p.run_once().await;

        assert_eq!(report.raw_events, 2);
        assert_eq!(report.deduped_events, 1);
        let queued = queue(&store).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].event.event_type(), EventType::StatusChange);
    }

    #[tokio::test]
    async fn selector_failure_truncates_to_first_k() {
        // Empty store: every market is new, eight events, none conflicting.
        let store = Arc::new(MemoryStore::new());
        let markets: Vec<(MarketId, u8, f64)> = (0..8).map(|id| (id, 0, 0.5)).collect();
        let registry = Arc::new(Registry::new(&markets));
        let ranker = Arc::new(FailingRanker::default());
        let collab = collaborators(registry, Arc::new(FailingSelector), ranker.clone());
        let p = pipeline(store.clone(), collab, settings(5, 10));

        let report = p.run_once().await;

        assert_eq!(report.raw_events, 8);
        assert_eq!(report.selected_events, 5);
        assert_eq!(*ranker.seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn ranker_failure_still_queues_everything_unscored() {
        let store = Arc::new(MemoryStore::new());
        for id in 0..3 {
            store.upsert_active(&stored(id, MarketStatus::Open, 0.5)).await.unwrap();
        }
        let registry = Arc::new(Registry::new(&[(0, 2, 0.5), (1, 2, 0.5), (2, 2, 0.5)]));
        let collab =
            collaborators(registry, Arc::new(PrioritySelector), Arc::new(FailingRanker::default()));
        let p = pipeline(store.clone(), collab, settings(10, 5));

        let report = p.run_once().await;

        assert!(!report.ranked);
        assert_eq!(report.queued, 3);
        let queued = queue(&store).await;
        assert!(queued.iter().all(|r| r.interest_score == 0));
        // Unscored stories keep batch order from the queue head.
        let ids: Vec<_> = queued.iter().map(|r| r.event.market_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn ranker_failure_keeps_status_change_over_new_markets() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_active(&stored(0, MarketStatus::Open, 0.5)).await.unwrap();
        let mut markets: Vec<(MarketId, u8, f64)> = vec![(0, 7, 0.5)];
        markets.extend((1..8).map(|id| (id, 0, 0.5)));
        let registry = Arc::new(Registry::new(&markets));
        let collab =
            collaborators(registry, Arc::new(PrioritySelector), Arc::new(FailingRanker::default()));
        let p = pipeline(store.clone(), collab, settings(10, 3));

        let report = p.run_once().await;

        assert_eq!(report.raw_events, 8);
        assert!(!report.ranked);
        assert_eq!(report.queued, 3);
        let queued = queue(&store).await;
        let head: Vec<_> = queued.iter().map(|r| (r.event.market_id, r.event.event_type())).collect();
        assert_eq!(
            head,
            vec![(0, EventType::StatusChange), (1, EventType::New), (2, EventType::New)]
        );
    }

    #[tokio::test]
    async fn posted_ledger_blocks_rediscovered_story() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_active(&stored(42, MarketStatus::Open, 0.5)).await.unwrap();
        store
            .record_posted(&PostedRecord { market_id: 42, timestamp: T0, event_type: EventType::StatusChange })
            .await
            .unwrap();
        let registry = Arc::new(Registry::new(&[(42, 2, 0.5)]));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store.clone(), collab, settings(10, 5));

        let report = p.run_once().await;

        assert_eq!(report.deduped_events, 1);
        assert_eq!(report.skipped_posted, 1);
        assert_eq!(report.queued, 0);
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unavailable_store_makes_run_a_noop() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let registry = Arc::new(Registry::new(&[(0, 7, 0.5)]));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let health = Arc::new(HealthState::new());
        let p = Pipeline::new(
            store.clone(),
            collab,
            settings(10, 5),
            Arc::new(LatencyStats::new()),
            health.clone(),
        );

        let report = p.run_once().await;

        assert!(report.store_unavailable);
        assert_eq!(report.markets_scanned, 0);
        assert!(!health.store_ok());
        assert_eq!(health.runs_completed(), 0);
    }

    #[tokio::test]
    async fn max_posts_bounds_queued_stories() {
        let store = Arc::new(MemoryStore::new());
        let markets: Vec<(MarketId, u8, f64)> = (0..6).map(|id| (id, 0, 0.5)).collect();
        let registry = Arc::new(Registry::new(&markets));
        let collab = collaborators(registry, Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store.clone(), collab, settings(10, 2));

        let report = p.run_once().await;

        assert_eq!(report.raw_events, 6);
        assert_eq!(report.queued, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_runs_are_serialised() {
        let store = Arc::new(MemoryStore::new());
        let mut registry = Registry::new(&[(0, 0, 0.5)]);
        registry.delay = Duration::from_secs(1);
        let collab = collaborators(Arc::new(registry), Arc::new(PrioritySelector), Arc::new(HeuristicRanker));
        let p = pipeline(store, collab, settings(10, 5));

        let (a, b) = tokio::join!(p.run_once(), p.run_once());

        assert!(!a.skipped_concurrent);
        assert!(b.skipped_concurrent);
        assert_eq!(a.queued, 1);
    }
}
