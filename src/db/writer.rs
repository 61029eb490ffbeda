use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::store::SnapshotStore;
use crate::types::RankedEvent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub queued: usize,
    pub skipped_posted: usize,
    pub failed: usize,
    /// Queue length after the last successful insert.
    pub queue_len: Option<usize>,
}

/// Writes ranked stories into the bounded event queue, consulting the posted
/// ledger first so an already-published story is never queued again.
pub struct QueueWriter {
    store: Arc<dyn SnapshotStore>,
    capacity: usize,
}

impl QueueWriter {
    pub fn new(store: Arc<dyn SnapshotStore>, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// Head-insert `ranked` in the given order, so the last element ends up
    /// nearest the head. Each insert trims the queue to capacity.
    pub async fn publish(&self, ranked: &[RankedEvent]) -> PublishReport {
        let mut report = PublishReport::default();

        for event in ranked {
            let key = event.posted_key();
            match self.store.is_posted(&key).await {
                Ok(true) => {
                    report.skipped_posted += 1;
                    debug!(
                        market_id = key.market_id,
                        event_type = %key.event_type,
                        "already posted, not queuing"
                    );
                    continue;
                }
                Ok(false) => {}
                // Unverifiable means unqueued: a missed story beats a duplicate one.
                Err(e) => {
                    report.failed += 1;
                    warn!(market_id = key.market_id, "posted-ledger check failed, not queuing: {e}");
                    continue;
                }
            }

            let payload = match serde_json::to_string(event) {
                Ok(p) => p,
                Err(e) => {
                    report.failed += 1;
                    error!(market_id = key.market_id, "failed to serialize ranked event: {e}");
                    continue;
                }
            };

            match self.store.push_event(payload, self.capacity).await {
                Ok(len) => {
                    report.queued += 1;
                    report.queue_len = Some(len);
                }
                Err(e) => {
                    report.failed += 1;
                    error!(market_id = key.market_id, "queue insert failed: {e}");
                }
            }
        }

        info!(
            queued = report.queued,
            skipped_posted = report.skipped_posted,
            failed = report.failed,
            "queue publish complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Category, EventKind, EventType, MarketStatus, NewsEvent, PostedRecord};

    fn ranked(id: u64, score: u8) -> RankedEvent {
        RankedEvent {
            event: NewsEvent {
                market_id: id,
                market_address: format!("0x{id}"),
                market_question: format!("Market {id}?"),
                category: Category::Politics,
                additional_info: None,
                timestamp: 777,
                kind: EventKind::StatusChange {
                    previous_status: MarketStatus::Open,
                    new_status: MarketStatus::Finalized,
                    status_text: "Finalized".to_string(),
                },
            },
            context: None,
            interest_score: score,
            headline: format!("Market {id} resolved"),
            description: "It is over.".to_string(),
            image_prompt: None,
        }
    }

    #[tokio::test]
    async fn posted_key_blocks_requeue() {
        let store = Arc::new(MemoryStore::new());
        store
            .record_posted(&PostedRecord { market_id: 42, timestamp: 777, event_type: EventType::StatusChange })
            .await
            .unwrap();
        let writer = QueueWriter::new(store.clone(), 1000);

        let report = writer.publish(&[ranked(42, 9), ranked(43, 5)]).await;

        assert_eq!(report.queued, 1);
        assert_eq!(report.skipped_posted, 1);
        let queued = store.queued_events(10).await.unwrap();
        assert_eq!(queued.len(), 1);
        let back: RankedEvent = serde_json::from_str(&queued[0]).unwrap();
        assert_eq!(back, ranked(43, 5));
    }

    #[tokio::test]
    async fn highest_score_lands_at_head() {
        let store = Arc::new(MemoryStore::new());
        let writer = QueueWriter::new(store.clone(), 1000);

        writer.publish(&[ranked(1, 2), ranked(2, 5), ranked(3, 9)]).await;

        let head: RankedEvent = serde_json::from_str(&store.queued_events(1).await.unwrap()[0]).unwrap();
        assert_eq!(head.event.market_id, 3);
    }

    #[tokio::test]
    async fn queue_never_exceeds_capacity() {
        let store = Arc::new(MemoryStore::new());
        let writer = QueueWriter::new(store.clone(), 1000);

        for round in 0..11u64 {
            let batch: Vec<RankedEvent> = (0..100).map(|i| ranked(round * 100 + i, 5)).collect();
            let report = writer.publish(&batch).await;
            assert!(report.queue_len.unwrap() <= 1000);
            assert!(store.queue_len().await.unwrap() <= 1000);
        }
        assert_eq!(store.queue_len().await.unwrap(), 1000);
        // The oldest round was trimmed from the tail.
        let tail: RankedEvent =
            serde_json::from_str(store.queued_events(1000).await.unwrap().last().unwrap()).unwrap();
        assert_eq!(tail.event.market_id, 100);
    }

    #[tokio::test]
    async fn unreachable_ledger_queues_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let writer = QueueWriter::new(store.clone(), 10);

        let report = writer.publish(&[ranked(1, 1)]).await;
        assert_eq!(report.queued, 0);
        assert_eq!(report.failed, 1);
    }
}
