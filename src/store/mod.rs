pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MarketId, MarketSnapshot, PostedRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// The two snapshot partitions. A market lives in exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Active,
    Finalized,
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Active => write!(f, "active"),
            Partition::Finalized => write!(f, "finalized"),
        }
    }
}

/// Ordered key-value store behind the pipeline: two snapshot partitions keyed
/// by market id, the bounded head-insertion event queue, and the posted ledger.
///
/// Constructed explicitly and injected into each stage. Callers are expected
/// to `ping` before a run and `close` on shutdown.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn close(&self);

    async fn get_snapshot(&self, partition: Partition, id: MarketId)
        -> Result<Option<MarketSnapshot>>;

    async fn contains(&self, partition: Partition, id: MarketId) -> Result<bool> {
        Ok(self.get_snapshot(partition, id).await?.is_some())
    }

    /// Snapshots with `min <= market_id <= max`, ascending.
    async fn range_by_score(
        &self,
        partition: Partition,
        min: MarketId,
        max: MarketId,
    ) -> Result<Vec<MarketSnapshot>>;

    /// Highest market id present in either partition.
    async fn highest_market_id(&self) -> Result<Option<MarketId>>;

    /// Replace the active-partition member for `snapshot.market_id`.
    async fn upsert_active(&self, snapshot: &MarketSnapshot) -> Result<()>;

    /// Move a market into the finalized partition as one atomic update.
    async fn finalize(&self, snapshot: &MarketSnapshot) -> Result<()>;

    /// Remove active members whose id is already finalized. Idempotent;
    /// returns the number of members repaired.
    async fn reconcile(&self) -> Result<usize>;

    /// Head-insert one serialized story and trim the queue to `capacity`.
    /// Returns the queue length after trimming.
    async fn push_event(&self, payload: String, capacity: usize) -> Result<usize>;

    /// Head-first view of the queue.
    async fn queued_events(&self, limit: usize) -> Result<Vec<String>>;

    async fn queue_len(&self) -> Result<usize>;

    async fn is_posted(&self, record: &PostedRecord) -> Result<bool>;

    /// Append to the posted ledger. Only the publisher-facing API calls this.
    async fn record_posted(&self, record: &PostedRecord) -> Result<()>;
}

pub(crate) fn encode_snapshot(snapshot: &MarketSnapshot) -> Result<String> {
    Ok(serde_json::to_string(snapshot)?)
}

pub(crate) fn decode_snapshot(raw: &str) -> Result<MarketSnapshot> {
    Ok(serde_json::from_str(raw)?)
}
