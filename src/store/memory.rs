use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{decode_snapshot, encode_snapshot, Partition, SnapshotStore};
use crate::error::{AppError, Result};
use crate::types::{MarketId, MarketSnapshot, PostedRecord};

#[derive(Default)]
struct Inner {
    /// market_id → serialized snapshot
    active: BTreeMap<MarketId, String>,
    finalized: BTreeMap<MarketId, String>,
    /// Front = head (newest).
    events: VecDeque<String>,
    posted: Vec<PostedRecord>,
}

impl Inner {
    fn partition(&self, partition: Partition) -> &BTreeMap<MarketId, String> {
        match partition {
            Partition::Active => &self.active,
            Partition::Finalized => &self.finalized,
        }
    }
}

/// In-process store. All partitions sit behind one lock, so `finalize` is atomic.
/// `set_available(false)` makes every call fail, which is how tests model an
/// unreachable backend.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    #[cfg(test)]
    pub fn set_available(&self, v: bool) {
        self.available.store(v, Ordering::Relaxed);
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(AppError::Store("memory store marked unavailable".to_string()))
        }
    }

    /// Writes a raw member without touching the other partition. Lets tests
    /// reproduce the state a crashed two-step move leaves behind.
    #[cfg(test)]
    pub async fn insert_raw(&self, partition: Partition, snapshot: &MarketSnapshot) {
        let raw = encode_snapshot(snapshot).unwrap();
        let mut inner = self.inner.lock().await;
        match partition {
            Partition::Active => inner.active.insert(snapshot.market_id, raw),
            Partition::Finalized => inner.finalized.insert(snapshot.market_id, raw),
        };
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn close(&self) {}

    async fn get_snapshot(
        &self,
        partition: Partition,
        id: MarketId,
    ) -> Result<Option<MarketSnapshot>> {
        self.check()?;
        let inner = self.inner.lock().await;
        inner
            .partition(partition)
            .get(&id)
            .map(|raw| decode_snapshot(raw))
            .transpose()
    }

    async fn range_by_score(
        &self,
        partition: Partition,
        min: MarketId,
        max: MarketId,
    ) -> Result<Vec<MarketSnapshot>> {
        self.check()?;
        if min > max {
            return Ok(Vec::new());
        }
        let inner = self.inner.lock().await;
        inner
            .partition(partition)
            .range(min..=max)
            .map(|(_, raw)| decode_snapshot(raw))
            .collect()
    }

    async fn highest_market_id(&self) -> Result<Option<MarketId>> {
        self.check()?;
        let inner = self.inner.lock().await;
        let active = inner.active.keys().next_back().copied();
        let finalized = inner.finalized.keys().next_back().copied();
        Ok(active.max(finalized))
    }

    async fn upsert_active(&self, snapshot: &MarketSnapshot) -> Result<()> {
        self.check()?;
        let raw = encode_snapshot(snapshot)?;
        self.inner.lock().await.active.insert(snapshot.market_id, raw);
        Ok(())
    }

    async fn finalize(&self, snapshot: &MarketSnapshot) -> Result<()> {
        self.check()?;
        let raw = encode_snapshot(snapshot)?;
        let mut inner = self.inner.lock().await;
        inner.active.remove(&snapshot.market_id);
        inner.finalized.insert(snapshot.market_id, raw);
        Ok(())
    }

    async fn reconcile(&self) -> Result<usize> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        let stale: Vec<MarketId> = inner
            .active
            .keys()
            .filter(|id| inner.finalized.contains_key(id))
            .copied()
            .collect();
        for id in &stale {
            inner.active.remove(id);
        }
        Ok(stale.len())
    }

    async fn push_event(&self, payload: String, capacity: usize) -> Result<usize> {
        self.check()?;
        let mut inner = self.inner.lock().await;
        inner.events.push_front(payload);
        inner.events.truncate(capacity);
        Ok(inner.events.len())
    }

    async fn queued_events(&self, limit: usize) -> Result<Vec<String>> {
        self.check()?;
        let inner = self.inner.lock().await;
        Ok(inner.events.iter().take(limit).cloned().collect())
    }

    async fn queue_len(&self) -> Result<usize> {
        self.check()?;
        Ok(self.inner.lock().await.events.len())
    }

    async fn is_posted(&self, record: &PostedRecord) -> Result<bool> {
        self.check()?;
        Ok(self.inner.lock().await.posted.contains(record))
    }

    async fn record_posted(&self, record: &PostedRecord) -> Result<()> {
        self.check()?;
        self.inner.lock().await.posted.push(record.clone());
        Ok(())
    }
}
