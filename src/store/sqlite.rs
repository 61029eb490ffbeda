use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use super::{decode_snapshot, encode_snapshot, Partition, SnapshotStore};
use crate::error::{AppError, Result};
use crate::types::{now_ms, MarketId, MarketSnapshot, PostedRecord};

/// SQLite-backed store. Each partition is its own table keyed by market id;
/// the active → finalized move runs inside a single transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn table(partition: Partition) -> &'static str {
    match partition {
        Partition::Active => "active_markets",
        Partition::Finalized => "finalized_markets",
    }
}

/// SQLite integers are signed; ids above `i64::MAX` cannot be stored.
fn db_id(id: MarketId) -> Result<i64> {
    i64::try_from(id).map_err(|_| AppError::Store(format!("market id {id} exceeds SQLite integer range")))
}

impl SqliteStore {
    /// Open (creating if missing) the database file and apply migrations.
    pub async fn open(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Database ready at {db_path}");
        Ok(store)
    }

    /// Private in-memory database on a single pinned connection.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn get_snapshot(
        &self,
        partition: Partition,
        id: MarketId,
    ) -> Result<Option<MarketSnapshot>> {
        let sql = format!("SELECT snapshot FROM {} WHERE market_id = ?", table(partition));
        let raw: Option<String> = sqlx::query_scalar(&sql)
            .bind(db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
        raw.as_deref().map(decode_snapshot).transpose()
    }

    async fn contains(&self, partition: Partition, id: MarketId) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE market_id = ?", table(partition));
        let hit: Option<i64> = sqlx::query_scalar(&sql)
            .bind(db_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hit.is_some())
    }

    async fn range_by_score(
        &self,
        partition: Partition,
        min: MarketId,
        max: MarketId,
    ) -> Result<Vec<MarketSnapshot>> {
        let sql = format!(
            "SELECT snapshot FROM {} WHERE market_id BETWEEN ? AND ? ORDER BY market_id ASC",
            table(partition)
        );
        let rows: Vec<String> = sqlx::query_scalar(&sql)
            .bind(min.min(i64::MAX as u64) as i64)
            .bind(max.min(i64::MAX as u64) as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|raw| decode_snapshot(raw)).collect()
    }

    async fn highest_market_id(&self) -> Result<Option<MarketId>> {
        let highest: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(m) FROM (
                SELECT MAX(market_id) AS m FROM active_markets
                UNION ALL
                SELECT MAX(market_id) AS m FROM finalized_markets
            )
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(highest.map(|id| id as MarketId))
    }

    async fn upsert_active(&self, snapshot: &MarketSnapshot) -> Result<()> {
        let raw = encode_snapshot(snapshot)?;
        sqlx::query(
            r#"
            INSERT INTO active_markets (market_id, snapshot, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(db_id(snapshot.market_id)?)
        .bind(raw)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize(&self, snapshot: &MarketSnapshot) -> Result<()> {
        let raw = encode_snapshot(snapshot)?;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM active_markets WHERE market_id = ?")
            .bind(db_id(snapshot.market_id)?)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO finalized_markets (market_id, snapshot, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                snapshot = excluded.snapshot,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(db_id(snapshot.market_id)?)
        .bind(raw)
        .bind(snapshot.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reconcile(&self) -> Result<usize> {
        let result = sqlx::query(
            "DELETE FROM active_markets WHERE market_id IN (SELECT market_id FROM finalized_markets)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn push_event(&self, payload: String, capacity: usize) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO news_events (payload, inserted_at) VALUES (?, ?)")
            .bind(payload)
            .bind(now_ms())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            DELETE FROM news_events WHERE seq NOT IN (
                SELECT seq FROM news_events ORDER BY seq DESC LIMIT ?
            )
            "#,
        )
        .bind(capacity.min(i64::MAX as usize) as i64)
        .execute(&mut *tx)
        .await?;
        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM news_events")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(len as usize)
    }

    async fn queued_events(&self, limit: usize) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM news_events ORDER BY seq DESC LIMIT ?")
                .bind(limit.min(i64::MAX as usize) as i64)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }

    async fn queue_len(&self) -> Result<usize> {
        let len: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM news_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(len as usize)
    }

    async fn is_posted(&self, record: &PostedRecord) -> Result<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM news_posted
            WHERE market_id = ? AND timestamp = ? AND event_type = ?
            LIMIT 1
            "#,
        )
        .bind(db_id(record.market_id)?)
        .bind(record.timestamp)
        .bind(record.event_type.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    async fn record_posted(&self, record: &PostedRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO news_posted (market_id, timestamp, event_type, posted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(db_id(record.market_id)?)
        .bind(record.timestamp)
        .bind(record.event_type.to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
