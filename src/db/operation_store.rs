use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::{EntityKind, OperationKind, PendingOperation};

/// Durable FIFO queue of deferred remote mutations.
///
/// Insertion order is preserved through the autoincrementing `seq` column;
/// replay correctness depends on it (a create must be applied before the
/// update that follows it).
pub struct OperationStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    kind: String,
    entity: String,
    entity_id: String,
    payload: String,
    created_at: String,
    retry_count: i32,
    last_error: Option<String>,
}

impl OperationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends an operation to the queue. Duplicate enqueues of logically
    /// identical operations produce distinct entries.
    pub async fn enqueue(&self, op: &PendingOperation) -> Result<(), sqlx::Error> {
        let payload =
            serde_json::to_string(&op.payload).unwrap_or_else(|_| "null".to_string());

        sqlx::query(
            r#"
            INSERT INTO pending_operations (id, kind, entity, entity_id, payload, created_at, retry_count, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(op.id.to_string())
        .bind(op.kind.to_string())
        .bind(op.entity.to_string())
        .bind(&op.entity_id)
        .bind(&payload)
        .bind(op.created_at.to_rfc3339())
        .bind(op.retry_count)
        .bind(&op.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// All queued operations in insertion order.
    pub async fn list_pending(&self) -> Result<Vec<PendingOperation>, sqlx::Error> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, kind, entity, entity_id, payload, created_at, retry_count, last_error
            FROM pending_operations
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(hydrate_operation).collect())
    }

    /// Number of queued operations, without materializing the rows.
    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }

    /// Deletes one operation after confirmed remote success. Removing an id
    /// that is no longer queued is a no-op.
    pub async fn remove(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM pending_operations WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Bumps the retry counter after a failed attempt and records the error
    /// message for inspection.
    pub async fn increment_retry(&self, id: Uuid, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE pending_operations SET retry_count = retry_count + 1, last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Operations that have failed at least `max_retries` times.
    pub async fn list_abandoned(
        &self,
        max_retries: i32,
    ) -> Result<Vec<PendingOperation>, sqlx::Error> {
        let rows: Vec<OperationRow> = sqlx::query_as(
            r#"
            SELECT id, kind, entity, entity_id, payload, created_at, retry_count, last_error
            FROM pending_operations
            WHERE retry_count >= ?
            ORDER BY seq
            "#,
        )
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(hydrate_operation).collect())
    }

    /// Deletes operations that have failed at least `max_retries` times.
    /// Returns how many entries were dropped.
    pub async fn purge_abandoned(&self, max_retries: i32) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE retry_count >= ?")
            .bind(max_retries)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn hydrate_operation(row: OperationRow) -> PendingOperation {
    PendingOperation {
        id: Uuid::parse_str(&row.id).unwrap_or_default(),
        kind: OperationKind::from_str(&row.kind).unwrap_or(OperationKind::Create),
        entity: EntityKind::from_str(&row.entity).unwrap_or(EntityKind::Announcement),
        entity_id: row.entity_id,
        payload: serde_json::from_str(&row.payload).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        retry_count: row.retry_count,
        last_error: row.last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        store: OperationStore,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_store() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();

        TestContext {
            store: OperationStore::new(pool),
            _temp_dir: temp_dir,
        }
    }

    fn create_op(entity_id: &str) -> PendingOperation {
        PendingOperation::new(
            OperationKind::Create,
            EntityKind::Announcement,
            entity_id,
            json!({"title": entity_id}),
        )
    }

    #[tokio::test]
    async fn test_list_pending_preserves_enqueue_order() {
        let ctx = setup_store().await;

        for id in ["a-1", "a-2", "a-3"] {
            ctx.store.enqueue(&create_op(id)).await.unwrap();
        }

        let pending = ctx.store.list_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|op| op.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a-1", "a-2", "a-3"]);
    }

    #[tokio::test]
    async fn test_enqueue_round_trips_fields() {
        let ctx = setup_store().await;

        let op = PendingOperation::new(
            OperationKind::Update,
            EntityKind::DailyRecord,
            "r-7",
            json!({"mood": "happy", "naps": 2}),
        );
        ctx.store.enqueue(&op).await.unwrap();

        let pending = ctx.store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        let loaded = &pending[0];
        assert_eq!(loaded.id, op.id);
        assert_eq!(loaded.kind, OperationKind::Update);
        assert_eq!(loaded.entity, EntityKind::DailyRecord);
        assert_eq!(loaded.entity_id, "r-7");
        assert_eq!(loaded.payload, op.payload);
        assert_eq!(loaded.retry_count, 0);
        assert!(loaded.last_error.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_enqueues_produce_distinct_entries() {
        let ctx = setup_store().await;

        // Same logical operation, two distinct queue entries
        ctx.store.enqueue(&create_op("a-1")).await.unwrap();
        ctx.store.enqueue(&create_op("a-1")).await.unwrap();

        assert_eq!(ctx.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_count_matches_queue_depth() {
        let ctx = setup_store().await;

        assert_eq!(ctx.store.count().await.unwrap(), 0);

        ctx.store.enqueue(&create_op("a-1")).await.unwrap();
        ctx.store.enqueue(&create_op("a-2")).await.unwrap();
        assert_eq!(ctx.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let ctx = setup_store().await;

        let op = create_op("a-1");
        ctx.store.enqueue(&op).await.unwrap();

        ctx.store.remove(op.id).await.unwrap();
        assert_eq!(ctx.store.count().await.unwrap(), 0);

        // Second removal of the same id is a no-op, not an error
        ctx.store.remove(op.id).await.unwrap();
        assert_eq!(ctx.store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_increment_retry_records_error() {
        let ctx = setup_store().await;

        let op = create_op("a-1");
        ctx.store.enqueue(&op).await.unwrap();

        ctx.store
            .increment_retry(op.id, "validation failed")
            .await
            .unwrap();
        ctx.store.increment_retry(op.id, "timed out").await.unwrap();

        let pending = ctx.store.list_pending().await.unwrap();
        assert_eq!(pending[0].retry_count, 2);
        assert_eq!(pending[0].last_error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn test_purge_abandoned_drops_only_exhausted_entries() {
        let ctx = setup_store().await;

        let stuck = create_op("a-1");
        let fresh = create_op("a-2");
        ctx.store.enqueue(&stuck).await.unwrap();
        ctx.store.enqueue(&fresh).await.unwrap();

        for _ in 0..5 {
            ctx.store.increment_retry(stuck.id, "rejected").await.unwrap();
        }

        let abandoned = ctx.store.list_abandoned(5).await.unwrap();
        assert_eq!(abandoned.len(), 1);
        assert_eq!(abandoned[0].id, stuck.id);

        let purged = ctx.store.purge_abandoned(5).await.unwrap();
        assert_eq!(purged, 1);

        let pending = ctx.store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, fresh.id);
    }
}
