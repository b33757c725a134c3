//! Bridges the local pending-operation queue to the remote document store.

use crate::db::OperationStore;
use crate::models::{OperationKind, PendingOperation};

use super::remote::{RemoteError, RemoteStore};

/// Failed attempts after which an operation is considered abandoned and
/// eligible for [`SyncRepository::purge_abandoned`].
pub const MAX_RETRY_COUNT: i32 = 5;

/// Counts from one processing pass over the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Operations applied remotely and removed from the queue
    pub succeeded: usize,
    /// Operations that failed and stay queued with a bumped retry counter
    pub failed: usize,
    /// Queue depth after the pass
    pub remaining: usize,
}

/// Errors that abort a whole processing pass.
#[derive(Debug)]
pub enum SyncError {
    /// Remote store could not be reached; the queue was left untouched
    Unreachable(String),
    /// A remote write was rejected outright
    Remote(RemoteError),
    /// Local queue storage failed
    Store(sqlx::Error),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Unreachable(e) => write!(f, "Server unreachable: {}", e),
            SyncError::Remote(e) => write!(f, "{}", e),
            SyncError::Store(e) => write!(f, "Queue storage error: {}", e),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Unreachable(_) => None,
            SyncError::Remote(e) => Some(e),
            SyncError::Store(e) => Some(e),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(e: sqlx::Error) -> Self {
        SyncError::Store(e)
    }
}

/// Outcome of a write-through attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied directly against the remote store
    Applied,
    /// Remote unavailable; the operation was queued for a later sync run
    Deferred,
}

/// Applies queued operations against the remote store and clears them on
/// confirmed success.
pub struct SyncRepository<R> {
    store: OperationStore,
    remote: R,
}

impl<R: RemoteStore> SyncRepository<R> {
    pub fn new(store: OperationStore, remote: R) -> Self {
        Self { store, remote }
    }

    /// Current queue depth.
    pub async fn pending_count(&self) -> Result<i64, SyncError> {
        Ok(self.store.count().await?)
    }

    /// Replays the queue in insertion order.
    ///
    /// A failing operation stays queued with its retry counter bumped and the
    /// pass moves on to the next one. Only total unreachability aborts the
    /// pass; untried operations are then left exactly as they were.
    pub async fn process_pending(&self) -> Result<ProcessSummary, SyncError> {
        if let Err(e) = self.remote.ping().await {
            tracing::debug!("Remote store not reachable, postponing sync: {}", e);
            return Err(SyncError::Unreachable(unreachable_reason(e)));
        }

        let operations = self.store.list_pending().await?;
        tracing::debug!("Processing {} pending operation(s)", operations.len());

        let mut succeeded = 0;
        let mut failed = 0;

        for op in &operations {
            match self.apply(op).await {
                Ok(()) => {
                    self.store.remove(op.id).await?;
                    succeeded += 1;
                    tracing::debug!("Applied {}", op);
                }
                Err(e) if e.is_unreachable() => {
                    tracing::warn!(
                        "Remote store became unreachable mid-run, {} operation(s) left queued",
                        operations.len() - succeeded
                    );
                    return Err(SyncError::Unreachable(unreachable_reason(e)));
                }
                Err(e) => {
                    tracing::warn!("Failed to apply {}: {}", op, e);
                    self.store.increment_retry(op.id, &e.to_string()).await?;
                    failed += 1;
                }
            }
        }

        let remaining = self.store.count().await? as usize;
        Ok(ProcessSummary {
            succeeded,
            failed,
            remaining,
        })
    }

    /// Write-through helper for client write paths: applies the operation
    /// directly when the remote store answers, queues it when the store is
    /// unreachable or the request times out. Outright rejections are returned
    /// to the caller instead of being queued, since they would fail the same
    /// way on every replay.
    pub async fn apply_or_enqueue(
        &self,
        op: PendingOperation,
    ) -> Result<WriteOutcome, SyncError> {
        match self.apply(&op).await {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(RemoteError::Unreachable(_)) | Err(RemoteError::Timeout) => {
                tracing::debug!("Remote unavailable, queueing {}", op);
                self.store.enqueue(&op).await?;
                Ok(WriteOutcome::Deferred)
            }
            Err(e) => Err(SyncError::Remote(e)),
        }
    }

    /// Drops operations that exceeded the retry cap. Returns how many were
    /// dropped.
    pub async fn purge_abandoned(&self) -> Result<u64, SyncError> {
        let purged = self.store.purge_abandoned(MAX_RETRY_COUNT).await?;
        if purged > 0 {
            tracing::warn!(
                "Dropped {} operation(s) that exceeded {} retries",
                purged,
                MAX_RETRY_COUNT
            );
        }
        Ok(purged)
    }

    async fn apply(&self, op: &PendingOperation) -> Result<(), RemoteError> {
        let collection = op.entity.collection();
        match op.kind {
            OperationKind::Create => {
                self.remote
                    .put_document(collection, &op.entity_id, &op.payload)
                    .await
            }
            OperationKind::Update => {
                self.remote
                    .merge_document(collection, &op.entity_id, &op.payload)
                    .await
            }
            OperationKind::Delete => {
                self.remote.delete_document(collection, &op.entity_id).await
            }
        }
    }
}

fn unreachable_reason(e: RemoteError) -> String {
    match e {
        RemoteError::Unreachable(reason) => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::models::EntityKind;
    use crate::sync::testing::MockRemote;
    use serde_json::json;
    use tempfile::TempDir;

    struct TestContext {
        repo: SyncRepository<MockRemote>,
        remote: MockRemote,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_repo() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();

        let remote = MockRemote::new();
        TestContext {
            repo: SyncRepository::new(OperationStore::new(pool), remote.clone()),
            remote,
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

    async fn enqueue_all(ctx: &TestContext, ids: &[&str]) -> Vec<PendingOperation> {
        let mut ops = Vec::new();
        for id in ids {
            let op = create_op(id);
            ctx.repo.store.enqueue(&op).await.unwrap();
            ops.push(op);
        }
        ops
    }

    #[tokio::test]
    async fn test_process_pending_applies_in_fifo_order() {
        let ctx = setup_repo().await;
        enqueue_all(&ctx, &["a-1", "a-2", "a-3"]).await;

        let summary = ctx.repo.process_pending().await.unwrap();

        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.remaining, 0);
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 0);
        assert_eq!(
            ctx.remote.applied(),
            vec![
                "put announcements/a-1",
                "put announcements/a-2",
                "put announcements/a-3",
            ]
        );
    }

    #[tokio::test]
    async fn test_operation_kinds_map_to_remote_calls() {
        let ctx = setup_repo().await;

        let update = PendingOperation::new(
            OperationKind::Update,
            EntityKind::DailyRecord,
            "r-1",
            json!({"mood": "happy"}),
        );
        let delete = PendingOperation::new(
            OperationKind::Delete,
            EntityKind::User,
            "u-1",
            serde_json::Value::Null,
        );
        ctx.repo.store.enqueue(&update).await.unwrap();
        ctx.repo.store.enqueue(&delete).await.unwrap();

        ctx.repo.process_pending().await.unwrap();

        assert_eq!(
            ctx.remote.applied(),
            vec!["merge daily_records/r-1", "delete users/u-1"]
        );
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort_the_batch() {
        let ctx = setup_repo().await;
        let ops = enqueue_all(&ctx, &["a-1", "a-2", "a-3"]).await;
        ctx.remote.reject("a-2");

        let summary = ctx.repo.process_pending().await.unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.remaining, 1);

        // The failing operation stays queued with its retry counter bumped
        let pending = ctx.repo.store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, ops[1].id);
        assert_eq!(pending[0].retry_count, 1);
        assert!(pending[0].last_error.is_some());

        // The other two were still attempted
        assert_eq!(
            ctx.remote.applied(),
            vec!["put announcements/a-1", "put announcements/a-3"]
        );
    }

    #[tokio::test]
    async fn test_unreachable_leaves_queue_untouched() {
        let ctx = setup_repo().await;
        enqueue_all(&ctx, &["a-1", "a-2"]).await;
        ctx.remote.set_unreachable(true);

        let err = ctx.repo.process_pending().await.unwrap_err();

        assert!(matches!(err, SyncError::Unreachable(_)));
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 2);
        let pending = ctx.repo.store.list_pending().await.unwrap();
        assert!(pending.iter().all(|op| op.retry_count == 0));
    }

    #[tokio::test]
    async fn test_process_pending_never_grows_the_queue() {
        let ctx = setup_repo().await;
        enqueue_all(&ctx, &["a-1", "a-2", "a-3"]).await;
        ctx.remote.reject("a-1");
        ctx.remote.reject("a-3");

        let before = ctx.repo.pending_count().await.unwrap();
        ctx.repo.process_pending().await.unwrap();
        let after = ctx.repo.pending_count().await.unwrap();

        assert!(after <= before);
    }

    #[tokio::test]
    async fn test_apply_or_enqueue_applies_when_online() {
        let ctx = setup_repo().await;

        let outcome = ctx.repo.apply_or_enqueue(create_op("a-1")).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 0);
        assert_eq!(ctx.remote.applied(), vec!["put announcements/a-1"]);
    }

    #[tokio::test]
    async fn test_apply_or_enqueue_defers_when_unreachable() {
        let ctx = setup_repo().await;
        ctx.remote.set_unreachable(true);

        let outcome = ctx.repo.apply_or_enqueue(create_op("a-1")).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Deferred);
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_apply_or_enqueue_propagates_rejections() {
        let ctx = setup_repo().await;
        ctx.remote.reject("a-1");

        let err = ctx.repo.apply_or_enqueue(create_op("a-1")).await.unwrap_err();

        assert!(matches!(err, SyncError::Remote(_)));
        // Rejected writes are not queued; they would fail on every replay
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_abandoned_respects_retry_cap() {
        let ctx = setup_repo().await;
        let ops = enqueue_all(&ctx, &["a-1", "a-2"]).await;

        for _ in 0..MAX_RETRY_COUNT {
            ctx.repo
                .store
                .increment_retry(ops[0].id, "rejected")
                .await
                .unwrap();
        }

        let purged = ctx.repo.purge_abandoned().await.unwrap();

        assert_eq!(purged, 1);
        assert_eq!(ctx.repo.pending_count().await.unwrap(), 1);
    }
}
