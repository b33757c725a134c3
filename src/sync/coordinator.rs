//! Sync coordinator state machine.
//!
//! One logical coordinator exists per process. It observes the queue,
//! publishes the current [`SyncState`] through a watch channel, and enforces
//! that at most one processing run is active at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, Mutex};

use super::remote::RemoteStore;
use super::repository::{ProcessSummary, SyncError, SyncRepository};

/// Current condition of the sync engine. Exactly one state is current at any
/// time; consumers render this instead of raw errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    /// No pending work
    Idle,
    /// Operations queued, not yet processing
    Pending(usize),
    /// A processing run is in flight
    Syncing,
    /// The last run applied everything it attempted
    Completed,
    /// The last run failed
    Failed(String),
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::Pending(n) => write!(f, "{} operation(s) pending", n),
            SyncState::Syncing => write!(f, "syncing"),
            SyncState::Completed => write!(f, "completed"),
            SyncState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of one coordinator-driven run.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The pass ran to completion (possibly with per-item failures)
    Finished(ProcessSummary),
    /// The pass aborted before finishing
    Failed(String),
    /// Another run was already in flight; this request was a no-op
    Skipped,
}

pub struct SyncCoordinator<R> {
    repository: SyncRepository<R>,
    state_tx: watch::Sender<SyncState>,
    run_guard: Mutex<()>,
    stop_requested: AtomicBool,
}

impl<R: RemoteStore> SyncCoordinator<R> {
    pub fn new(repository: SyncRepository<R>) -> Self {
        let (state_tx, _) = watch::channel(SyncState::Idle);
        Self {
            repository,
            state_tx,
            run_guard: Mutex::new(()),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        self.state_tx.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state_tx.subscribe()
    }

    pub fn repository(&self) -> &SyncRepository<R> {
        &self.repository
    }

    /// Re-reads the queue depth and publishes `Idle`/`Pending` accordingly.
    /// Leaves the published state alone while a run is in flight.
    pub async fn refresh(&self) -> Result<usize, SyncError> {
        let count = self.repository.pending_count().await? as usize;

        if !matches!(*self.state_tx.borrow(), SyncState::Syncing) {
            let next = if count == 0 {
                SyncState::Idle
            } else {
                SyncState::Pending(count)
            };
            // Only notify subscribers on an actual change
            self.state_tx.send_if_modified(|state| {
                if *state == next {
                    false
                } else {
                    *state = next;
                    true
                }
            });
        }

        Ok(count)
    }

    /// Runs one processing pass over the queue.
    ///
    /// At most one run is active at a time; a request arriving while another
    /// run is in flight returns [`SyncOutcome::Skipped`] without queueing or
    /// parallelizing. This keeps processing of the shared queue at-most-once.
    pub async fn sync_now(&self) -> SyncOutcome {
        let _guard = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!("Sync already in progress, skipping start request");
                return SyncOutcome::Skipped;
            }
        };

        self.stop_requested.store(false, Ordering::SeqCst);
        self.state_tx.send_replace(SyncState::Syncing);

        match self.repository.process_pending().await {
            Ok(summary) if summary.failed == 0 => {
                if !self.stopped() {
                    self.state_tx.send_replace(SyncState::Completed);
                    // Settle back to Idle/Pending based on what is queued now
                    let _ = self.refresh().await;
                }
                SyncOutcome::Finished(summary)
            }
            Ok(summary) => {
                let reason = format!(
                    "{} operation(s) failed, {} left queued",
                    summary.failed, summary.remaining
                );
                if !self.stopped() {
                    self.state_tx.send_replace(SyncState::Failed(reason));
                }
                SyncOutcome::Finished(summary)
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!("Sync run failed: {}", reason);
                if !self.stopped() {
                    self.state_tx.send_replace(SyncState::Failed(reason.clone()));
                }
                SyncOutcome::Failed(reason)
            }
        }
    }

    /// Best-effort stop: publishes `Idle` immediately and suppresses the
    /// in-flight run's terminal state. The run's remote calls are not
    /// interrupted and may still mutate the queue; the next [`refresh`]
    /// observation self-corrects.
    ///
    /// [`refresh`]: SyncCoordinator::refresh
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.state_tx.send_replace(SyncState::Idle);
    }

    fn stopped(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_db, OperationStore};
    use crate::models::{EntityKind, OperationKind, PendingOperation};
    use crate::sync::testing::MockRemote;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    struct TestContext {
        coordinator: Arc<SyncCoordinator<MockRemote>>,
        remote: MockRemote,
        store: OperationStore,
        _temp_dir: TempDir, // Keep alive for duration of test
    }

    async fn setup_coordinator() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();

        let remote = MockRemote::new();
        let repository =
            SyncRepository::new(OperationStore::new(pool.clone()), remote.clone());

        TestContext {
            coordinator: Arc::new(SyncCoordinator::new(repository)),
            remote,
            store: OperationStore::new(pool),
            _temp_dir: temp_dir,
        }
    }

    async fn enqueue(ctx: &TestContext, entity_id: &str) {
        let op = PendingOperation::new(
            OperationKind::Create,
            EntityKind::Announcement,
            entity_id,
            json!({"title": entity_id}),
        );
        ctx.store.enqueue(&op).await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let ctx = setup_coordinator().await;
        assert_eq!(ctx.coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_refresh_publishes_pending_count() {
        let ctx = setup_coordinator().await;

        enqueue(&ctx, "a-1").await;
        enqueue(&ctx, "a-2").await;
        let count = ctx.coordinator.refresh().await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(ctx.coordinator.state(), SyncState::Pending(2));

        for op in ctx.store.list_pending().await.unwrap() {
            ctx.store.remove(op.id).await.unwrap();
        }
        ctx.coordinator.refresh().await.unwrap();
        assert_eq!(ctx.coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_successful_run_settles_to_idle() {
        let ctx = setup_coordinator().await;
        enqueue(&ctx, "a-1").await;
        enqueue(&ctx, "a-2").await;

        let outcome = ctx.coordinator.sync_now().await;

        match outcome {
            SyncOutcome::Finished(summary) => {
                assert_eq!(summary.succeeded, 2);
                assert_eq!(summary.failed, 0);
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        assert_eq!(ctx.store.count().await.unwrap(), 0);
        assert_eq!(ctx.coordinator.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_item_failure_ends_in_failed_state() {
        let ctx = setup_coordinator().await;
        enqueue(&ctx, "a-1").await;
        enqueue(&ctx, "a-2").await;
        ctx.remote.reject("a-2");

        let outcome = ctx.coordinator.sync_now().await;

        match outcome {
            SyncOutcome::Finished(summary) => {
                assert_eq!(summary.succeeded, 1);
                assert_eq!(summary.failed, 1);
            }
            other => panic!("expected Finished, got {:?}", other),
        }
        assert!(matches!(ctx.coordinator.state(), SyncState::Failed(_)));
    }

    #[tokio::test]
    async fn test_unreachable_ends_in_failed_state_with_queue_untouched() {
        let ctx = setup_coordinator().await;
        enqueue(&ctx, "a-1").await;
        ctx.remote.set_unreachable(true);

        let outcome = ctx.coordinator.sync_now().await;

        assert!(matches!(outcome, SyncOutcome::Failed(_)));
        assert_eq!(ctx.store.count().await.unwrap(), 1);
        match ctx.coordinator.state() {
            SyncState::Failed(reason) => assert!(reason.contains("unreachable")),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_start_requests_run_once() {
        let ctx = setup_coordinator().await;
        enqueue(&ctx, "a-1").await;
        ctx.remote.set_delay(Duration::from_millis(300));

        let coordinator = ctx.coordinator.clone();
        let first = tokio::spawn(async move { coordinator.sync_now().await });

        // Give the first run time to take the guard and start processing
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctx.coordinator.state(), SyncState::Syncing);

        let second = ctx.coordinator.sync_now().await;
        assert!(matches!(second, SyncOutcome::Skipped));

        let first = first.await.unwrap();
        match first {
            SyncOutcome::Finished(summary) => assert_eq!(summary.succeeded, 1),
            other => panic!("expected Finished, got {:?}", other),
        }
        // The single run drained the queue exactly once
        assert_eq!(ctx.remote.applied(), vec!["put announcements/a-1"]);
    }

    #[tokio::test]
    async fn test_stop_during_run_resets_state_to_idle() {
        let ctx = setup_coordinator().await;
        enqueue(&ctx, "a-1").await;
        ctx.remote.set_delay(Duration::from_millis(300));

        let coordinator = ctx.coordinator.clone();
        let run = tokio::spawn(async move { coordinator.sync_now().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctx.coordinator.state(), SyncState::Syncing);

        ctx.coordinator.stop();
        assert_eq!(ctx.coordinator.state(), SyncState::Idle);

        // The in-flight remote call is not interrupted; it completes and
        // mutates the store, but the terminal state stays suppressed.
        run.await.unwrap();
        assert_eq!(ctx.coordinator.state(), SyncState::Idle);
        assert_eq!(ctx.store.count().await.unwrap(), 0);
    }
}
