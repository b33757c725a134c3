//! Offline pending-operation synchronization engine.
//!
//! Write paths that cannot reach the remote document store enqueue a
//! [`PendingOperation`](crate::models::PendingOperation) through the
//! [`OperationStore`](crate::db::OperationStore). This module replays the
//! queue:
//!
//! - [`SyncRepository`] applies queued operations in insertion order against
//!   a [`RemoteStore`], removing each on confirmed success and bumping its
//!   retry counter on failure.
//! - [`SyncCoordinator`] wraps the repository in a small state machine
//!   (`Idle` / `Pending` / `Syncing` / `Completed` / `Failed`) with a
//!   single-flight guarantee for runs.
//! - [`PeriodicTrigger`] drives the coordinator on a jittered interval.

pub mod coordinator;
pub mod remote;
pub mod repository;
pub mod trigger;

pub use coordinator::{SyncCoordinator, SyncOutcome, SyncState};
pub use remote::{HttpRemoteStore, RemoteError, RemoteStore};
pub use repository::{
    ProcessSummary, SyncError, SyncRepository, WriteOutcome, MAX_RETRY_COUNT,
};
pub use trigger::PeriodicTrigger;
