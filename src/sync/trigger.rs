//! Periodic background trigger.
//!
//! Drives the coordinator on an interval, standing in for the platform job
//! scheduler: each tick re-reads the queue depth and starts a run when
//! something is queued. Overlap with manual runs is impossible because the
//! coordinator itself enforces single-flight.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::coordinator::SyncCoordinator;
use super::remote::RemoteStore;

pub struct PeriodicTrigger {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTrigger {
    /// Spawns the trigger task. Ticks every `period`, with ±10% jitter so
    /// that many clients do not sync against the server in lockstep.
    pub fn spawn<R>(coordinator: Arc<SyncCoordinator<R>>, period: Duration) -> Self
    where
        R: RemoteStore + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            loop {
                let tick = jittered(period);
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(tick) => {
                        match coordinator.refresh().await {
                            Ok(0) => {}
                            Ok(n) => {
                                tracing::debug!("{} pending operation(s), starting sync", n);
                                coordinator.sync_now().await;
                            }
                            Err(e) => {
                                tracing::warn!("Failed to read pending count: {}", e);
                            }
                        }
                    }
                }
            }
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stops the trigger loop and waits for the task to finish. Does not
    /// interrupt a run already handed to the coordinator.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

fn jittered(period: Duration) -> Duration {
    let base = period.as_millis() as u64;
    let spread = base / 10;
    if spread == 0 {
        return period;
    }
    let offset = rand::rng().random_range(0..=2 * spread);
    Duration::from_millis(base - spread + offset)
}
