//! Background task that periodically sweeps a Water store.
//!
//! Nothing starts it implicitly; callers opt in with [`spawn_sweeper`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::store::WaterStore;

/// Shortest period the sweeper runs at; smaller intervals are raised to it.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: oneshot::Sender<()>,
    task: JoinHandle<u64>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to finish.
    ///
    /// Returns the number of sweep passes that ran.
    pub async fn shutdown(self) -> u64 {
        let _ = self.cancel.send(());
        match self.task.await {
            Ok(passes) => passes,
            Err(e) => {
                tracing::warn!(error = %e, "Sweeper task ended abnormally");
                0
            }
        }
    }

    /// Whether the task has already exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `store.sweep()` every `interval` until the returned handle is shut
/// down. The first pass runs one interval after spawning. An interval below
/// [`MIN_SWEEP_INTERVAL`] runs at that minimum.
///
/// Sweep errors are logged and the loop continues.
pub fn spawn_sweeper(store: Arc<dyn WaterStore>, interval: Duration) -> SweeperHandle {
    let (cancel, mut cancelled) = oneshot::channel::<()>();
    let interval = interval.max(MIN_SWEEP_INTERVAL);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut passes = 0u64;

        tracing::info!(
            backend = store.backend(),
            interval_ms = interval.as_millis() as u64,
            "Sweeper started"
        );

        loop {
            tokio::select! {
                _ = &mut cancelled => break,
                _ = ticker.tick() => {
                    passes += 1;
                    match store.sweep().await {
                        Ok(report) if report.total() > 0 => log_stats(store.as_ref()).await,
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
            }
        }

        tracing::info!(passes, "Sweeper stopped");
        passes
    });

    SweeperHandle { cancel, task }
}

async fn log_stats(store: &dyn WaterStore) {
    match store.get_stats().await {
        Ok(stats) => tracing::info!(
            backend = %stats.backend,
            live_nodes = stats.water_node_count,
            live_edges = stats.water_edge_count,
            size_bytes = stats.size_bytes,
            "Water store after sweep"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read water stats"),
    }
}
