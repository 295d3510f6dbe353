//! Periodic heartbeat sweep

use super::controller::StreamLifecycleController;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Background task that expires silent sessions
pub struct HeartbeatSweeper {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl HeartbeatSweeper {
    /// Start sweeping every `interval`
    pub fn spawn(controller: Arc<StreamLifecycleController>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(async move {
            info!("Heartbeat sweeper started (interval: {:?})", interval);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Shutdown signal received for heartbeat sweeper");
                        break;
                    }

                    _ = ticker.tick() => {
                        controller.sweep_once().await;
                    }
                }
            }

            info!("Heartbeat sweeper stopped");
        });

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Stop the sweep loop and wait for it to exit
    pub async fn shutdown(self) {
        if let Err(e) = self.shutdown_tx.send(()).await {
            warn!("Failed to send shutdown signal: {}", e);
        }
        if let Err(e) = self.handle.await {
            warn!("Heartbeat sweeper task failed: {}", e);
        }
    }
}
