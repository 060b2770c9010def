use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::registry::RelayRegistry;

/// Spawns the task that evicts lifecycles which never reached a terminal
/// status (lost webhook, crashed worker). Stops when `shutdown` is cancelled.
pub fn spawn_expiry_sweeper(
    registry: RelayRegistry,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Expiry sweeper started (ttl={:?}, interval={:?})", ttl, interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for id in registry.evict_expired(ttl).await {
                        warn!("Status channel for {} expired without a terminal status", id);
                    }
                }
            }
        }

        debug!("Expiry sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ImageId;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_stale_channels_and_stops_on_cancel() {
        let registry = RelayRegistry::default();
        let channel = registry.register(ImageId::from("a1b2c3d4")).await.unwrap();
        let shutdown = CancellationToken::new();

        let handle = spawn_expiry_sweeper(
            registry.clone(),
            Duration::from_secs(60),
            Duration::from_secs(10),
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(registry.lookup(channel.id()).await.is_some());

        tokio::time::sleep(Duration::from_secs(45)).await;
        assert!(registry.lookup(channel.id()).await.is_none());
        assert!(channel.is_closed());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
