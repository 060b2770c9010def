//! Process-wide table of live status channels keyed by identifier.
//!
//! The registry is the only structure mutated by more than one task, so all
//! access goes through a single `RwLock`. A channel is inserted fully built,
//! which means concurrent lookups never observe a half-constructed entry.
//! Once an identifier is evicted, `lookup` answers exactly as it would for an
//! identifier that was never registered.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::channel::{ChannelConfig, StatusChannel};
use crate::errors::RelayError;
use crate::id::ImageId;

#[derive(Debug)]
struct Registration {
    channel: StatusChannel,
    registered_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RelayRegistry {
    channels: Arc<RwLock<HashMap<ImageId, Registration>>>,
    config: ChannelConfig,
}

impl RelayRegistry {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    pub fn channel_config(&self) -> ChannelConfig {
        self.config
    }

    /// Creates and registers a channel for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyRegistered`] if `id` already has a live
    /// channel. The existing channel is left untouched.
    pub async fn register(&self, id: ImageId) -> Result<StatusChannel, RelayError> {
        let mut channels = self.channels.write().await;
        match channels.entry(id) {
            Entry::Occupied(entry) => Err(RelayError::AlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                let channel = StatusChannel::new(entry.key().clone(), self.config);
                debug!("Registered status channel for {}", entry.key());
                entry.insert(Registration {
                    channel: channel.clone(),
                    registered_at: Instant::now(),
                });
                Ok(channel)
            }
        }
    }

    /// Draws identifiers until an unused one turns up and registers it. The
    /// check and the insert happen under one write lock.
    pub async fn register_fresh(&self) -> StatusChannel {
        let mut channels = self.channels.write().await;
        loop {
            let id = ImageId::generate();
            if let Entry::Vacant(entry) = channels.entry(id) {
                let channel = StatusChannel::new(entry.key().clone(), self.config);
                debug!("Registered status channel for {}", entry.key());
                entry.insert(Registration {
                    channel: channel.clone(),
                    registered_at: Instant::now(),
                });
                return channel;
            }
        }
    }

    pub async fn lookup(&self, id: &ImageId) -> Option<StatusChannel> {
        self.channels
            .read()
            .await
            .get(id)
            .map(|registration| registration.channel.clone())
    }

    /// Removes and closes the channel for `id`. Evicting an unknown or
    /// already evicted identifier is a no-op and returns `false`.
    pub async fn evict(&self, id: &ImageId) -> bool {
        let removed = self.channels.write().await.remove(id);
        match removed {
            Some(registration) => {
                registration.channel.close();
                debug!("Evicted status channel for {}", id);
                true
            }
            None => false,
        }
    }

    /// Closes `channel` and removes it if it is still the live entry for its
    /// identifier. A newer registration under the same identifier is left
    /// alone. Returns `true` if the entry was removed.
    pub async fn evict_channel(&self, channel: &StatusChannel) -> bool {
        let removed = {
            let mut channels = self.channels.write().await;
            match channels.entry(channel.id().clone()) {
                Entry::Occupied(entry) if entry.get().channel.same_channel(channel) => {
                    entry.remove();
                    true
                }
                _ => false,
            }
        };
        channel.close();
        if removed {
            debug!("Evicted status channel for {}", channel.id());
        }
        removed
    }

    /// Evicts every channel registered longer than `ttl` ago and returns
    /// their identifiers.
    pub async fn evict_expired(&self, ttl: Duration) -> Vec<ImageId> {
        let now = Instant::now();
        let expired: Vec<Registration> = {
            let mut channels = self.channels.write().await;
            let ids: Vec<ImageId> = channels
                .iter()
                .filter(|(_, r)| now.duration_since(r.registered_at) >= ttl)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| channels.remove(id)).collect()
        };

        expired
            .into_iter()
            .map(|registration| {
                registration.channel.close();
                registration.channel.id().clone()
            })
            .collect()
    }

    /// Closes and removes every channel. Returns how many were live.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Registration> = self
            .channels
            .write()
            .await
            .drain()
            .map(|(_, r)| r)
            .collect();
        for registration in &drained {
            registration.channel.close();
        }
        drained.len()
    }

    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new(ChannelConfig::default())
    }
}
