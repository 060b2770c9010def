//! Bounded, ordered conduit carrying status values for one identifier.
//!
//! A channel has one publisher role (the webhook ingest path) and at most
//! one attached consumer (a subscriber's forwarding task). Values come out in
//! publish order. Closing lets the consumer drain what is already buffered
//! and then observe end-of-sequence.
//!
//! ## Saturation policy
//!
//! When the buffer holds `capacity` undelivered values, `publish` waits up
//! to `publish_timeout` for the consumer to free a slot. If nothing frees in
//! time, the oldest undelivered value is dropped to make room and returned
//! to the caller as [`Published::DisplacedOldest`].

use futures::Stream;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::errors::RelayError;
use crate::id::ImageId;
use crate::status::StatusValue;

pub const DEFAULT_CAPACITY: usize = 3;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Undelivered values a channel holds before publishers have to wait.
    pub capacity: usize,
    /// How long a publisher waits on a full buffer before dropping the oldest value.
    pub publish_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

/// Result of a successful [`StatusChannel::publish`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Published {
    Delivered,
    /// The buffer stayed full for the whole timeout; this value was dropped
    /// to make room.
    DisplacedOldest(StatusValue),
}

#[derive(Debug, Default)]
struct State {
    buffer: VecDeque<StatusValue>,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    id: ImageId,
    capacity: usize,
    publish_timeout: Duration,
    state: Mutex<State>,
    consumer_attached: AtomicBool,
    readable: Notify,
    writable: Notify,
}

impl Shared {
    // No critical section can panic mid-update; poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle to one identifier's status channel. All clones refer to
/// the same underlying buffer.
#[derive(Debug, Clone)]
pub struct StatusChannel {
    shared: Arc<Shared>,
}

impl StatusChannel {
    pub fn new(id: ImageId, config: ChannelConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                capacity: config.capacity.max(1),
                publish_timeout: config.publish_timeout,
                state: Mutex::new(State::default()),
                consumer_attached: AtomicBool::new(false),
                readable: Notify::new(),
                writable: Notify::new(),
            }),
        }
    }

    pub fn id(&self) -> &ImageId {
        &self.shared.id
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Number of values published but not yet consumed.
    pub fn pending(&self) -> usize {
        self.shared.state().buffer.len()
    }

    pub fn has_consumer(&self) -> bool {
        self.shared.consumer_attached.load(Ordering::Acquire)
    }

    /// True when both handles point at the same channel instance.
    pub fn same_channel(&self, other: &StatusChannel) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Appends `value` for delivery, applying the saturation policy described
    /// in the module docs.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ChannelClosed`] if the channel is closed before
    /// the value could be buffered.
    pub async fn publish(&self, value: StatusValue) -> Result<Published, RelayError> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.publish_timeout;

        loop {
            // Register for wakeups before looking at the buffer so a slot
            // freed in between is not missed.
            let notified = shared.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = shared.state();
                if state.closed {
                    return Err(RelayError::ChannelClosed(shared.id.clone()));
                }
                if state.buffer.len() < shared.capacity {
                    state.buffer.push_back(value);
                    drop(state);
                    shared.readable.notify_waiters();
                    return Ok(Published::Delivered);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.displace_oldest(value);
            }
        }
    }

    fn displace_oldest(&self, value: StatusValue) -> Result<Published, RelayError> {
        let shared = &self.shared;
        let mut state = shared.state();
        if state.closed {
            return Err(RelayError::ChannelClosed(shared.id.clone()));
        }

        let displaced = if state.buffer.len() >= shared.capacity {
            state.buffer.pop_front()
        } else {
            None
        };
        state.buffer.push_back(value);
        drop(state);
        shared.readable.notify_waiters();

        Ok(match displaced {
            Some(old) => Published::DisplacedOldest(old),
            None => Published::Delivered,
        })
    }

    /// Marks the channel closed. Buffered values stay readable; pending and
    /// future publishers fail. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.shared.state();
            if state.closed {
                return false;
            }
            state.closed = true;
        }
        self.shared.readable.notify_waiters();
        self.shared.writable.notify_waiters();
        true
    }

    /// Attaches the single consumer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConsumerAttached`] while another receiver for
    /// this channel is alive.
    pub fn consume(&self) -> Result<StatusReceiver, RelayError> {
        self.shared
            .consumer_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RelayError::ConsumerAttached(self.shared.id.clone()))?;

        Ok(StatusReceiver {
            shared: Arc::clone(&self.shared),
        })
    }
}

/// The consuming end of a [`StatusChannel`]. Dropping it detaches the
/// consumer so another one may attach and continue from the next
/// undelivered value.
#[derive(Debug)]
pub struct StatusReceiver {
    shared: Arc<Shared>,
}

impl StatusReceiver {
    pub fn id(&self) -> &ImageId {
        &self.shared.id
    }

    /// Waits for the next value. Returns `None` once the channel is closed
    /// and drained; every later call returns `None` as well.
    pub async fn recv(&mut self) -> Option<StatusValue> {
        let shared = &self.shared;
        loop {
            let notified = shared.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = shared.state();
                if let Some(value) = state.buffer.pop_front() {
                    drop(state);
                    shared.writable.notify_waiters();
                    return Some(value);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Takes the next buffered value without waiting.
    pub fn try_recv(&mut self) -> Option<StatusValue> {
        let value = self.shared.state().buffer.pop_front();
        if value.is_some() {
            self.shared.writable.notify_waiters();
        }
        value
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    pub fn into_stream(self) -> impl Stream<Item = StatusValue> + Send + 'static {
        futures::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        })
    }
}

impl Drop for StatusReceiver {
    fn drop(&mut self) {
        self.shared.consumer_attached.store(false, Ordering::Release);
    }
}
