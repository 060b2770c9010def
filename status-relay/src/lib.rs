//! In-process status relay.
//!
//! Bridges two unsynchronized control flows: a webhook delivering a status
//! for some identifier at an unpredictable time, and a subscriber that may
//! attach to that identifier before, during or after the delivery. State
//! lives only in process memory.
//!
//! - [`ImageId`] names one upload/processing lifecycle.
//! - [`RelayRegistry`] maps identifiers to live [`StatusChannel`]s.
//! - [`WebhookIngest`] decodes notifications and publishes into channels.
//! - [`spawn_expiry_sweeper`] evicts lifecycles that never finish.

pub mod channel;
pub mod errors;
pub mod id;
pub mod registry;
pub mod status;
pub mod sweeper;
pub mod webhook;

pub use channel::{ChannelConfig, Published, StatusChannel, StatusReceiver};
pub use errors::{RelayError, WebhookError};
pub use id::ImageId;
pub use registry::RelayRegistry;
pub use status::{StatusValue, TerminalPolicy};
pub use sweeper::spawn_expiry_sweeper;
pub use webhook::{IngestOutcome, MessageKind, WebhookIngest, MESSAGE_TYPE_HEADER};
