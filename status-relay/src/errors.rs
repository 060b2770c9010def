use thiserror::Error;

use crate::id::ImageId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("Identifier already registered: {0}")]
    AlreadyRegistered(ImageId),

    #[error("Status channel closed: {0}")]
    ChannelClosed(ImageId),

    #[error("A subscriber is already attached: {0}")]
    ConsumerAttached(ImageId),
}

/// Decode failures for inbound webhook bodies.
#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),

    #[error("Invalid status payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("Status payload is missing {0}")]
    MissingField(&'static str),
}
