//! Decoding and routing of inbound SNS-style webhook notifications.
//!
//! The external worker reports progress by publishing to a topic whose HTTP
//! subscription points at this service. Two envelope kinds matter:
//! subscription confirmations (handled out of band by an operator) and
//! notifications carrying an `{ImageID, Status}` payload. Everything else,
//! including bodies that fail to decode, is dropped. The sender is always
//! acknowledged so it never enters its own retry loop over a payload that
//! will not get any better.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::channel::Published;
use crate::errors::WebhookError;
use crate::id::ImageId;
use crate::registry::RelayRegistry;
use crate::status::{StatusValue, TerminalPolicy};

/// Header carrying the envelope kind.
pub const MESSAGE_TYPE_HEADER: &str = "x-amz-sns-message-type";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    SubscriptionConfirmation,
    Notification,
    Other,
}

impl MessageKind {
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some("SubscriptionConfirmation") => Self::SubscriptionConfirmation,
            Some("Notification") => Self::Notification,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmationEnvelope {
    #[serde(rename = "SubscribeURL")]
    pub subscribe_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationEnvelope {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub topic_arn: String,
    /// JSON-encoded [`StatusPayload`].
    pub message: String,
    #[serde(default)]
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStatusPayload {
    #[serde(rename = "ImageID")]
    image_id: Option<String>,
    #[serde(rename = "Status")]
    status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPayload {
    pub image_id: ImageId,
    pub status: StatusValue,
}

pub fn decode_confirmation(body: &[u8]) -> Result<ConfirmationEnvelope, WebhookError> {
    serde_json::from_slice(body).map_err(WebhookError::InvalidEnvelope)
}

/// Decodes the outer envelope and its nested status payload.
pub fn decode_notification(
    body: &[u8],
) -> Result<(NotificationEnvelope, StatusPayload), WebhookError> {
    let envelope: NotificationEnvelope =
        serde_json::from_slice(body).map_err(WebhookError::InvalidEnvelope)?;
    let raw: RawStatusPayload =
        serde_json::from_str(&envelope.message).map_err(WebhookError::InvalidPayload)?;

    let image_id = raw
        .image_id
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingField("ImageID"))?;
    let status = raw
        .status
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingField("Status"))?;

    Ok((
        envelope,
        StatusPayload {
            image_id: ImageId::from(image_id),
            status: StatusValue::from(status),
        },
    ))
}

/// What happened to one inbound webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The upstream subscription needs to be confirmed by visiting this URL.
    ConfirmationPending { subscribe_url: String },
    Delivered {
        id: ImageId,
        status: StatusValue,
        terminal: bool,
        displaced: Option<StatusValue>,
    },
    /// No live channel for the identifier; the status was discarded.
    Unmatched { id: ImageId },
    /// The channel closed between lookup and publish.
    Rejected { id: ImageId, reason: String },
    Ignored { message_type: Option<String> },
    Malformed { reason: String },
}

/// Routes decoded webhook notifications into the relay registry.
#[derive(Debug, Clone)]
pub struct WebhookIngest {
    registry: RelayRegistry,
    policy: TerminalPolicy,
}

impl WebhookIngest {
    pub fn new(registry: RelayRegistry, policy: TerminalPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &TerminalPolicy {
        &self.policy
    }

    /// Handles one webhook body. Never fails; every path ends in an
    /// [`IngestOutcome`] the caller can log or ignore.
    pub async fn ingest(&self, message_type: Option<&str>, body: &[u8]) -> IngestOutcome {
        match MessageKind::from_header(message_type) {
            MessageKind::SubscriptionConfirmation => match decode_confirmation(body) {
                Ok(confirmation) => {
                    info!(
                        "Subscription confirmation requested: {}",
                        confirmation.subscribe_url
                    );
                    IngestOutcome::ConfirmationPending {
                        subscribe_url: confirmation.subscribe_url,
                    }
                }
                Err(e) => {
                    warn!("Discarding subscription confirmation: {}", e);
                    IngestOutcome::Malformed {
                        reason: e.to_string(),
                    }
                }
            },
            MessageKind::Notification => match decode_notification(body) {
                Ok((envelope, payload)) => {
                    debug!(
                        "Notification {} from {} at {}",
                        envelope.message_id, envelope.topic_arn, envelope.timestamp
                    );
                    self.relay(payload).await
                }
                Err(e) => {
                    warn!("Discarding notification: {}", e);
                    IngestOutcome::Malformed {
                        reason: e.to_string(),
                    }
                }
            },
            MessageKind::Other => {
                debug!("Ignoring webhook with message type {:?}", message_type);
                IngestOutcome::Ignored {
                    message_type: message_type.map(str::to_string),
                }
            }
        }
    }

    /// Publishes a decoded status into its channel. A terminal status is
    /// published first, then the channel is closed and evicted, so the
    /// subscriber sees the final value before its sequence ends.
    pub async fn relay(&self, payload: StatusPayload) -> IngestOutcome {
        let StatusPayload { image_id, status } = payload;
        info!("ImageID: {}, Status: {}", image_id, status);

        let Some(channel) = self.registry.lookup(&image_id).await else {
            debug!("No live channel for {}, discarding {}", image_id, status);
            return IngestOutcome::Unmatched { id: image_id };
        };

        let displaced = match channel.publish(status.clone()).await {
            Ok(Published::Delivered) => None,
            Ok(Published::DisplacedOldest(old)) => {
                warn!(
                    "Status buffer for {} saturated, dropped {} to make room for {}",
                    image_id, old, status
                );
                Some(old)
            }
            Err(e) => {
                warn!("Could not relay {} for {}: {}", status, image_id, e);
                return IngestOutcome::Rejected {
                    id: image_id,
                    reason: e.to_string(),
                };
            }
        };

        let terminal = self.policy.is_terminal(&status);
        if terminal {
            self.registry.evict_channel(&channel).await;
            info!("Lifecycle for {} finished with {}", image_id, status);
        }

        IngestOutcome::Delivered {
            id: image_id,
            status,
            terminal,
            displaced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn notification(image_id: &str, status: &str) -> Vec<u8> {
        let message = json!({ "ImageID": image_id, "Status": status }).to_string();
        json!({
            "Type": "Notification",
            "MessageId": "b1946ac9-2c9b-4c7e-9f4e-6d1f1c8c1a11",
            "TopicArn": "arn:aws:sns:us-east-1:123456789012:status",
            "Message": message,
            "Timestamp": "2024-01-01T00:00:00.000Z"
        })
        .to_string()
        .into_bytes()
    }

    fn ingest() -> (RelayRegistry, WebhookIngest) {
        let registry = RelayRegistry::default();
        let ingest = WebhookIngest::new(registry.clone(), TerminalPolicy::default());
        (registry, ingest)
    }

    #[test]
    fn test_decode_notification_extracts_nested_payload() {
        let (envelope, payload) =
            decode_notification(&notification("a1b2c3d4", "Processing")).unwrap();
        assert_eq!(envelope.kind, "Notification");
        assert_eq!(envelope.topic_arn, "arn:aws:sns:us-east-1:123456789012:status");
        assert_eq!(payload.image_id, ImageId::from("a1b2c3d4"));
        assert_eq!(payload.status, StatusValue::from("Processing"));
    }

    #[test]
    fn test_decode_notification_rejects_bad_inner_payload() {
        let body = json!({ "Type": "Notification", "Message": "not json" }).to_string();
        assert!(matches!(
            decode_notification(body.as_bytes()),
            Err(WebhookError::InvalidPayload(_))
        ));

        let body = json!({ "Message": "{\"Status\":\"Accepted\"}" }).to_string();
        assert!(matches!(
            decode_notification(body.as_bytes()),
            Err(WebhookError::MissingField("ImageID"))
        ));
    }

    #[test]
    fn test_message_kind_from_header() {
        assert_eq!(
            MessageKind::from_header(Some("Notification")),
            MessageKind::Notification
        );
        assert_eq!(
            MessageKind::from_header(Some("SubscriptionConfirmation")),
            MessageKind::SubscriptionConfirmation
        );
        assert_eq!(
            MessageKind::from_header(Some("UnsubscribeConfirmation")),
            MessageKind::Other
        );
        assert_eq!(MessageKind::from_header(None), MessageKind::Other);
    }

    #[tokio::test]
    async fn test_terminal_status_is_delivered_then_channel_evicted() {
        let (registry, ingest) = ingest();
        let id = ImageId::from("a1b2c3d4");
        let channel = registry.register(id.clone()).await.unwrap();
        let rx = channel.consume().unwrap();

        let first = ingest
            .ingest(Some("Notification"), &notification("a1b2c3d4", "Processing"))
            .await;
        assert!(matches!(first, IngestOutcome::Delivered { terminal: false, .. }));

        let last = ingest
            .ingest(Some("Notification"), &notification("a1b2c3d4", "Accepted"))
            .await;
        assert_eq!(
            last,
            IngestOutcome::Delivered {
                id: id.clone(),
                status: "Accepted".into(),
                terminal: true,
                displaced: None,
            }
        );

        assert!(registry.lookup(&id).await.is_none());
        let seen: Vec<_> = futures::StreamExt::collect(rx.into_stream()).await;
        assert_eq!(seen, ["Processing", "Accepted"].map(StatusValue::from).to_vec());
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_discarded() {
        let (_registry, ingest) = ingest();
        let outcome = ingest
            .ingest(Some("Notification"), &notification("ffffffff", "Accepted"))
            .await;
        assert_eq!(
            outcome,
            IngestOutcome::Unmatched {
                id: ImageId::from("ffffffff")
            }
        );
    }

    #[tokio::test]
    async fn test_confirmation_surfaces_subscribe_url() {
        let (_registry, ingest) = ingest();
        let body = json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription&Token=abc"
        })
        .to_string();

        let outcome = ingest
            .ingest(Some("SubscriptionConfirmation"), body.as_bytes())
            .await;
        assert_eq!(
            outcome,
            IngestOutcome::ConfirmationPending {
                subscribe_url:
                    "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription&Token=abc"
                        .to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_and_other_kinds_touch_nothing() {
        let (registry, ingest) = ingest();
        let channel = registry.register(ImageId::from("a1b2c3d4")).await.unwrap();

        let malformed = ingest.ingest(Some("Notification"), b"{not json").await;
        assert!(matches!(malformed, IngestOutcome::Malformed { .. }));

        let other = ingest
            .ingest(Some("UnsubscribeConfirmation"), &notification("a1b2c3d4", "Accepted"))
            .await;
        assert_eq!(
            other,
            IngestOutcome::Ignored {
                message_type: Some("UnsubscribeConfirmation".to_string())
            }
        );

        assert_eq!(channel.pending(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_publish_into_closed_channel_is_rejected() {
        let (registry, ingest) = ingest();
        let channel = registry.register(ImageId::from("a1b2c3d4")).await.unwrap();
        channel.close();

        let outcome = ingest
            .ingest(Some("Notification"), &notification("a1b2c3d4", "Processing"))
            .await;
        assert!(matches!(outcome, IngestOutcome::Rejected { .. }));
    }
}
