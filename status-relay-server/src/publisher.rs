//! Outbound "new artifact ready" announcements for the processing worker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publish request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Publish endpoint answered {0}")]
    Rejected(reqwest::StatusCode),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `message` to `destination` and returns the transport's
    /// message id. The id is only used for logging.
    async fn publish(&self, destination: &str, message: &str) -> Result<String, PublishError>;
}

/// Publisher that only logs. Used when no publish endpoint is configured.
#[derive(Debug, Clone, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, destination: &str, message: &str) -> Result<String, PublishError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Publish to {} (not forwarded): {} [message id {}]",
            destination, message, message_id
        );
        Ok(message_id)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PublishRequest<'a> {
    topic_arn: &'a str,
    message: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PublishResponse {
    message_id: String,
}

/// Publisher that POSTs `{"TopicArn", "Message"}` to an HTTP endpoint and
/// reads `MessageId` from the JSON reply.
#[derive(Debug, Clone)]
pub struct HttpEventPublisher {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventPublisher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for HttpEventPublisher {
    async fn publish(&self, destination: &str, message: &str) -> Result<String, PublishError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&PublishRequest {
                topic_arn: destination,
                message,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status));
        }

        let reply: PublishResponse = response.json().await?;
        Ok(reply.message_id)
    }
}
