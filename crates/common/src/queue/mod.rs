//! SQS Queue integration for corpus maintenance jobs
//!
//! Provides:
//! - SQS client wrapper
//! - Typed message serialization/deserialization
//! - Dead letter queue forwarding for unparseable messages

use crate::config::QueueConfig as AppQueueConfig;
use crate::errors::{AppError, Result};
use aws_sdk_sqs::types::Message;
use aws_sdk_sqs::Client as SqsClient;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

/// SQS queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue URL
    pub url: String,
    /// Dead letter queue URL (optional)
    pub dlq_url: Option<String>,
    /// Visibility timeout in seconds
    pub visibility_timeout: i32,
    /// Wait time for long polling (seconds)
    pub wait_time_seconds: i32,
    /// Maximum number of messages per poll
    pub max_messages: i32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            dlq_url: None,
            visibility_timeout: 30,
            wait_time_seconds: 20,
            max_messages: 10,
        }
    }
}

impl QueueConfig {
    /// Build from the application config; `None` when no queue URL is set
    pub fn from_app(config: &AppQueueConfig) -> Option<Self> {
        let url = config.maintenance_queue_url.clone()?;
        Some(Self {
            url,
            dlq_url: config.dlq_url.clone(),
            visibility_timeout: config.visibility_timeout_secs as i32,
            wait_time_seconds: config.poll_timeout_secs as i32,
            max_messages: config.batch_size as i32,
        })
    }
}

/// SQS Queue client wrapper
pub struct Queue {
    client: SqsClient,
    config: QueueConfig,
}

impl Queue {
    /// Create a new queue client
    pub async fn new(config: QueueConfig) -> Result<Self> {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = SqsClient::new(&aws_config);

        Ok(Self { client, config })
    }

    /// Send a message to the queue
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<String> {
        let body = serde_json::to_string(message).map_err(|e| AppError::QueueError {
            message: format!("Failed to serialize message: {}", e),
        })?;

        self.send_raw(&self.config.url, body).await
    }

    async fn send_raw(&self, url: &str, body: String) -> Result<String> {
        let result = self
            .client
            .send_message()
            .queue_url(url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to send message: {}", e),
            })?;

        let message_id = result.message_id.unwrap_or_default();
        debug!(message_id = %message_id, "Message sent to queue");

        Ok(message_id)
    }

    /// Receive messages and decode them, returning `(message, receipt_handle)` pairs.
    ///
    /// Messages that fail to decode are forwarded to the DLQ (when configured)
    /// and deleted so they are not redelivered forever.
    pub async fn receive<T: DeserializeOwned>(&self) -> Result<Vec<(T, String)>> {
        let result = self
            .client
            .receive_message()
            .queue_url(&self.config.url)
            .max_number_of_messages(self.config.max_messages)
            .visibility_timeout(self.config.visibility_timeout)
            .wait_time_seconds(self.config.wait_time_seconds)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to receive messages: {}", e),
            })?;

        let messages = result.messages.unwrap_or_default();
        debug!(count = messages.len(), "Received messages from queue");

        let mut decoded = Vec::with_capacity(messages.len());
        for message in messages {
            let Some(receipt) = message.receipt_handle.clone() else {
                continue;
            };

            match Self::parse_message::<T>(&message) {
                Ok(body) => decoded.push((body, receipt)),
                Err(e) => {
                    warn!(error = %e, "Discarding undecodable message");
                    if let (Some(dlq), Some(body)) = (&self.config.dlq_url, message.body.clone()) {
                        if let Err(e) = self.send_raw(dlq, body).await {
                            warn!(error = %e, "Failed to forward message to DLQ");
                        }
                    }
                    self.delete(&receipt).await?;
                }
            }
        }

        Ok(decoded)
    }

    /// Delete a message after processing
    pub async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| AppError::QueueError {
                message: format!("Failed to delete message: {}", e),
            })?;

        debug!("Message deleted from queue");
        Ok(())
    }

    /// Parse message body as JSON
    pub fn parse_message<T: DeserializeOwned>(message: &Message) -> Result<T> {
        let body = message.body.as_ref().ok_or_else(|| AppError::QueueError {
            message: "Message has no body".to_string(),
        })?;

        serde_json::from_str(body).map_err(|e| AppError::QueueError {
            message: format!("Failed to parse message: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_url() {
        let app = AppQueueConfig::default();
        assert!(QueueConfig::from_app(&app).is_none());

        let app = AppQueueConfig {
            maintenance_queue_url: Some("https://sqs.local/maintenance".into()),
            ..AppQueueConfig::default()
        };
        let config = QueueConfig::from_app(&app).unwrap();
        assert_eq!(config.wait_time_seconds, 20);
        assert_eq!(config.max_messages, 10);
    }

    #[test]
    fn test_parse_message() {
        let message = Message::builder().body(r#"{"n": 3}"#).build();
        let value: serde_json::Value = Queue::parse_message(&message).unwrap();
        assert_eq!(value["n"], 3);

        let empty = Message::builder().build();
        assert!(Queue::parse_message::<serde_json::Value>(&empty).is_err());
    }
}
