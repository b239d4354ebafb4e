//! Notification senders: one per delivery channel.
//!
//! - Email goes through the Resend HTTP API.
//! - Push goes to a JSON webhook (a push gateway owned by the mobile app).
//! - [`LogSender`] stands in for any channel that is not configured, so events
//!   still flow end to end in development.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use salon_common::types::{ChannelType, EventKind};

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A message ready to hand to a sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    pub channel: ChannelType,
    /// Email address for email, customer id for push.
    pub to: String,
    pub subject: String,
    pub body: String,
    pub event: EventKind,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Sender for {expected} cannot deliver {actual} messages")]
    WrongChannel {
        expected: ChannelType,
        actual: ChannelType,
    },
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn channel(&self) -> ChannelType;

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;
}

fn check_channel(expected: ChannelType, message: &OutboundMessage) -> Result<(), SendError> {
    if message.channel != expected {
        return Err(SendError::WrongChannel {
            expected,
            actual: message.channel,
        });
    }
    Ok(())
}

async fn ensure_success(response: reqwest::Response) -> Result<(), SendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(SendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

/// Email delivery through Resend.
pub struct EmailSender {
    client: reqwest::Client,
    api_key: String,
    from: String,
    endpoint: String,
}

impl EmailSender {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            from: from.into(),
            endpoint: RESEND_ENDPOINT.to_string(),
        })
    }

    /// Point the sender at another Resend-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    fn channel(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        check_channel(ChannelType::Email, message)?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [message.to],
                "subject": message.subject,
                "text": message.body,
            }))
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!(to = %message.to, event = %message.event, "Email sent");
        Ok(())
    }
}

/// Push delivery through a JSON webhook.
pub struct PushSender {
    client: reqwest::Client,
    webhook_url: String,
}

impl PushSender {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
        })
    }
}

#[async_trait]
impl NotificationSender for PushSender {
    fn channel(&self) -> ChannelType {
        ChannelType::Push
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        check_channel(ChannelType::Push, message)?;

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&json!({
                "customer_id": message.to,
                "title": message.subject,
                "body": message.body,
                "event": message.event,
            }))
            .send()
            .await?;
        ensure_success(response).await?;

        tracing::info!(customer_id = %message.to, event = %message.event, "Push notification sent");
        Ok(())
    }
}

/// Logs messages instead of delivering them.
pub struct LogSender {
    channel: ChannelType,
}

impl LogSender {
    pub fn new(channel: ChannelType) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    fn channel(&self) -> ChannelType {
        self.channel
    }

    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        check_channel(self.channel, message)?;
        tracing::info!(
            channel = %message.channel,
            to = %message.to,
            event = %message.event,
            subject = %message.subject,
            "Channel not configured, notification logged only"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(channel: ChannelType) -> OutboundMessage {
        OutboundMessage {
            channel,
            to: "ana@example.com".to_string(),
            subject: "Appointment confirmed".to_string(),
            body: "See you soon".to_string(),
            event: EventKind::AppointmentConfirmed,
        }
    }

    #[tokio::test]
    async fn test_log_sender_accepts_its_channel() {
        let sender = LogSender::new(ChannelType::Email);
        assert!(sender.send(&message(ChannelType::Email)).await.is_ok());
    }

    #[tokio::test]
    async fn test_sender_rejects_other_channel() {
        let sender = LogSender::new(ChannelType::Push);
        let err = sender.send(&message(ChannelType::Email)).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::WrongChannel {
                expected: ChannelType::Push,
                actual: ChannelType::Email
            }
        ));
    }
}
