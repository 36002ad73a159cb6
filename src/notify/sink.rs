//! Push channels that alerts are delivered through

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;

use crate::registry::{NotificationConfig, Provider};
use crate::state::{AlertEvent, Status};

/// What is actually pushed for one alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub target: String,
    pub address: String,
    pub previous: Status,
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub title: String,
    pub message: String,
    /// Duplicates dropped since the last alert for the same key
    pub suppressed: u32,
}

impl Notification {
    pub fn from_event(event: &AlertEvent, suppressed: u32) -> Self {
        let mut message = event.body();
        if suppressed > 0 {
            message.push_str(&format!("\n({suppressed} duplicate alerts suppressed)"));
        }
        Self {
            target: event.target.clone(),
            address: event.address.clone(),
            previous: event.previous,
            status: event.status,
            timestamp: event.timestamp,
            reason: event.reason.clone(),
            title: event.title(),
            message,
            suppressed,
        }
    }
}

/// A push channel
#[async_trait]
pub trait PushSink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Perform one delivery attempt
    async fn push(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Delivery attempt errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Push endpoint returned status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Push rejected: {0}")]
    Rejected(String),

    #[error("Client error: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Transient errors are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Network(_) => true,
            DeliveryError::Status { code, .. } => {
                *code >= 500
                    || *code == StatusCode::REQUEST_TIMEOUT.as_u16()
                    || *code == StatusCode::TOO_MANY_REQUESTS.as_u16()
            }
            DeliveryError::Rejected(_) | DeliveryError::Client(_) => false,
        }
    }

    /// The URL is dropped: a ServerChan path carries the credential
    fn from_reqwest(e: reqwest::Error) -> Self {
        let e = e.without_url();
        if e.is_builder() {
            DeliveryError::Client(e.to_string())
        } else {
            DeliveryError::Network(e.to_string())
        }
    }
}

/// Build the sink for `config`, or `None` when no credential is set
pub fn build_sink(config: &NotificationConfig) -> Result<Option<Arc<dyn PushSink>>, DeliveryError> {
    let Some(credential) = config.credential.clone() else {
        return Ok(None);
    };

    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .user_agent(concat!("pulsewatch/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| DeliveryError::Client(e.to_string()))?;

    let sink: Arc<dyn PushSink> = match config.provider {
        Provider::Webhook => Arc::new(WebhookSink::new(client, &config.endpoint, credential)),
        Provider::ServerChan => Arc::new(ServerChanSink::new(client, &config.endpoint, credential)),
    };
    Ok(Some(sink))
}

/// JSON POST with a bearer credential
pub struct WebhookSink {
    client: reqwest::Client,
    endpoint: String,
    credential: String,
}

impl WebhookSink {
    pub fn new(client: reqwest::Client, endpoint: &str, credential: String) -> Self {
        Self {
            client,
            endpoint: endpoint.to_string(),
            credential,
        }
    }
}

#[async_trait]
impl PushSink for WebhookSink {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn push(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.credential)
            .json(notification)
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        check_status(response).await?;

        tracing::debug!(
            target_name = %notification.target,
            endpoint = %self.endpoint,
            "Webhook notification sent"
        );
        Ok(())
    }
}

/// ServerChan style push: form POST of `title` and `desp` to
/// `{endpoint}/{credential}.send`
pub struct ServerChanSink {
    client: reqwest::Client,
    endpoint: String,
    credential: String,
}

impl ServerChanSink {
    pub fn new(client: reqwest::Client, endpoint: &str, credential: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credential,
        }
    }

    fn url(&self) -> String {
        format!("{}/{}.send", self.endpoint, self.credential)
    }
}

#[async_trait]
impl PushSink for ServerChanSink {
    fn name(&self) -> &'static str {
        "serverchan"
    }

    async fn push(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let form = [
            ("title", notification.title.as_str()),
            ("desp", notification.message.as_str()),
        ];
        let response = self
            .client
            .post(self.url())
            .form(&form)
            .send()
            .await
            .map_err(DeliveryError::from_reqwest)?;

        let body = check_status(response).await?;

        // The service answers 200 with a JSON `code`; non-zero means refused
        if let Ok(reply) = serde_json::from_str::<serde_json::Value>(&body) {
            if let Some(code) = reply.get("code").and_then(|c| c.as_i64()) {
                if code != 0 {
                    let message = reply
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error");
                    return Err(DeliveryError::Rejected(format!("code {code}: {message}")));
                }
            }
        }

        tracing::debug!(target_name = %notification.target, "ServerChan notification sent");
        Ok(())
    }
}

/// Map a non-success status to an error, otherwise return the body
async fn check_status(response: reqwest::Response) -> Result<String, DeliveryError> {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        Ok(body)
    } else {
        Err(DeliveryError::Status {
            code: status.as_u16(),
            body: truncate(&body, 200),
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
