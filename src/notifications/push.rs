//! Web push message delivery.
//!
//! Encrypts notification payloads for one subscriber (RFC 8291,
//! `aes128gcm`) and POSTs them to the subscriber's push endpoint
//! (RFC 8030) with a VAPID Authorization header (RFC 8292).
//!
//! The transport reports the raw HTTP status and never decides what it
//! means; see [`super::classify`].

// Rust guideline compliant 2026-02

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::signer::Assertion;
use crate::store::SubscriberRecord;

/// Title used when a message is published without one.
pub const DEFAULT_TITLE: &str = "Notification";

/// Most bytes of a provider error body kept as diagnostic detail.
const MAX_DETAIL_LEN: usize = 512;

/// Notification shown by the subscriber's service worker.
///
/// Size limits are enforced before a payload reaches the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Notification title.
    pub title: String,
    /// Notification body text.
    pub message: String,
    /// Where a click on the notification navigates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_url: Option<String>,
}

impl NotificationPayload {
    /// Build a payload, defaulting an empty title when a message is present.
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        click_url: Option<String>,
    ) -> Self {
        let mut title = title.into();
        let message = message.into();
        if title.is_empty() && !message.is_empty() {
            title = DEFAULT_TITLE.to_string();
        }
        Self {
            title,
            message,
            click_url: click_url.filter(|url| !url.is_empty()),
        }
    }

    /// Serialized bytes that get encrypted for each subscriber.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

/// What the push provider answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PushResponse {
    /// HTTP status code.
    pub status: u16,
    /// Provider response body for non-2xx answers, truncated.
    pub detail: Option<String>,
}

/// Failure to get any HTTP status out of the provider.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The per-request deadline elapsed.
    #[error("push request timed out")]
    Timeout,
    /// Connection, TLS, or protocol failure.
    #[error("push request failed: {0}")]
    Network(String),
    /// Subscriber key material could not be used to encrypt the payload.
    #[error("failed to encrypt push payload: {0}")]
    Encryption(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// One-shot delivery of an encrypted payload to one subscriber.
#[async_trait]
pub trait PushTransport: Send + Sync + std::fmt::Debug {
    /// Encrypt `payload` for `subscriber` and send it with `assertion`.
    async fn deliver(
        &self,
        subscriber: &SubscriberRecord,
        payload: &[u8],
        assertion: &Assertion,
    ) -> Result<PushResponse, TransportError>;
}

/// Production transport: `web-push` for encryption, `reqwest` for HTTP.
///
/// Reuse one instance for a whole process so connections are pooled.
#[derive(Debug, Clone)]
pub struct WebPushTransport {
    client: reqwest::Client,
    message_ttl: u32,
}

impl WebPushTransport {
    /// Build a transport whose requests give up after `timeout`.
    ///
    /// `message_ttl` is sent as the `TTL` header: how long the provider keeps
    /// the message for an offline device.
    pub fn new(timeout: Duration, message_ttl: u32) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, message_ttl))
    }

    /// Use a preconfigured client.
    pub fn with_client(client: reqwest::Client, message_ttl: u32) -> Self {
        Self {
            client,
            message_ttl,
        }
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(
        &self,
        subscriber: &SubscriberRecord,
        payload: &[u8],
        assertion: &Assertion,
    ) -> Result<PushResponse, TransportError> {
        use web_push::{ContentEncoding, SubscriptionInfo, WebPushMessageBuilder};

        let sub_info = SubscriptionInfo::new(
            subscriber.endpoint.as_str(),
            subscriber.keys.p256dh.as_str(),
            subscriber.keys.auth.as_str(),
        );

        let mut builder = WebPushMessageBuilder::new(&sub_info);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_ttl(self.message_ttl);
        let message = builder
            .build()
            .map_err(|e| TransportError::Encryption(e.to_string()))?;

        // The assertion is signed per provider profile before delivery, so
        // it is attached here rather than through the message builder.
        let mut request = self
            .client
            .post(subscriber.endpoint.as_str())
            .header("Authorization", assertion.authorization_header())
            .header("TTL", message.ttl.to_string());

        if let Some(urgency) = assertion.urgency {
            request = request.header("Urgency", urgency.as_str());
        }

        if let Some(push_payload) = message.payload {
            request = request
                .header("Content-Encoding", push_payload.content_encoding.to_str())
                .header("Content-Type", "application/octet-stream");

            for (key, value) in &push_payload.crypto_headers {
                request = request.header(*key, value.as_str());
            }

            request = request.body(push_payload.content);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        let detail = if response.status().is_success() {
            None
        } else {
            read_detail(response).await
        };

        Ok(PushResponse { status, detail })
    }
}

/// Read at most [`MAX_DETAIL_LEN`] bytes of an error body.
async fn read_detail(mut response: reqwest::Response) -> Option<String> {
    let mut body = Vec::new();
    while body.len() <= MAX_DETAIL_LEN {
        match response.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                log::debug!("[WebPush] Failed to read error body: {}", e);
                break;
            }
        }
    }

    let truncated = body.len() > MAX_DETAIL_LEN;
    body.truncate(MAX_DETAIL_LEN);
    let text = String::from_utf8_lossy(&body);
    let text = text.trim();
    if text.is_empty() {
        None
    } else if truncated {
        Some(format!("{text}..."))
    } else {
        Some(text.to_string())
    }
}
