//! Push notification gateways.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::PushDeliveryError;

/// A notification addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    /// Key/value data handed to the app alongside the notification.
    pub data: BTreeMap<String, String>,
}

/// Sends push notifications to devices.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(
        &self,
        token: &str,
        notification: &PushNotification,
    ) -> Result<(), PushDeliveryError>;
}

#[derive(Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

/// Gateway that POSTs FCM-style JSON messages with a bearer key.
#[derive(Debug, Clone)]
pub struct HttpPushGateway {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpPushGateway {
    /// Creates a gateway for `endpoint` with a 10 second request timeout.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self, PushDeliveryError> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl PushGateway for HttpPushGateway {
    async fn send(
        &self,
        token: &str,
        notification: &PushNotification,
    ) -> Result<(), PushDeliveryError> {
        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &notification.title,
                    body: &notification.body,
                },
                data: &notification.data,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PushDeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Gateway that only logs, for local development.
#[derive(Debug, Clone, Default)]
pub struct LoggingPushGateway;

#[async_trait]
impl PushGateway for LoggingPushGateway {
    async fn send(
        &self,
        token: &str,
        notification: &PushNotification,
    ) -> Result<(), PushDeliveryError> {
        tracing::info!(
            device = %token_suffix(token),
            title = %notification.title,
            body = %notification.body,
            "Push notification"
        );
        Ok(())
    }
}

/// Gateway that records every push, for tests.
///
/// Tokens registered with [`fail_token`](Self::fail_token) are rejected.
#[derive(Debug, Clone, Default)]
pub struct RecordingPushGateway {
    sent: Arc<Mutex<Vec<(String, PushNotification)>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl RecordingPushGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send to `token` fail.
    pub async fn fail_token(&self, token: impl Into<String>) {
        self.failing.lock().await.push(token.into());
    }

    /// Returns the pushes delivered so far.
    pub async fn sent(&self) -> Vec<(String, PushNotification)> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send(
        &self,
        token: &str,
        notification: &PushNotification,
    ) -> Result<(), PushDeliveryError> {
        if self.failing.lock().await.iter().any(|t| t == token) {
            return Err(PushDeliveryError::Rejected {
                status: 404,
                body: "UNREGISTERED".to_string(),
            });
        }

        self.sent
            .lock()
            .await
            .push((token.to_string(), notification.clone()));
        Ok(())
    }
}

/// Last characters of a device token, safe to log.
pub(crate) fn token_suffix(token: &str) -> &str {
    let start = token
        .char_indices()
        .rev()
        .nth(4)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &token[start..]
}
