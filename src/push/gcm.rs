//! Legacy GCM/FCM HTTP client.
//!
//! API-key authenticated JSON endpoint. A message either targets up to
//! 1000 `registration_ids` at once (batch form) or a single `to` recipient.

use std::collections::HashMap;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::notification::GcmNotification;

/// GCM batch send endpoint.
pub const GCM_SEND_URL: &str = "https://gcm-http.googleapis.com/gcm/send";

/// FCM legacy send endpoint.
pub const FCM_SEND_URL: &str = "https://fcm.googleapis.com/fcm/send";

/// Outgoing GCM/FCM message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcmMessage {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub registration_ids: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub collapse_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub priority: String,
    #[serde(skip_serializing_if = "is_false")]
    pub content_available: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub delay_while_idle: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub restricted_package_name: String,
    #[serde(skip_serializing_if = "is_false")]
    pub dry_run: bool,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<GcmNotification>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Upstream response for a batch or single send.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(dead_code)]
pub struct GcmResponse {
    #[serde(default)]
    pub multicast_id: i64,
    #[serde(default)]
    pub success: u64,
    #[serde(default)]
    pub failure: u64,
    #[serde(default)]
    pub canonical_ids: u64,
    #[serde(default)]
    pub results: Vec<GcmResult>,
}

impl GcmResponse {
    /// Whether at least one recipient was accepted.
    pub fn ok(&self) -> bool {
        self.success > 0
    }
}

/// Per-recipient result, aligned by index with the sent registration ids.
#[derive(Debug, Clone, Default, Deserialize)]
#[allow(dead_code)]
pub struct GcmResult {
    #[serde(default)]
    pub message_id: String,
    /// Canonical registration id, set when the client's token was rotated.
    #[serde(default)]
    pub registration_id: String,
    #[serde(default)]
    pub error: String,
}

/// GCM/FCM client bound to one API key.
#[derive(Debug)]
pub struct GcmClient {
    http: Client,
    api_key: String,
    endpoint: String,
}

impl GcmClient {
    pub fn new(http: Client, api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            endpoint: endpoint.into(),
        }
    }

    /// Submit one message; a non-2xx response is a whole-batch failure.
    pub async fn send(&self, message: &GcmMessage) -> Result<GcmResponse> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("authorization", format!("key={}", self.api_key))
            .json(message)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Gcm(format!("send failed: {status} - {body}")));
        }

        Ok(response.json().await?)
    }
}
