//! Notification request model and pre-dispatch validation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

/// Custom payload entries carried alongside a notification.
pub type Data = HashMap<String, Value>;

/// Response status for a delivered token.
pub const STATUS_SUCCESS: &str = "success";
/// Response status for a token rejected by the upstream service.
pub const STATUS_FAILED: &str = "failed";
/// Response status for a token that hit an APNs transport error.
pub const STATUS_APN_ERROR: &str = "apn_error";

/// Upper bound accepted for the GCM `time_to_live` field (4 weeks).
pub const MAX_TIME_TO_LIVE: u32 = 2_419_200;

/// Target platform of a notification. Encoded as 1 (iOS) or 2 (Android)
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Platform {
    Ios = 1,
    Android = 2,
}

impl Platform {
    /// Lowercase platform label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl TryFrom<u8> for Platform {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Platform::Ios),
            2 => Ok(Platform::Android),
            other => Err(format!("invalid platform: {other}")),
        }
    }
}

impl From<Platform> for u8 {
    fn from(platform: Platform) -> Self {
        platform as u8
    }
}

/// Apple alert dictionary fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Alert {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(rename = "action-loc-key", skip_serializing_if = "String::is_empty")]
    pub action_loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(rename = "launch-image", skip_serializing_if = "String::is_empty")]
    pub launch_image: String,
    #[serde(rename = "loc-args", skip_serializing_if = "Vec::is_empty")]
    pub loc_args: Vec<String>,
    #[serde(rename = "loc-key", skip_serializing_if = "String::is_empty")]
    pub loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub subtitle: String,
    #[serde(rename = "title-loc-args", skip_serializing_if = "Vec::is_empty")]
    pub title_loc_args: Vec<String>,
    #[serde(rename = "title-loc-key", skip_serializing_if = "String::is_empty")]
    pub title_loc_key: String,
}

/// GCM notification block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GcmNotification {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sound: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub badge: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub click_action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body_loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub body_loc_args: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_loc_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title_loc_args: String,
}

/// A batch of notification requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPush {
    pub notifications: Vec<PushNotification>,
}

/// A single notification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotification {
    // Common
    pub tokens: Vec<String>,
    pub platform: Platform,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub priority: String,
    #[serde(default)]
    pub content_available: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sound: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: Data,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_id: String,
    #[serde(default)]
    pub retry: u32,

    // Android
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collapse_key: String,
    #[serde(default)]
    pub delay_while_idle: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub restricted_package_name: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub notification: GcmNotification,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub android_data: Data,

    // iOS
    #[serde(default)]
    pub expiration: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub apns_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(rename = "url-args", default, skip_serializing_if = "Vec::is_empty")]
    pub url_args: Vec<String>,
    #[serde(default)]
    pub alert: Alert,
    #[serde(rename = "mutable-content", default)]
    pub mutable_content: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ios_data: Data,

    /// Completion handle attached by intake, signalled on dispatcher exit.
    #[serde(skip)]
    pub(crate) completion: Option<CompletionHandle>,
}

impl PushNotification {
    /// Create a bare notification for the given tokens and platform.
    pub fn new(tokens: Vec<String>, platform: Platform) -> Self {
        Self {
            tokens,
            platform,
            message: String::new(),
            title: String::new(),
            priority: String::new(),
            content_available: false,
            sound: String::new(),
            data: Data::new(),
            app_id: String::new(),
            retry: 0,
            api_key: String::new(),
            to: String::new(),
            collapse_key: String::new(),
            delay_while_idle: false,
            time_to_live: None,
            restricted_package_name: String::new(),
            dry_run: false,
            notification: GcmNotification::default(),
            android_data: Data::new(),
            expiration: 0,
            apns_id: String::new(),
            topic: String::new(),
            badge: None,
            category: String::new(),
            url_args: Vec::new(),
            alert: Alert::default(),
            mutable_content: false,
            ios_data: Data::new(),
            completion: None,
        }
    }
}

/// Per-token delivery outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canonical_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl PushResponse {
    /// A clean success entry.
    pub fn success() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            canonical_id: String::new(),
            error: String::new(),
        }
    }
}

/// Structural checks run before any dispatch.
pub fn check_message(req: &PushNotification) -> Result<()> {
    if req.tokens.is_empty() {
        let msg = "the message must specify at least one registration ID";
        debug!(msg);
        return Err(Error::Notification(msg.to_string()));
    }

    // only a lone token is checked for emptiness
    if req.tokens.len() == 1 && req.tokens[0].is_empty() {
        let msg = "the token must not be empty";
        debug!(msg);
        return Err(Error::Notification(msg.to_string()));
    }

    if req.platform == Platform::Android && req.tokens.len() > 1000 {
        let msg = "the message may specify at most 1000 registration IDs";
        debug!(msg);
        return Err(Error::Notification(msg.to_string()));
    }

    // ref: https://developers.google.com/cloud-messaging/http-server-ref
    if req.platform == Platform::Android
        && let Some(ttl) = req.time_to_live
        && ttl > MAX_TIME_TO_LIVE
    {
        let msg =
            "the message's TimeToLive field must be an integer between 0 and 2419200 (4 weeks)";
        debug!(msg);
        return Err(Error::Notification(msg.to_string()));
    }

    Ok(())
}

struct Latch {
    count: AtomicUsize,
    notify: Notify,
}

/// Counted latch used by intake to wait for dispatched notifications.
#[derive(Clone)]
pub struct CompletionGroup {
    inner: Arc<Latch>,
}

impl CompletionGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Latch {
                count: AtomicUsize::new(0),
                notify: Notify::new(),
            }),
        }
    }

    /// Register `n` pending notifications.
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::AcqRel);
    }

    /// Handle to attach to an outgoing notification.
    pub fn handle(&self) -> CompletionHandle {
        CompletionHandle {
            inner: self.inner.clone(),
        }
    }

    /// Wait until every registered notification has signalled done.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for CompletionGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Signals one registered notification as finished.
#[derive(Clone)]
pub struct CompletionHandle {
    inner: Arc<Latch>,
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("count", &self.inner.count.load(Ordering::Relaxed))
            .finish()
    }
}

impl CompletionHandle {
    pub fn done(&self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

/// Fires the notification's completion handle when dropped, covering every
/// dispatcher exit path.
pub(crate) struct CompletionGuard(Option<CompletionHandle>);

impl CompletionGuard {
    pub(crate) fn take(req: &mut PushNotification) -> Self {
        Self(req.completion.take())
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.done();
        }
    }
}
