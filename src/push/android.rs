//! Android dispatch: GCM batch sends and per-token FCM sends.

use std::collections::HashMap;

use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::notification::{
    CompletionGuard, GcmNotification, PushNotification, PushResponse, STATUS_FAILED,
    check_message,
};
use crate::push::dispatcher::PushDispatcher;
use crate::push::gcm::GcmMessage;

/// Build the GCM batch message for a notification and the current token set.
pub fn android_notification(req: &PushNotification, tokens: &[String]) -> GcmMessage {
    let mut message = GcmMessage {
        to: req.to.clone(),
        registration_ids: tokens.to_vec(),
        collapse_key: req.collapse_key.clone(),
        content_available: req.content_available,
        delay_while_idle: req.delay_while_idle,
        time_to_live: req.time_to_live,
        restricted_package_name: req.restricted_package_name.clone(),
        dry_run: req.dry_run,
        ..GcmMessage::default()
    };

    if req.priority == "high" {
        message.priority = "high".to_string();
    }

    // platform-specific entries win on key collision
    for (key, value) in &req.data {
        message.data.insert(key.clone(), value.clone());
    }
    for (key, value) in &req.android_data {
        message.data.insert(key.clone(), value.clone());
    }

    let mut notification = req.notification.clone();
    if !req.message.is_empty() {
        notification.body = req.message.clone();
    }
    if !req.title.is_empty() {
        notification.title = req.title.clone();
    }
    if !req.sound.is_empty() {
        notification.sound = req.sound.clone();
    }
    message.notification = Some(notification);

    message
}

/// Build the FCM notification payload and data map for a notification.
pub fn fcm_notification(req: &PushNotification) -> (GcmNotification, HashMap<String, Value>) {
    let mut data = HashMap::new();
    for (key, value) in &req.data {
        data.insert(key.clone(), value.clone());
    }
    for (key, value) in &req.android_data {
        data.insert(key.clone(), value.clone());
    }

    let mut notification = GcmNotification::default();
    if !req.message.is_empty() {
        notification.body = req.message.clone();
        data.insert("Body".to_string(), json!(req.message));
    }
    if !req.title.is_empty() {
        notification.title = req.title.clone();
        data.insert("Title".to_string(), json!(req.title));
    }
    if !req.sound.is_empty() {
        notification.sound = req.sound.clone();
        data.insert("Sound".to_string(), json!(req.sound));
    }

    (notification, data)
}

impl PushDispatcher {
    /// Send one notification to GCM as a single multi-recipient batch.
    ///
    /// A transport failure is terminal for the whole batch; per-token
    /// rejections are retried as a smaller batch up to the effective cap.
    pub async fn push_to_android(
        &self,
        mut req: PushNotification,
    ) -> HashMap<String, PushResponse> {
        debug!("start push notification for Android");
        let _done = CompletionGuard::take(&mut req);

        let app_max = self
            .config
            .apps
            .get(&req.app_id)
            .map(|app| app.android.max_retry)
            .unwrap_or(0);
        let max_retry = Self::effective_max_retry(&req, app_max);

        let mut responses = HashMap::new();

        let api_key = if req.api_key.is_empty() {
            self.config
                .apps
                .get(&req.app_id)
                .map(|app| app.android.api_key.clone())
                .unwrap_or_default()
        } else {
            req.api_key.clone()
        };

        if let Err(e) = check_message(&req) {
            error!(error = %e, "request error");
            return responses;
        }

        let client = self.pool.gcm(&api_key);
        let mut tokens = req.tokens.clone();
        let mut retry_count = 0u32;

        loop {
            let message = android_notification(&req, &tokens);

            let reply = match client.send(&message).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, "GCM server error");
                    return responses;
                }
            };

            debug!(
                success = reply.success,
                failure = reply.failure,
                "Android batch delivered"
            );
            self.stats.add_android_success(reply.success).await;
            self.stats.add_android_error(reply.failure).await;

            let mut failed = Vec::new();
            for (index, result) in reply.results.iter().enumerate() {
                let Some(token) = tokens.get(index) else {
                    break;
                };

                let mut response = PushResponse::success();
                if !result.registration_id.is_empty() {
                    response.canonical_id = result.registration_id.clone();
                }

                if result.error.is_empty() {
                    info!(token = %token, "Android notification sent");
                } else {
                    response.status = STATUS_FAILED.to_string();
                    response.error = result.error.clone();
                    failed.push(token.clone());
                    error!(token = %token, error = %result.error, "Android push failed");
                }

                responses.insert(token.clone(), response);
            }

            if failed.is_empty() || retry_count >= max_retry {
                return responses;
            }

            // resend only the rejected registration ids
            retry_count += 1;
            tokens = failed;
        }
    }

    /// Send one notification through FCM, one request per token.
    pub async fn push_to_android_fcm(
        &self,
        mut req: PushNotification,
    ) -> HashMap<String, PushResponse> {
        debug!("start push notification for FCM");
        let _done = CompletionGuard::take(&mut req);

        let app_max = self
            .config
            .apps
            .get(&req.app_id)
            .map(|app| app.android_fcm.max_retry)
            .unwrap_or(0);
        let max_retry = Self::effective_max_retry(&req, app_max);

        let mut responses = HashMap::new();

        let client = match self.pool.fcm(&req.app_id) {
            Ok(client) => client,
            Err(e) => {
                error!(app_id = %req.app_id, error = %e, "FCM client unavailable");
                return responses;
            }
        };

        let (payload, data) = fcm_notification(&req);
        let mut tokens = req.tokens.clone();
        let mut retry_count = 0u32;

        loop {
            let mut failed = Vec::new();
            for token in &tokens {
                let message = GcmMessage {
                    to: token.clone(),
                    data: data.clone(),
                    notification: Some(payload.clone()),
                    ..GcmMessage::default()
                };

                match client.send(&message).await {
                    Err(e) => {
                        error!(token = %token, error = %e, "FCM push failed");
                        responses.insert(
                            token.clone(),
                            PushResponse {
                                status: STATUS_FAILED.to_string(),
                                canonical_id: String::new(),
                                error: e.to_string(),
                            },
                        );
                        failed.push(token.clone());
                    }
                    Ok(reply) => {
                        responses.insert(token.clone(), PushResponse::success());
                        if reply.ok() {
                            info!(token = %token, "FCM notification sent");
                        }
                    }
                }
            }

            if failed.is_empty() || retry_count >= max_retry {
                return responses;
            }

            retry_count += 1;
            tokens = failed;
        }
    }
}
