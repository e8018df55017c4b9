//! iOS dispatch: APNs payload assembly and the per-token send/retry loop.

use std::collections::HashMap;

use serde_json::{Map, Value, json};
use tracing::{debug, error, info};

use crate::notification::{
    PushNotification, PushResponse, STATUS_APN_ERROR, STATUS_FAILED,
};
use crate::push::apns::ApnsNotification;
use crate::push::dispatcher::PushDispatcher;

/// APNs priority for notifications that may be coalesced or delayed for
/// power reasons. The default (unset) lets APNs deliver immediately.
pub const APNS_PRIORITY_LOW: u8 = 5;

/// Build the APNs request for a notification.
pub fn ios_notification(req: &PushNotification) -> ApnsNotification {
    ApnsNotification {
        apns_id: req.apns_id.clone(),
        topic: req.topic.clone(),
        expiration: (req.expiration > 0).then_some(req.expiration),
        priority: (req.priority == "normal").then_some(APNS_PRIORITY_LOW),
        payload: ios_payload(req),
    }
}

fn ios_payload(req: &PushNotification) -> Value {
    let mut root = Map::new();
    let mut aps = Map::new();

    if !req.message.is_empty() {
        aps.insert("alert".to_string(), Value::String(req.message.clone()));
    }

    // zero clears the badge on the app icon
    if let Some(badge) = req.badge
        && badge >= 0
    {
        aps.insert("badge".to_string(), json!(badge));
    }

    if req.mutable_content {
        aps.insert("mutable-content".to_string(), json!(1));
    }

    if !req.sound.is_empty() {
        aps.insert("sound".to_string(), Value::String(req.sound.clone()));
    }

    if req.content_available {
        aps.insert("content-available".to_string(), json!(1));
    }

    if !req.url_args.is_empty() {
        aps.insert("url-args".to_string(), json!(req.url_args));
    }

    // custom entries sit at the top level; platform-specific ones win
    for (key, value) in &req.data {
        root.insert(key.clone(), value.clone());
    }
    for (key, value) in &req.ios_data {
        root.insert(key.clone(), value.clone());
    }

    ios_alert_dictionary(&mut aps, req);

    root.insert("aps".to_string(), Value::Object(aps));
    Value::Object(root)
}

/// Write one alert dictionary field, promoting a plain alert string to a
/// dictionary if needed (the string is discarded, matching APNs payload
/// builder behavior).
fn set_alert_field(aps: &mut Map<String, Value>, key: &str, value: Value) {
    let alert = aps
        .entry("alert".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !alert.is_object() {
        *alert = Value::Object(Map::new());
    }
    if let Value::Object(fields) = alert {
        fields.insert(key.to_string(), value);
    }
}

fn ios_alert_dictionary(aps: &mut Map<String, Value>, req: &PushNotification) {
    if !req.title.is_empty() {
        set_alert_field(aps, "title", json!(req.title));
    }

    // the alert struct's title wins over the top-level one
    if !req.alert.title.is_empty() {
        set_alert_field(aps, "title", json!(req.alert.title));
    }

    // Apple Watch & Safari display this string as part of the notification.
    if !req.alert.subtitle.is_empty() {
        set_alert_field(aps, "subtitle", json!(req.alert.subtitle));
    }

    if !req.alert.title_loc_key.is_empty() {
        set_alert_field(aps, "title-loc-key", json!(req.alert.title_loc_key));
    }

    if !req.alert.loc_args.is_empty() {
        set_alert_field(aps, "loc-args", json!(req.alert.loc_args));
    }

    if !req.alert.title_loc_args.is_empty() {
        set_alert_field(aps, "title-loc-args", json!(req.alert.title_loc_args));
    }

    if !req.alert.body.is_empty() {
        set_alert_field(aps, "body", json!(req.alert.body));
    }

    if !req.alert.launch_image.is_empty() {
        set_alert_field(aps, "launch-image", json!(req.alert.launch_image));
    }

    if !req.alert.loc_key.is_empty() {
        set_alert_field(aps, "loc-key", json!(req.alert.loc_key));
    }

    if !req.alert.action.is_empty() {
        set_alert_field(aps, "action", json!(req.alert.action));
    }

    if !req.alert.action_loc_key.is_empty() {
        set_alert_field(aps, "action-loc-key", json!(req.alert.action_loc_key));
    }

    if !req.category.is_empty() {
        aps.insert("category".to_string(), json!(req.category));
    }
}

impl PushDispatcher {
    /// Send one notification to APNs, token by token.
    ///
    /// Failed tokens are retried as a group, up to the effective retry cap.
    /// Returns the per-token outcome map.
    pub async fn push_to_ios(
        &self,
        mut req: PushNotification,
    ) -> HashMap<String, PushResponse> {
        debug!("start push notification for iOS");
        let _done = crate::notification::CompletionGuard::take(&mut req);

        let app_max = self
            .config
            .apps
            .get(&req.app_id)
            .map(|app| app.ios.max_retry)
            .unwrap_or(0);
        let max_retry = Self::effective_max_retry(&req, app_max);

        let mut responses = HashMap::new();
        let mut tokens = req.tokens.clone();
        let mut retry_count = 0u32;

        loop {
            let notification = ios_notification(&req);

            let client = match self.pool.apns(&req.app_id).await {
                Ok(Some(client)) => client,
                Ok(None) => {
                    error!(app_id = %req.app_id, "no APNs client: iOS not enabled for app");
                    return responses;
                }
                Err(e) => {
                    error!(app_id = %req.app_id, error = %e, "APNs client init failed");
                    return responses;
                }
            };

            let mut failed = Vec::new();
            for token in &tokens {
                match client.push(&notification, token).await {
                    Err(e) => {
                        error!(token = %token, error = %e, "APNs transport error");
                        responses.insert(
                            token.clone(),
                            PushResponse {
                                status: STATUS_APN_ERROR.to_string(),
                                canonical_id: String::new(),
                                error: e.to_string(),
                            },
                        );
                        self.stats.add_ios_error(1).await;
                        failed.push(token.clone());
                    }
                    Ok(reply) if !reply.sent() => {
                        error!(
                            token = %token,
                            status = reply.status,
                            reason = %reply.reason,
                            "APNs rejected notification"
                        );
                        responses.insert(
                            token.clone(),
                            PushResponse {
                                status: STATUS_FAILED.to_string(),
                                canonical_id: String::new(),
                                error: reply.reason.clone(),
                            },
                        );
                        self.stats.add_ios_error(1).await;
                        failed.push(token.clone());
                    }
                    Ok(_) => {
                        info!(token = %token, "APNs notification sent");
                        responses.insert(token.clone(), PushResponse::success());
                        self.stats.add_ios_success(1).await;
                    }
                }
            }

            if failed.is_empty() || retry_count >= max_retry {
                return responses;
            }

            // replay only the tokens that failed this round
            retry_count += 1;
            tokens = failed;
        }
    }
}
