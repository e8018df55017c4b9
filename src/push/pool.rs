//! Per-tenant client pool with lazy initialization.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::push::apns::ApnsClient;
use crate::push::gcm::{FCM_SEND_URL, GCM_SEND_URL, GcmClient};

/// Lazily-initialized upstream clients, keyed by AppID.
///
/// APNs clients are expensive (certificate load, dedicated HTTP/2
/// connection pool) and live for the process lifetime once created. The
/// GCM/FCM clients are cheap wrappers over one shared transport and are
/// constructed per call.
pub struct ClientPool {
    config: Arc<AppConfig>,
    /// Shared GCM/FCM transport; the only client honoring the proxy.
    http: reqwest::Client,
    gcm_endpoint: String,
    fcm_endpoint: String,
    apns: RwLock<HashMap<String, Option<Arc<ApnsClient>>>>,
}

impl ClientPool {
    pub fn new(config: Arc<AppConfig>, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            gcm_endpoint: GCM_SEND_URL.to_string(),
            fcm_endpoint: FCM_SEND_URL.to_string(),
            apns: RwLock::new(HashMap::new()),
        }
    }

    /// APNs client for the tenant.
    ///
    /// `Ok(None)` means iOS is disabled (or unknown) for the app; that
    /// outcome is cached like a live client. Initialization errors are not
    /// cached, so a later call retries.
    pub async fn apns(&self, app_id: &str) -> Result<Option<Arc<ApnsClient>>> {
        {
            let clients = self.apns.read().await;
            if let Some(entry) = clients.get(app_id) {
                return Ok(entry.clone());
            }
        }

        // double-checked insert: another task may have won the race
        let mut clients = self.apns.write().await;
        if let Some(entry) = clients.get(app_id) {
            return Ok(entry.clone());
        }

        let entry = self.init_apns(app_id).await?;
        clients.insert(app_id.to_string(), entry.clone());
        debug!(app_id, initialized = entry.is_some(), "APNs pool entry stored");
        Ok(entry)
    }

    async fn init_apns(&self, app_id: &str) -> Result<Option<Arc<ApnsClient>>> {
        let Some(app) = self.config.apps.get(app_id) else {
            return Ok(None);
        };
        if !app.ios.enabled {
            return Ok(None);
        }

        let client = ApnsClient::new(&self.config.core.cert_dir, &app.ios).await?;
        Ok(Some(Arc::new(client)))
    }

    /// FCM client for the tenant; constructed per call.
    pub fn fcm(&self, app_id: &str) -> Result<GcmClient> {
        let Some(app) = self.config.apps.get(app_id).filter(|a| a.android_fcm.enabled) else {
            return Err(Error::Fcm("FCM not enabled".to_string()));
        };

        Ok(GcmClient::new(
            self.http.clone(),
            app.android_fcm.api_key.clone(),
            self.fcm_endpoint.clone(),
        ))
    }

    /// GCM client for an effective API key (request override or app config).
    pub fn gcm(&self, api_key: &str) -> GcmClient {
        GcmClient::new(self.http.clone(), api_key, self.gcm_endpoint.clone())
    }
}

#[cfg(test)]
impl ClientPool {
    pub(crate) fn with_endpoints(
        config: Arc<AppConfig>,
        http: reqwest::Client,
        gcm_endpoint: impl Into<String>,
        fcm_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            config,
            http,
            gcm_endpoint: gcm_endpoint.into(),
            fcm_endpoint: fcm_endpoint.into(),
            apns: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert_apns(&self, app_id: &str, client: Option<Arc<ApnsClient>>) {
        self.apns
            .write()
            .await
            .insert(app_id.to_string(), client);
    }
}
