//! Push notification dispatcher.
//!
//! Routes queued notifications to the appropriate platform path and holds
//! the shared state (config snapshot, client pool, counter sink) the
//! platform dispatchers run against.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::notification::{Platform, PushNotification};
use crate::push::pool::ClientPool;
use crate::stats::StatStorage;

/// Push notification dispatcher.
pub struct PushDispatcher {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) pool: ClientPool,
    pub(crate) stats: Arc<dyn StatStorage>,
}

impl PushDispatcher {
    /// Create a dispatcher.
    ///
    /// `proxy` configures the shared GCM/FCM transport; APNs connections
    /// never go through it. An unparseable proxy URL is an error.
    pub fn new(
        config: Arc<AppConfig>,
        stats: Arc<dyn StatStorage>,
        proxy: Option<&str>,
    ) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));

        if let Some(proxy) = proxy
            && !proxy.is_empty()
        {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::Gcm(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
            debug!("GCM/FCM transport using http proxy");
        }

        let http = builder.build()?;

        Ok(Self {
            pool: ClientPool::new(config.clone(), http),
            config,
            stats,
        })
    }

    /// Worker entry point: route one notification to its platform path.
    ///
    /// The response map is discarded; queued dispatch is fire-and-forget.
    pub async fn dispatch(&self, notification: PushNotification) {
        match notification.platform {
            Platform::Ios => {
                self.push_to_ios(notification).await;
            }
            Platform::Android => {
                let use_fcm = self
                    .config
                    .apps
                    .get(&notification.app_id)
                    .map(|app| app.android_fcm.enabled)
                    .unwrap_or(false);

                if use_fcm {
                    self.push_to_android_fcm(notification).await;
                } else {
                    self.push_to_android(notification).await;
                }
            }
        }
    }

    /// The app-level retry cap, lowered by a per-request override when the
    /// override is positive and strictly smaller.
    pub(crate) fn effective_max_retry(req: &PushNotification, app_max: u32) -> u32 {
        if req.retry > 0 && req.retry < app_max {
            req.retry
        } else {
            app_max
        }
    }
}

#[cfg(test)]
impl PushDispatcher {
    /// Dispatcher with GCM/FCM endpoints pointed at mock servers.
    pub(crate) fn for_tests(
        config: Arc<AppConfig>,
        stats: Arc<dyn StatStorage>,
        gcm_endpoint: impl Into<String>,
        fcm_endpoint: impl Into<String>,
    ) -> Self {
        let http = reqwest::Client::new();
        Self {
            pool: ClientPool::with_endpoints(config.clone(), http, gcm_endpoint, fcm_endpoint),
            config,
            stats,
        }
    }
}
