//! Bounded notification queue and worker pool.
//!
//! Intake fans each notification of a request into a bounded channel;
//! `worker_num` long-running tasks consume it and invoke the platform
//! dispatcher. Enqueueing blocks when the channel is full.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::{APP_NAME_DEFAULT, AppConfig};
use crate::metrics::Metrics;
use crate::notification::{CompletionGroup, Platform, PushNotification, RequestPush};
use crate::push::dispatcher::PushDispatcher;
use crate::stats::StatStorage;

/// Notification queue with its attached worker pool.
pub struct PushQueue {
    config: Arc<AppConfig>,
    stats: Arc<dyn StatStorage>,
    metrics: Metrics,
    queue_num: usize,
    /// Taken (and thereby closed) on shutdown.
    tx: Mutex<Option<mpsc::Sender<PushNotification>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl PushQueue {
    /// Spawn `worker_num` workers over a channel of capacity `queue_num`.
    pub fn start(
        config: Arc<AppConfig>,
        dispatcher: Arc<PushDispatcher>,
        stats: Arc<dyn StatStorage>,
        metrics: Metrics,
        worker_num: usize,
        queue_num: usize,
    ) -> Self {
        debug!(worker_num, queue_num, "starting push workers");

        let (tx, rx) = mpsc::channel::<PushNotification>(queue_num);
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_num)
            .map(|_| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let metrics = metrics.clone();
                tokio::spawn(async move {
                    loop {
                        // hold the lock only while waiting for the next item
                        let notification = rx.lock().await.recv().await;
                        let Some(notification) = notification else {
                            break;
                        };
                        metrics.record_dispatched(notification.platform.as_str());
                        dispatcher.dispatch(notification).await;
                    }
                })
            })
            .collect();

        Self {
            config,
            stats,
            metrics,
            queue_num,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        }
    }

    /// Fan a request's notifications into the queue.
    ///
    /// Notifications for unknown apps or disabled platforms are skipped.
    /// Returns the number of device tokens accepted. When `core.sync` is
    /// set, the call returns only after every accepted notification has
    /// been dispatched.
    pub async fn enqueue(&self, req: RequestPush) -> usize {
        let Some(tx) = self.tx.lock().await.clone() else {
            warn!("queue is shut down, dropping request");
            return 0;
        };

        let group = CompletionGroup::new();
        let mut count = 0usize;

        for mut notification in req.notifications {
            if notification.app_id.is_empty() {
                notification.app_id = APP_NAME_DEFAULT.to_string();
            }

            let Some(app) = self.config.apps.get(&notification.app_id) else {
                error!(app_id = %notification.app_id, "unknown app");
                self.metrics.record_skipped("unknown_app");
                continue;
            };

            let enabled = match notification.platform {
                Platform::Ios => app.ios.enabled,
                Platform::Android => app.android.enabled || app.android_fcm.enabled,
            };
            if !enabled {
                self.metrics.record_skipped("platform_disabled");
                continue;
            }

            group.add(1);
            let handle = group.handle();
            notification.completion = Some(handle.clone());
            let tokens = notification.tokens.len();

            if self.tx_send(&tx, notification).await {
                count += tokens;
                self.metrics.record_enqueued();
            } else {
                // channel closed mid-request: release the registration
                handle.done();
                break;
            }
        }

        self.metrics
            .set_queue_depth(self.queue_num - tx.capacity());

        if self.config.core.sync {
            group.wait().await;
        }

        self.stats.add_total_count(count as u64).await;
        count
    }

    async fn tx_send(
        &self,
        tx: &mpsc::Sender<PushNotification>,
        notification: PushNotification,
    ) -> bool {
        if tx.send(notification).await.is_err() {
            warn!("queue closed while enqueueing");
            return false;
        }
        true
    }

    /// Close the queue and wait for workers to drain in-flight work.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().await.take();
        drop(tx);

        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task failed");
            }
        }
        debug!("push workers drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::APP_NAME_DEFAULT;
    use crate::notification::Platform;
    use crate::stats::MemoryStats;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(notifications: Vec<PushNotification>) -> RequestPush {
        RequestPush { notifications }
    }

    fn android_notification(tokens: &[&str], app_id: &str) -> PushNotification {
        let mut req = PushNotification::new(
            tokens.iter().map(|t| t.to_string()).collect(),
            Platform::Android,
        );
        req.app_id = app_id.to_string();
        req
    }

    async fn queue_with_gcm_mock(
        mock_uri: &str,
        sync: bool,
        worker_num: usize,
    ) -> (Arc<PushQueue>, Arc<MemoryStats>) {
        let mut config = AppConfig::default_config();
        config.core.sync = sync;
        let app = config.apps.get_mut(APP_NAME_DEFAULT).unwrap();
        app.android.enabled = true;
        app.android.api_key = "k".to_string();

        let config = Arc::new(config);
        let stats = Arc::new(MemoryStats::default());
        let dispatcher = Arc::new(PushDispatcher::for_tests(
            config.clone(),
            stats.clone(),
            format!("{mock_uri}/gcm/send"),
            "http://unused.invalid",
        ));

        let queue = Arc::new(PushQueue::start(
            config,
            dispatcher,
            stats.clone(),
            Metrics::new().unwrap(),
            worker_num,
            32,
        ));
        (queue, stats)
    }

    fn mock_gcm_success(tokens: usize) -> ResponseTemplate {
        let results: Vec<_> = (0..tokens).map(|i| json!({"message_id": format!("1:{i}")})).collect();
        ResponseTemplate::new(200).set_body_json(json!({
            "success": tokens,
            "failure": 0,
            "results": results
        }))
    }

    #[tokio::test]
    async fn test_enqueue_counts_tokens() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(2))
            .mount(&mock_server)
            .await;

        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), true, 2).await;

        let accepted = queue
            .enqueue(request(vec![android_notification(
                &["tA", "tB"],
                APP_NAME_DEFAULT,
            )]))
            .await;

        assert_eq!(accepted, 2);
        assert_eq!(stats.total_count().await, 2);
    }

    #[tokio::test]
    async fn test_enqueue_normalizes_empty_app_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(1))
            .expect(1)
            .mount(&mock_server)
            .await;

        let (queue, _stats) = queue_with_gcm_mock(&mock_server.uri(), true, 1).await;

        // no app_id: routed to the "normal" app
        let notification = android_notification(&["tA"], "");
        let accepted = queue.enqueue(request(vec![notification])).await;
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn test_enqueue_skips_unknown_app() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(2))
            .mount(&mock_server)
            .await;

        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), true, 1).await;

        let accepted = queue
            .enqueue(request(vec![
                android_notification(&["tA", "tB"], APP_NAME_DEFAULT),
                android_notification(&["tC"], "ghost"),
            ]))
            .await;

        // only the known app's tokens count
        assert_eq!(accepted, 2);
        assert_eq!(stats.total_count().await, 2);
    }

    #[tokio::test]
    async fn test_enqueue_skips_disabled_platform() {
        let mock_server = MockServer::start().await;
        let (queue, _stats) = queue_with_gcm_mock(&mock_server.uri(), false, 1).await;

        // iOS is disabled for "normal" in this fixture
        let mut notification = PushNotification::new(vec!["t".to_string()], Platform::Ios);
        notification.app_id = APP_NAME_DEFAULT.to_string();

        let accepted = queue.enqueue(request(vec![notification])).await;
        assert_eq!(accepted, 0);
    }

    #[tokio::test]
    async fn test_sync_enqueue_waits_for_dispatch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(1).set_delay(Duration::from_millis(100)))
            .expect(3)
            .mount(&mock_server)
            .await;

        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), true, 2).await;

        let accepted = queue
            .enqueue(request(vec![
                android_notification(&["t1"], APP_NAME_DEFAULT),
                android_notification(&["t2"], APP_NAME_DEFAULT),
                android_notification(&["t3"], APP_NAME_DEFAULT),
            ]))
            .await;

        assert_eq!(accepted, 3);
        // sync mode: every dispatch finished before enqueue returned
        assert_eq!(stats.android_success().await, 3);
    }

    #[tokio::test]
    async fn test_async_enqueue_returns_before_dispatch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(1).set_delay(Duration::from_millis(200)))
            .mount(&mock_server)
            .await;

        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), false, 1).await;

        let accepted = queue
            .enqueue(request(vec![android_notification(&["t1"], APP_NAME_DEFAULT)]))
            .await;

        assert_eq!(accepted, 1);
        // the worker is still sleeping on the mocked delay
        assert_eq!(stats.android_success().await, 0);

        queue.shutdown().await;
        assert_eq!(stats.android_success().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_notifications() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/gcm/send"))
            .respond_with(mock_gcm_success(1))
            .expect(4)
            .mount(&mock_server)
            .await;

        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), false, 1).await;

        let accepted = queue
            .enqueue(request(vec![
                android_notification(&["t1"], APP_NAME_DEFAULT),
                android_notification(&["t2"], APP_NAME_DEFAULT),
                android_notification(&["t3"], APP_NAME_DEFAULT),
                android_notification(&["t4"], APP_NAME_DEFAULT),
            ]))
            .await;
        assert_eq!(accepted, 4);

        queue.shutdown().await;
        assert_eq!(stats.android_success().await, 4);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_drops_request() {
        let mock_server = MockServer::start().await;
        let (queue, stats) = queue_with_gcm_mock(&mock_server.uri(), false, 1).await;

        queue.shutdown().await;

        let accepted = queue
            .enqueue(request(vec![android_notification(&["t"], APP_NAME_DEFAULT)]))
            .await;
        assert_eq!(accepted, 0);
        assert_eq!(stats.total_count().await, 0);
    }
}
