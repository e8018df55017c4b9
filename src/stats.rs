//! Aggregate push statistics.
//!
//! Dispatchers report per-token outcomes through the [`StatStorage`] trait;
//! the backend is selected once at startup. Counters are monotonic and
//! survive only as long as the chosen backend does.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;
use tracing::warn;

use crate::error::Result;

/// Key for the total accepted-token counter.
pub const TOTAL_COUNT_KEY: &str = "gorush-total-count";
/// Key for the iOS success counter.
pub const IOS_SUCCESS_KEY: &str = "gorush-ios-success-count";
/// Key for the iOS error counter.
pub const IOS_ERROR_KEY: &str = "gorush-ios-error-count";
/// Key for the Android success counter.
pub const ANDROID_SUCCESS_KEY: &str = "gorush-android-success-count";
/// Key for the Android error counter.
pub const ANDROID_ERROR_KEY: &str = "gorush-android-error-count";

/// Aggregate counter sink.
///
/// All add operations are atomic with respect to concurrent callers; reads
/// return the current value.
#[async_trait]
pub trait StatStorage: Send + Sync {
    async fn add_total_count(&self, n: u64);
    async fn add_ios_success(&self, n: u64);
    async fn add_ios_error(&self, n: u64);
    async fn add_android_success(&self, n: u64);
    async fn add_android_error(&self, n: u64);

    async fn total_count(&self) -> u64;
    async fn ios_success(&self) -> u64;
    async fn ios_error(&self) -> u64;
    async fn android_success(&self) -> u64;
    async fn android_error(&self) -> u64;
}

/// In-process atomic counter backend.
#[derive(Debug, Default)]
pub struct MemoryStats {
    total: AtomicU64,
    ios_success: AtomicU64,
    ios_error: AtomicU64,
    android_success: AtomicU64,
    android_error: AtomicU64,
}

#[async_trait]
impl StatStorage for MemoryStats {
    async fn add_total_count(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    async fn add_ios_success(&self, n: u64) {
        self.ios_success.fetch_add(n, Ordering::Relaxed);
    }

    async fn add_ios_error(&self, n: u64) {
        self.ios_error.fetch_add(n, Ordering::Relaxed);
    }

    async fn add_android_success(&self, n: u64) {
        self.android_success.fetch_add(n, Ordering::Relaxed);
    }

    async fn add_android_error(&self, n: u64) {
        self.android_error.fetch_add(n, Ordering::Relaxed);
    }

    async fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    async fn ios_success(&self) -> u64 {
        self.ios_success.load(Ordering::Relaxed)
    }

    async fn ios_error(&self) -> u64 {
        self.ios_error.load(Ordering::Relaxed)
    }

    async fn android_success(&self) -> u64 {
        self.android_success.load(Ordering::Relaxed)
    }

    async fn android_error(&self) -> u64 {
        self.android_error.load(Ordering::Relaxed)
    }
}

/// Redis-backed counter backend using `INCRBY` on well-known keys.
pub struct RedisStats {
    conn: redis::aio::MultiplexedConnection,
}

impl RedisStats {
    /// Connect to the redis instance at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }

    async fn incr(&self, key: &str, n: u64) {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<u64> = conn.incr(key, n).await;
        if let Err(e) = result {
            warn!(key, error = %e, "stat counter increment failed");
        }
    }

    async fn read(&self, key: &str) -> u64 {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<Option<u64>> = conn.get(key).await;
        match result {
            Ok(value) => value.unwrap_or(0),
            Err(e) => {
                warn!(key, error = %e, "stat counter read failed");
                0
            }
        }
    }
}

#[async_trait]
impl StatStorage for RedisStats {
    async fn add_total_count(&self, n: u64) {
        self.incr(TOTAL_COUNT_KEY, n).await;
    }

    async fn add_ios_success(&self, n: u64) {
        self.incr(IOS_SUCCESS_KEY, n).await;
    }

    async fn add_ios_error(&self, n: u64) {
        self.incr(IOS_ERROR_KEY, n).await;
    }

    async fn add_android_success(&self, n: u64) {
        self.incr(ANDROID_SUCCESS_KEY, n).await;
    }

    async fn add_android_error(&self, n: u64) {
        self.incr(ANDROID_ERROR_KEY, n).await;
    }

    async fn total_count(&self) -> u64 {
        self.read(TOTAL_COUNT_KEY).await
    }

    async fn ios_success(&self) -> u64 {
        self.read(IOS_SUCCESS_KEY).await
    }

    async fn ios_error(&self) -> u64 {
        self.read(IOS_ERROR_KEY).await
    }

    async fn android_success(&self) -> u64 {
        self.read(ANDROID_SUCCESS_KEY).await
    }

    async fn android_error(&self) -> u64 {
        self.read(ANDROID_ERROR_KEY).await
    }
}

/// Point-in-time view of all counters, as served by `/api/stat/app`.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StatSnapshot {
    pub total_count: u64,
    pub ios: PlatformCount,
    pub android: PlatformCount,
}

/// Success/error pair for one platform.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct PlatformCount {
    pub push_success: u64,
    pub push_error: u64,
}

/// Read every counter from the backend.
pub async fn snapshot(stats: &dyn StatStorage) -> StatSnapshot {
    StatSnapshot {
        total_count: stats.total_count().await,
        ios: PlatformCount {
            push_success: stats.ios_success().await,
            push_error: stats.ios_error().await,
        },
        android: PlatformCount {
            push_success: stats.android_success().await,
            push_error: stats.android_error().await,
        },
    }
}
