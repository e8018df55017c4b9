//! Error types for Pushgate.

use thiserror::Error;

/// Main error type for Pushgate operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading or parsing error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// APNs client or certificate error.
    #[error("APNs error: {0}")]
    Apns(String),

    /// GCM upstream error.
    #[error("GCM error: {0}")]
    Gcm(String),

    /// FCM upstream error.
    #[error("FCM error: {0}")]
    Fcm(String),

    /// Notification failed pre-dispatch validation.
    #[error("{0}")]
    Notification(String),

    /// Stat storage backend error.
    #[error("Stat storage error: {0}")]
    Stat(#[from] redis::RedisError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metrics registration error.
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
