//! Configuration loading and management.
//!
//! Supports TOML configuration files with environment variable overrides.
//! Environment variables follow the pattern: `PUSHGATE_<SECTION>_<KEY>`

use std::collections::HashMap;
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Name of the app section used when a notification carries no AppID.
pub const APP_NAME_DEFAULT: &str = "normal";

/// Name of the app section synthesized from command line flags.
pub const APP_NAME_DYNAMIC: &str = "__dynamic_app";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Core gateway configuration.
    #[serde(default)]
    pub core: CoreConfig,

    /// Stat storage configuration.
    #[serde(default)]
    pub stat: StatConfig,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,

    /// Per-tenant app sections, keyed by AppID.
    #[serde(default)]
    pub apps: HashMap<String, SectionApp>,
}

/// Core gateway configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Port for the HTTP intake server.
    pub port: u16,

    /// Number of worker tasks consuming the notification queue.
    pub worker_num: usize,

    /// Capacity of the notification queue.
    pub queue_num: usize,

    /// When set, intake blocks until all queued notifications finish.
    pub sync: bool,

    /// Common directory prepended to per-app certificate paths.
    pub cert_dir: String,

    /// HTTP proxy URL, honored by the GCM/FCM transport only.
    pub http_proxy: String,

    /// Graceful shutdown timeout in seconds.
    pub shutdown_timeout_secs: u64,

    /// PID file configuration.
    pub pid: PidConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            port: 8088,
            worker_num: 8,
            queue_num: 8192,
            sync: false,
            cert_dir: String::new(),
            http_proxy: String::new(),
            shutdown_timeout_secs: 10,
            pid: PidConfig::default(),
        }
    }
}

/// PID file configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// Whether a PID file is written at startup.
    pub enabled: bool,

    /// PID file path.
    pub path: String,

    /// Overwrite an existing PID file instead of refusing to start.
    #[serde(rename = "override")]
    pub override_: bool,
}

/// Stat storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatConfig {
    /// Counter backend: "memory" or "redis".
    pub engine: String,

    /// Redis connection URL for the redis engine.
    pub redis_url: String,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            engine: "memory".to_string(),
            redis_url: "redis://127.0.0.1:6379/".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: "trace", "debug", "info", "warn", "error", "off".
    pub level: String,

    /// Log format: "json" or "pretty".
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Per-tenant app section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SectionApp {
    /// iOS (APNs) configuration.
    pub ios: IosConfig,

    /// Android (legacy GCM) configuration.
    pub android: AndroidConfig,

    /// Android (FCM) configuration.
    pub android_fcm: AndroidFcmConfig,
}

/// Per-app iOS configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IosConfig {
    /// Whether iOS pushes are enabled for the app.
    pub enabled: bool,

    /// Certificate path, appended to `core.cert_dir`. `.p12` or `.pem`.
    pub key_path: String,

    /// Certificate password.
    pub password: String,

    /// Target the APNs production host instead of development.
    pub production: bool,

    /// Maximum number of retry rounds for failed tokens.
    pub max_retry: u32,
}

/// Per-app Android (legacy GCM) configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Whether Android pushes are enabled for the app.
    pub enabled: bool,

    /// GCM API key.
    pub api_key: String,

    /// Maximum number of retry rounds for failed tokens.
    pub max_retry: u32,
}

/// Per-app Android (FCM) configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AndroidFcmConfig {
    /// Whether FCM routing is enabled for the app.
    pub enabled: bool,

    /// FCM API key.
    pub api_key: String,

    /// Maximum number of retry rounds for failed tokens.
    pub max_retry: u32,
}

impl AppConfig {
    /// Load configuration from a file path with environment variable overrides.
    ///
    /// Environment variables follow the pattern: `PUSHGATE_<SECTION>_<KEY>`
    /// For example: `PUSHGATE_CORE_PORT`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("PUSHGATE")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.ensure_default_app();
        Ok(config)
    }

    /// Load configuration from environment variables only (no config file).
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("PUSHGATE")
                    .separator("_")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: AppConfig = config.try_deserialize()?;
        config.ensure_default_app();
        Ok(config)
    }

    /// Built-in defaults with the `"normal"` app present but disabled.
    pub fn default_config() -> Self {
        let mut config = Self {
            core: CoreConfig::default(),
            stat: StatConfig::default(),
            log: LogConfig::default(),
            apps: HashMap::new(),
        };
        config.ensure_default_app();
        config
    }

    /// The `"normal"` app section must always exist after load.
    fn ensure_default_app(&mut self) {
        self.apps.entry(APP_NAME_DEFAULT.to_string()).or_default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    fn create_temp_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_minimal_config() {
        let config_content = r#"
            [core]
            port = 8000

            [apps.normal.android]
            enabled = true
            api_key = "key-123"
        "#;

        let file = create_temp_config(config_content);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.core.port, 8000);
        assert_eq!(config.core.worker_num, 8); // default
        assert_eq!(config.core.queue_num, 8192); // default
        assert!(!config.core.sync); // default
        assert!(config.apps["normal"].android.enabled);
        assert_eq!(config.apps["normal"].android.api_key, "key-123");
        assert!(!config.apps["normal"].ios.enabled);
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
            [core]
            port = 9000
            worker_num = 4
            queue_num = 512
            sync = true
            cert_dir = "/etc/pushgate/certs/"
            http_proxy = "http://proxy.internal:3128"
            shutdown_timeout_secs = 30

            [core.pid]
            enabled = true
            path = "/var/run/pushgate.pid"
            override = true

            [stat]
            engine = "redis"
            redis_url = "redis://stats.internal:6379/2"

            [log]
            level = "debug"
            format = "pretty"

            [apps.normal.ios]
            enabled = true
            key_path = "normal.pem"
            password = "secret"
            production = true
            max_retry = 3

            [apps.normal.android]
            enabled = true
            api_key = "gcm-key"
            max_retry = 2

            [apps.beta.android_fcm]
            enabled = true
            api_key = "fcm-key"
            max_retry = 1
        "#;

        let file = create_temp_config(config_content);
        let config = AppConfig::load(file.path()).unwrap();

        assert_eq!(config.core.port, 9000);
        assert_eq!(config.core.worker_num, 4);
        assert_eq!(config.core.queue_num, 512);
        assert!(config.core.sync);
        assert_eq!(config.core.cert_dir, "/etc/pushgate/certs/");
        assert_eq!(config.core.http_proxy, "http://proxy.internal:3128");
        assert_eq!(config.core.shutdown_timeout_secs, 30);
        assert!(config.core.pid.enabled);
        assert_eq!(config.core.pid.path, "/var/run/pushgate.pid");
        assert!(config.core.pid.override_);
        assert_eq!(config.stat.engine, "redis");
        assert_eq!(config.stat.redis_url, "redis://stats.internal:6379/2");
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "pretty");

        let normal = &config.apps["normal"];
        assert!(normal.ios.enabled);
        assert_eq!(normal.ios.key_path, "normal.pem");
        assert_eq!(normal.ios.password, "secret");
        assert!(normal.ios.production);
        assert_eq!(normal.ios.max_retry, 3);
        assert!(normal.android.enabled);
        assert_eq!(normal.android.max_retry, 2);

        let beta = &config.apps["beta"];
        assert!(beta.android_fcm.enabled);
        assert_eq!(beta.android_fcm.api_key, "fcm-key");
        assert!(!beta.android.enabled);
    }

    #[test]
    fn test_default_app_injected() {
        let config_content = r#"
            [apps.tenant-a.android]
            enabled = true
            api_key = "abc"
        "#;

        let file = create_temp_config(config_content);
        let config = AppConfig::load(file.path()).unwrap();

        // "normal" always exists, even when only other apps are configured
        assert!(config.apps.contains_key(APP_NAME_DEFAULT));
        assert!(!config.apps[APP_NAME_DEFAULT].android.enabled);
        assert!(config.apps.contains_key("tenant-a"));
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default_config();

        assert_eq!(config.core.port, 8088);
        assert_eq!(config.core.worker_num, 8);
        assert_eq!(config.core.queue_num, 8192);
        assert!(!config.core.sync);
        assert!(config.core.cert_dir.is_empty());
        assert_eq!(config.core.shutdown_timeout_secs, 10);
        assert!(!config.core.pid.enabled);
        assert_eq!(config.stat.engine, "memory");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, "json");
        assert!(config.apps.contains_key(APP_NAME_DEFAULT));
    }

    #[test]
    fn test_config_invalid_toml() {
        let config_content = "this is not valid toml {{{";

        let file = create_temp_config(config_content);
        let result = AppConfig::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_nonexistent_file() {
        let result = AppConfig::load("/nonexistent/path/to/config.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_section_app_defaults() {
        let app = SectionApp::default();
        assert!(!app.ios.enabled);
        assert!(app.ios.key_path.is_empty());
        assert!(!app.ios.production);
        assert_eq!(app.ios.max_retry, 0);
        assert!(!app.android.enabled);
        assert!(app.android.api_key.is_empty());
        assert!(!app.android_fcm.enabled);
    }
}
