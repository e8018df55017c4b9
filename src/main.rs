//! Pushgate - multi-tenant push notification gateway.
//!
//! Accepts batched notification requests over HTTP and dispatches them to
//! APNs and GCM/FCM through a bounded worker pool, with per-token outcome
//! reporting and aggregate counters. A single-shot CLI mode sends one
//! notification directly, bypassing the queue.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod error;
mod metrics;
mod notification;
mod push;
mod server;
mod shutdown;
mod stats;

use config::{APP_NAME_DEFAULT, APP_NAME_DYNAMIC, AppConfig};
use metrics::Metrics;
use notification::{Platform, PushNotification, check_message};
use push::{PushDispatcher, PushQueue};
use server::{ApiServer, ApiState};
use shutdown::{ShutdownHandler, graceful_shutdown};
use stats::{MemoryStats, RedisStats, StatStorage};

/// Pushgate - push notification gateway for APNs and GCM/FCM
#[derive(Parser, Debug)]
#[command(name = "pushgate", about, disable_version_flag = true)]
struct Args {
    /// Port for the HTTP server
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Configuration file path
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Notification message
    #[arg(short = 'm', long)]
    message: Option<String>,

    /// Notification token
    #[arg(short = 't', long)]
    token: Option<String>,

    /// Notification title
    #[arg(long)]
    title: Option<String>,

    /// Proxy URL (only for GCM)
    #[arg(long)]
    proxy: Option<String>,

    /// PID file path
    #[arg(long)]
    pid: Option<String>,

    /// iOS certificate key file path
    #[arg(short = 'i', long = "key")]
    key: Option<String>,

    /// iOS certificate password
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// APNs topic
    #[arg(long)]
    topic: Option<String>,

    /// Send an iOS notification and exit
    #[arg(long)]
    ios: bool,

    /// Use the APNs production environment
    #[arg(long)]
    production: bool,

    /// Android API key
    #[arg(short = 'k', long = "apikey")]
    apikey: Option<String>,

    /// Send an Android notification and exit
    #[arg(long)]
    android: bool,

    /// App section to use
    #[arg(long, default_value = APP_NAME_DEFAULT)]
    app: String,

    /// Print version information
    #[arg(short = 'v', long)]
    version: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("pushgate {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => AppConfig::from_env().context("failed to load config from environment")?,
    };

    if let Some(port) = args.port {
        config.core.port = port;
    }

    if let Some(pid) = &args.pid {
        config.core.pid.path = pid.clone();
        config.core.pid.enabled = true;
        config.core.pid.override_ = true;
    }

    init_logging(&config.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting pushgate"
    );

    // synthesize the dynamic app from flags, starting from the selected
    // app section so flags only override what they name
    let mut dynamic = config.apps.get(&args.app).cloned().unwrap_or_default();
    if let Some(key) = &args.key {
        dynamic.ios.key_path = key.clone();
    }
    if let Some(password) = &args.password {
        dynamic.ios.password = password.clone();
    }
    if args.ios {
        dynamic.ios.enabled = true;
    }
    if args.production {
        dynamic.ios.production = true;
    }
    if let Some(apikey) = &args.apikey {
        dynamic.android.api_key = apikey.clone();
    }
    if args.android {
        dynamic.android.enabled = true;
    }
    config.apps.insert(APP_NAME_DYNAMIC.to_string(), dynamic);

    let proxy = args
        .proxy
        .clone()
        .or_else(|| (!config.core.http_proxy.is_empty()).then(|| config.core.http_proxy.clone()));

    let config = Arc::new(config);

    let stats = build_stats(&config).await?;
    let dispatcher = Arc::new(
        PushDispatcher::new(config.clone(), stats.clone(), proxy.as_deref())
            .context("set proxy error")?,
    );

    if args.android || args.ios {
        return run_single_shot(&args, dispatcher).await;
    }

    create_pid_file(&config)?;

    let metrics = Metrics::new()?;
    let queue = Arc::new(PushQueue::start(
        config.clone(),
        dispatcher,
        stats.clone(),
        metrics.clone(),
        config.core.worker_num,
        config.core.queue_num,
    ));

    let shutdown = ShutdownHandler::new();
    let api_server = ApiServer::new(
        config.core.port,
        Arc::new(ApiState {
            queue: queue.clone(),
            stats,
            metrics,
        }),
    );

    let server_shutdown = shutdown.subscribe();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run(server_shutdown).await {
            error!(error = %e, "API server error");
        }
    });

    info!(port = config.core.port, "pushgate running");

    shutdown.wait_for_signal().await;

    info!("initiating graceful shutdown");

    // close the queue and let workers finish in-flight dispatches
    graceful_shutdown(config.core.shutdown_timeout_secs, || async {
        queue.shutdown().await;
    })
    .await;

    let _ = server_handle.await;

    info!("pushgate stopped");
    Ok(())
}

/// Send one notification from command line flags, bypassing the queue.
async fn run_single_shot(args: &Args, dispatcher: Arc<PushDispatcher>) -> Result<()> {
    let token = args.token.clone().context("missing token flag (-t)")?;
    let message = args.message.clone().context("missing message flag (-m)")?;

    let platform = if args.android {
        Platform::Android
    } else {
        Platform::Ios
    };

    let mut req = PushNotification::new(vec![token], platform);
    req.message = message;
    req.app_id = APP_NAME_DYNAMIC.to_string();
    if let Some(title) = &args.title {
        req.title = title.clone();
    }
    if platform == Platform::Ios
        && let Some(topic) = &args.topic
    {
        req.topic = topic.clone();
    }

    check_message(&req).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let responses = match platform {
        Platform::Android => dispatcher.push_to_android(req).await,
        Platform::Ios => dispatcher.push_to_ios(req).await,
    };

    println!("{}", serde_json::to_string_pretty(&responses)?);
    Ok(())
}

/// Select the counter backend from configuration.
async fn build_stats(config: &AppConfig) -> Result<Arc<dyn StatStorage>> {
    match config.stat.engine.as_str() {
        "memory" => Ok(Arc::new(MemoryStats::default())),
        "redis" => {
            let stats = RedisStats::connect(&config.stat.redis_url)
                .await
                .with_context(|| {
                    format!("failed to connect stat redis at {}", config.stat.redis_url)
                })?;
            Ok(Arc::new(stats))
        }
        other => anyhow::bail!("unknown stat engine: {other}"),
    }
}

/// Write the PID file when enabled; refuse to clobber without `override`.
fn create_pid_file(config: &AppConfig) -> Result<()> {
    if !config.core.pid.enabled {
        return Ok(());
    }

    let path = Path::new(&config.core.pid.path);
    if path.exists() && !config.core.pid.override_ {
        anyhow::bail!("{} already exists", config.core.pid.path);
    }

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("can't create PID folder for {}", config.core.pid.path))?;
    }

    std::fs::write(path, std::process::id().to_string())
        .with_context(|| format!("can't write PID file {}", config.core.pid.path))?;

    Ok(())
}

/// Initialize the tracing subscriber based on configuration.
fn init_logging(config: &config::LogConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        "pretty" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty())
                .init();
        }
        "off" => {
            // no logging
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_single_shot_android() {
        let args = Args::parse_from([
            "pushgate", "--android", "-t", "token-1", "-m", "hello", "-k", "api-key",
        ]);
        assert!(args.android);
        assert!(!args.ios);
        assert_eq!(args.token.as_deref(), Some("token-1"));
        assert_eq!(args.message.as_deref(), Some("hello"));
        assert_eq!(args.apikey.as_deref(), Some("api-key"));
        assert_eq!(args.app, APP_NAME_DEFAULT);
    }

    #[test]
    fn test_args_parse_single_shot_ios() {
        let args = Args::parse_from([
            "pushgate",
            "--ios",
            "--production",
            "-i",
            "cert.pem",
            "-P",
            "secret",
            "--topic",
            "com.example.app",
            "-t",
            "tok",
            "-m",
            "msg",
        ]);
        assert!(args.ios);
        assert!(args.production);
        assert_eq!(args.key.as_deref(), Some("cert.pem"));
        assert_eq!(args.password.as_deref(), Some("secret"));
        assert_eq!(args.topic.as_deref(), Some("com.example.app"));
    }

    #[test]
    fn test_args_parse_server_mode() {
        let args = Args::parse_from(["pushgate", "-c", "conf.toml", "-p", "9000", "--pid", "/tmp/p.pid"]);
        assert_eq!(args.config.as_deref(), Some("conf.toml"));
        assert_eq!(args.port, Some(9000));
        assert_eq!(args.pid.as_deref(), Some("/tmp/p.pid"));
        assert!(!args.android && !args.ios);
    }

    #[test]
    fn test_args_version_flag() {
        let args = Args::parse_from(["pushgate", "-v"]);
        assert!(args.version);
    }

    #[tokio::test]
    async fn test_build_stats_memory() {
        let config = AppConfig::default_config();
        let stats = build_stats(&config).await.unwrap();
        stats.add_total_count(1).await;
        assert_eq!(stats.total_count().await, 1);
    }

    #[tokio::test]
    async fn test_build_stats_unknown_engine() {
        let mut config = AppConfig::default_config();
        config.stat.engine = "etcd".to_string();
        assert!(build_stats(&config).await.is_err());
    }

    #[test]
    fn test_create_pid_file_disabled_is_noop() {
        let config = AppConfig::default_config();
        assert!(create_pid_file(&config).is_ok());
    }

    #[test]
    fn test_create_pid_file_writes_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pushgate.pid");

        let mut config = AppConfig::default_config();
        config.core.pid.enabled = true;
        config.core.pid.path = path.to_string_lossy().to_string();

        create_pid_file(&config).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn test_create_pid_file_refuses_existing_without_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pushgate.pid");
        std::fs::write(&path, "12345").unwrap();

        let mut config = AppConfig::default_config();
        config.core.pid.enabled = true;
        config.core.pid.path = path.to_string_lossy().to_string();

        let err = create_pid_file(&config).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        config.core.pid.override_ = true;
        create_pid_file(&config).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }
}
