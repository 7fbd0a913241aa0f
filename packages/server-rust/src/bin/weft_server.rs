//! `weft-server` binary: parses configuration, installs telemetry, starts the
//! service host and serves HTTP until SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use weft_server::service::{
    ContextMode, DatabaseConfig, LaneConfig, LockNaming, MediaLimits, ServerConfig,
};
use weft_server::storage::MIN_LOCK_TOKEN_LEN;
use weft_server::telemetry::{self, LogFormat};
use weft_server::{DefaultBackends, LocalProcessor, NetworkConfig, NetworkModule, ServiceHost};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// One resource context for the process lifetime.
    Shared,
    /// A fresh resource context per operation.
    PerInvocation,
}

#[derive(Parser, Debug)]
#[command(name = "weft-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "WEFT_BIND", default_value = "0.0.0.0")]
    bind: String,

    /// HTTP port; 0 picks a free one.
    #[arg(long, env = "WEFT_PORT", default_value_t = 8080)]
    port: u16,

    /// Host name of this instance.
    #[arg(long, env = "WEFT_INSTANCE_HOST", default_value = "localhost")]
    instance_host: String,

    #[arg(long, env = "WEFT_INSTANCE_TITLE", default_value = "weft")]
    instance_title: String,

    /// Root directory for uploaded media.
    #[arg(long, env = "WEFT_STORAGE_ROOT", default_value = "storage")]
    storage_root: PathBuf,

    /// redb database file. Without it records live in memory.
    #[arg(long, env = "WEFT_DB_PATH")]
    db_path: Option<PathBuf>,

    #[arg(long, env = "WEFT_CONTEXT_MODE", value_enum, default_value_t = Mode::Shared)]
    context_mode: Mode,

    /// Name lock files with a random token of this length (5-64) instead
    /// of the invocation id.
    #[arg(long, env = "WEFT_LOCK_TOKEN_LEN",
          value_parser = clap::value_parser!(u64).range(5..=64))]
    lock_token_len: Option<u64>,

    #[arg(long, env = "WEFT_CLIENT_WORKERS", default_value_t = 2)]
    client_workers: usize,

    #[arg(long, env = "WEFT_FEDERATION_WORKERS", default_value_t = 2)]
    federation_workers: usize,

    #[arg(long, env = "WEFT_MAX_CONCURRENT_OPERATIONS", default_value_t = 1000)]
    max_concurrent_operations: u32,

    #[arg(long, env = "WEFT_OPERATION_TIMEOUT_MS", default_value_t = 30_000)]
    operation_timeout_ms: u64,

    /// Period of the cache sweep, in seconds.
    #[arg(long, env = "WEFT_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,

    /// Occupancy percentage each cache sweep trims down to.
    #[arg(long, env = "WEFT_SWEEP_THRESHOLD_PCT", default_value_t = 60,
          value_parser = clap::value_parser!(u8).range(0..=100))]
    sweep_threshold_pct: u8,

    /// Seconds shutdown waits for in-flight requests.
    #[arg(long, env = "WEFT_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    drain_timeout_secs: u64,

    #[arg(long, env = "WEFT_MAX_BODY_BYTES", default_value_t = 16 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Largest accepted image upload, in bytes.
    #[arg(long, env = "WEFT_MEDIA_IMAGE_MAX_BYTES", default_value_t = 10 * 1024 * 1024)]
    media_image_max_bytes: u64,

    /// Largest accepted video or audio upload, in bytes.
    #[arg(long, env = "WEFT_MEDIA_VIDEO_MAX_BYTES", default_value_t = 40 * 1024 * 1024)]
    media_video_max_bytes: u64,

    #[arg(long, env = "WEFT_MEDIA_DESCRIPTION_MIN_CHARS", default_value_t = 0)]
    media_description_min_chars: usize,

    #[arg(long, env = "WEFT_MEDIA_DESCRIPTION_MAX_CHARS", default_value_t = 1500)]
    media_description_max_chars: usize,

    /// Log output: pretty or json.
    #[arg(long, env = "WEFT_LOG_FORMAT", default_value = "pretty")]
    log_format: LogFormat,

    /// Filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Disable the Prometheus recorder.
    #[arg(long)]
    no_metrics: bool,

    /// Serve Prometheus metrics on a separate listener instead of `/metrics`.
    #[arg(long, env = "WEFT_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn database(&self) -> anyhow::Result<DatabaseConfig> {
        match &self.db_path {
            None => Ok(DatabaseConfig::Memory),
            #[cfg(feature = "redb")]
            Some(path) => Ok(DatabaseConfig::Redb { path: path.clone() }),
            #[cfg(not(feature = "redb"))]
            Some(_) => anyhow::bail!("--db-path requires the redb feature"),
        }
    }

    fn lock_naming(&self) -> anyhow::Result<LockNaming> {
        let Some(len) = self.lock_token_len else {
            return Ok(LockNaming::InvocationId);
        };
        let len = usize::try_from(len).context("--lock-token-len out of range")?;
        if len < MIN_LOCK_TOKEN_LEN {
            anyhow::bail!("--lock-token-len must be at least {MIN_LOCK_TOKEN_LEN}");
        }
        Ok(LockNaming::RandomToken { len })
    }

    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        Ok(ServerConfig {
            node_id: uuid::Uuid::new_v4().simple().to_string(),
            host: self.instance_host.clone(),
            instance_title: self.instance_title.clone(),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            sweep_threshold_pct: self.sweep_threshold_pct,
            database: self.database()?,
            storage_root: self.storage_root.clone(),
            lock_naming: self.lock_naming()?,
            lanes: LaneConfig {
                client_workers: self.client_workers.max(1),
                federation_workers: self.federation_workers.max(1),
                ..LaneConfig::default()
            },
            default_operation_timeout_ms: self.operation_timeout_ms,
            max_concurrent_operations: self.max_concurrent_operations,
            context_mode: match self.context_mode {
                Mode::Shared => ContextMode::Shared,
                Mode::PerInvocation => ContextMode::PerInvocation,
            },
            media: MediaLimits {
                image_max_bytes: self.media_image_max_bytes,
                video_max_bytes: self.media_video_max_bytes,
                description_min_chars: self.media_description_min_chars,
                description_max_chars: self.media_description_max_chars,
            },
            ..ServerConfig::default()
        })
    }

    fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.bind.clone(),
            port: self.port,
            max_body_bytes: self.max_body_bytes,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            ..NetworkConfig::default()
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM, only SIGINT stops the server"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    info!("received SIGINT");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    telemetry::init_tracing(args.log_format, &args.log_level)?;

    let metrics = if args.no_metrics {
        None
    } else {
        telemetry::install_metrics(args.metrics_addr)?
    };

    let config = Arc::new(args.server_config()?);
    info!(
        node = %config.node_id,
        instance = %config.host,
        mode = ?config.context_mode,
        "starting weft-server"
    );

    let cancel = CancellationToken::new();
    let host = ServiceHost::start(
        Arc::clone(&config),
        Arc::new(DefaultBackends::new()),
        Arc::new(LocalProcessor),
        cancel.clone(),
    )
    .await
    .context("service host failed to start")?;

    let mut network = NetworkModule::new(args.network_config(), Arc::new(host), metrics);
    let port = network.start().await?;
    info!(port, "weft-server listening");

    network.serve(shutdown_signal()).await?;
    cancel.cancel();
    info!("weft-server stopped");
    Ok(())
}
