use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use txbroker::banner::{BannerInfo, print_banner};
use txbroker::broker::Broker;
use txbroker::config::BrokerConfig;
use txbroker::consts::{
    DEFAULT_ENGINE_PATH, DEFAULT_ENGINE_TIMEOUT_SECS, DEFAULT_MAX_JSON_BYTES,
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_PORT, UNBOUNDED_STALE_SCRATCH_SECS,
};
use txbroker::server;

#[derive(Parser)]
#[command(name = "txbroker", version, about = "HTTP front end for the transaction analyzer.")]
struct Cli {
    /// Address to bind
    #[arg(long, env = "TXBROKER_HOST", default_value = "0.0.0.0")]
    host: std::net::IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "TXBROKER_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to the analyzer engine
    #[arg(short, long, env = "TXBROKER_ENGINE", default_value = DEFAULT_ENGINE_PATH)]
    engine: PathBuf,

    /// Extra argument placed before the engine's own arguments (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG")]
    engine_args: Vec<OsString>,

    /// Directory for per-request scratch files (default: <tmp>/txbroker)
    #[arg(short, long, env = "TXBROKER_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Engine timeout in seconds (0 disables)
    #[arg(short, long, env = "TXBROKER_TIMEOUT", default_value_t = DEFAULT_ENGINE_TIMEOUT_SECS)]
    timeout: u64,

    /// Maximum JSON body size in bytes for /api/analyze
    #[arg(long, env = "TXBROKER_MAX_JSON_BYTES", default_value_t = DEFAULT_MAX_JSON_BYTES)]
    max_json_bytes: usize,

    /// Maximum upload size in bytes for /api/analyze-block
    #[arg(long, env = "TXBROKER_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> BrokerConfig {
        let defaults = BrokerConfig::default();
        BrokerConfig {
            listen: SocketAddr::new(self.host, self.port),
            engine_path: self.engine,
            engine_args: self.engine_args,
            scratch_root: self.scratch_dir.unwrap_or(defaults.scratch_root),
            engine_timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            max_json_bytes: self.max_json_bytes,
            max_upload_bytes: self.max_upload_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.into_config();
    config.validate()?;

    let broker = Arc::new(Broker::from_config(&config));
    // Anything older than the engine timeout cannot belong to a live request.
    let stale_after = config
        .engine_timeout
        .unwrap_or(Duration::from_secs(UNBOUNDED_STALE_SCRATCH_SECS));
    let swept = broker.scratch().sweep(stale_after).await;

    print_banner(&BannerInfo {
        listen: config.listen,
        engine: &config.engine_path,
        scratch_root: broker.scratch().root(),
        timeout: config.engine_timeout,
        max_upload_bytes: config.max_upload_bytes,
        swept,
    });

    let app = server::router(Arc::clone(&broker), &config);
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    info!(addr = %config.listen, "broker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("server error")?;

    Ok(())
}
