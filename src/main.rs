use anyhow::{Context, Result};
use clap::Parser;
use static_server::config::ServerConfig;
use static_server::lifecycle::LifecycleManager;
use static_server::signal::{ShutdownBridge, ShutdownOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "static-server")]
#[command(about = "Start http server with static files!")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path of static files (default: ".")
    dir: Option<PathBuf>,

    /// Listening port of http server
    #[arg(short, long, default_value = "8000")]
    port: u16,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Allow index all directory
    #[arg(short, long)]
    index: bool,

    /// Support SPA mode, ignored when allowing index
    #[arg(short, long)]
    spa: bool,

    /// Enable proxy for /api, combine with --proxy to config
    #[arg(short, long)]
    api: bool,

    /// List of proxy for /api, separated by comma
    #[arg(short = 'x', long, default_value = "http://localhost:3000")]
    proxy: String,

    /// Forward /api/<path> to backends as /<path>
    #[arg(long)]
    strip_prefix: bool,

    /// Enable tls mode, combine with --cert and --key
    #[arg(short, long)]
    tls: bool,

    /// Path to tls cert
    #[arg(short, long, default_value = "cert.pem")]
    cert: PathBuf,

    /// Path to private key
    #[arg(short, long, default_value = "key.pem")]
    key: PathBuf,

    /// Load every setting from a TOML file instead of flags
    #[arg(long, env = "STATIC_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Write an access log to a file, or `-` for stdout
    #[arg(long)]
    access_log: Option<String>,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value = "5")]
    shutdown_timeout: u64,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        if let Some(ref path) = self.config {
            let mut config = ServerConfig::load(path)?;
            if let Some(dir) = self.dir {
                config.root = dir;
                config = config.resolve_root()?;
                config.validate()?;
            }
            return Ok(config);
        }

        let mut config = ServerConfig {
            root: self.dir.unwrap_or_default(),
            listen: format!("{}:{}", self.host, self.port),
            allow_index: self.index,
            spa_fallback: self.spa,
            api_proxy: self.api,
            shutdown_timeout_secs: self.shutdown_timeout,
            ..ServerConfig::default()
        };
        config.proxy.backends = ServerConfig::parse_backends(&self.proxy);
        config.proxy.strip_prefix = self.strip_prefix;
        config.tls.enabled = self.tls;
        config.tls.certificate = self.cert;
        config.tls.private_key = self.key;
        config.logging.access_log = self.access_log;

        let config = config.resolve_root()?;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    init_logging(args.verbose);

    match run(args).await {
        Ok(ShutdownOutcome::Graceful) => ExitCode::SUCCESS,
        Ok(ShutdownOutcome::TimedOut) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ShutdownOutcome> {
    let config = args.into_config()?;

    if config.spa_fallback && config.allow_index {
        warn!("SPA mode is ignored while directory index is enabled");
    }

    let scheme = config.scheme();
    let deadline = Duration::from_secs(config.shutdown_timeout_secs);
    info!(root = %config.root.display(), "Serving static files");

    let manager = LifecycleManager::global();
    let addr = manager.start(Arc::new(config)).await?;

    println!("Server is running at: {}://localhost:{}", scheme, addr.port());

    let bridge = ShutdownBridge::spawn(manager, deadline)
        .context("Failed to register signal handlers")?;

    bridge.await.context("Signal listener stopped unexpectedly")
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "static_server=debug"
    } else {
        "static_server=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();
}
