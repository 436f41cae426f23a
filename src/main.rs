use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::http::{router, AdmissionLayer, HttpServer};
use tollgate::ratelimit::{IdentityKey, LimiterFactory, LimiterRegistry};

/// Per-identity admission control in front of a demonstration HTTP handler.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Forward every request without consulting the limiters
    #[arg(long)]
    disable_rate_limit: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    info!("Starting Tollgate admission control service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TollgateConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if args.disable_rate_limit {
        config.rate_limiting.enabled = false;
    }
    config.validate()?;
    info!(
        listen_addr = %config.server.listen_addr,
        enabled = config.rate_limiting.enabled,
        "Configuration loaded"
    );

    // Invalid limiter parameters stop startup here.
    let factory = LimiterFactory::from_config(&config.rate_limiting)?;
    let registry = Arc::new(LimiterRegistry::new(move |identity: &IdentityKey| {
        factory.create(identity)
    }));
    info!("Limiter registry initialized");

    let sweeper = config
        .idle_ttl()
        .map(|ttl| registry.clone().spawn_sweeper(ttl));

    let admission = AdmissionLayer::new(registry).enabled(config.rate_limiting.enabled);
    let app = router(
        Duration::from_millis(config.server.handler_delay_ms),
        admission,
    );

    let server = HttpServer::bind(config.server.listen_addr, app).await?;
    info!("Listening on {}", server.local_addr()?);

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Tollgate admission control service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
