/*
[INPUT]:  CLI arguments, YAML configuration file, OS shutdown signals
[OUTPUT]: Logged live price updates with graceful shutdown
[POS]:    Binary entry point
[UPDATE]: When changing CLI flags, startup flow, or shutdown handling
*/

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use price_stream_cli::WatchConfig;
use price_stream_client::PriceStreamClient;

#[derive(Parser, Debug)]
#[command(name = "price-stream", version, about = "Real-time price stream watcher")]
struct Cli {
    #[arg(long = "config", value_name = "PATH")]
    config_path: PathBuf,
    /// Override the configured stream URL
    #[arg(long = "url", value_name = "URL")]
    url: Option<String>,
    /// Extra symbol to watch (repeatable)
    #[arg(long = "symbol", value_name = "SYMBOL")]
    symbols: Vec<String>,
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    log_level: String,
    #[arg(long = "dry-run")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(&args.log_level)?;

    info!(
        config_path = %args.config_path.display(),
        dry_run = args.dry_run,
        "starting price-stream"
    );

    let config = load_config(&args.config_path)?
        .with_overrides(args.url.clone(), &args.symbols)?;
    info!(
        url = %config.stream.url,
        symbol_count = config.symbols.len(),
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry-run requested; configuration validated");
        return Ok(());
    }

    let client = PriceStreamClient::new(config.stream.clone());
    client.on_message(|update| {
        info!(
            symbol = %update.symbol,
            price = %update.price,
            change_percent = ?update.change_percent,
            volume = ?update.volume,
            "price update"
        );
    });
    client.on_connection_change(|connected| {
        if connected {
            info!("price stream live");
        } else {
            warn!("price stream offline");
        }
    });
    client.subscribe(&config.symbols);

    let shutdown = CancellationToken::new();
    setup_signal_handlers(shutdown.clone());

    if let Err(err) = client.connect().await {
        warn!(error = %err, "initial connect failed");
        if !err.is_retryable() {
            return Err(anyhow!(err)).context("connect to price stream");
        }
    }

    shutdown.cancelled().await;
    info!("shutdown signal received");

    client.disconnect();
    info!("price stream client shutdown complete");

    Ok(())
}

fn init_tracing(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).context("invalid log level")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
        .context("initialize tracing subscriber")?;
    Ok(())
}

fn load_config(path: &PathBuf) -> Result<WatchConfig> {
    let path_str = path
        .to_str()
        .context("config path must be valid utf-8")?;
    WatchConfig::from_file(path_str).context("load config")
}

fn setup_signal_handlers(shutdown: CancellationToken) {
    let shutdown_clone = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install SIGINT handler");
            return;
        }
        info!("received SIGINT");
        shutdown_clone.cancel();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let shutdown_clone = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("received SIGTERM");
                    shutdown_clone.cancel();
                }
                Err(err) => {
                    warn!(error = %err, "failed to install SIGTERM handler");
                }
            }
        });
    }
}
