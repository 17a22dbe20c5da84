//! cdn-router binary entry point.

use cdn_router::{telemetry, Config, Server};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Authoritative DNS server and HTTP redirector for CDN traffic routing.
#[derive(Parser, Debug)]
#[command(name = "cdn-router")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML).
    #[arg(short, long, default_value = "cdn-router.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config: Config = config::Config::builder()
        .add_source(config::File::from(args.config.clone()))
        .add_source(
            config::Environment::with_prefix("CDN_ROUTER")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    // Initialize telemetry
    telemetry::init(&config.telemetry).map_err(|e| e as Box<dyn std::error::Error>)?;

    info!(
        config_file = %args.config.display(),
        dns_listen = %config.router.dns_listen,
        http_listen = %config.router.http_listen,
        monitors = config.router.monitors.len(),
        "Starting cdn-router"
    );

    // Cancel the token on SIGINT/SIGTERM for a graceful shutdown.
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_stop_signal().await;
            info!("stop signal received");
            shutdown.cancel();
        }
    });

    let result = Server::new(config.router).run(shutdown).await;

    if let Err(e) = result {
        error!(error = %e, "cdn-router exited with error");
        return Err(e.into());
    }

    info!("cdn-router shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_stop_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_stop_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
