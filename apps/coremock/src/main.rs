use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use coremock_service::config::Config;

#[derive(Debug, Parser)]
#[command(name = "coremock-service", about = "Mock runtime backend for agent end-to-end tests")]
struct Args {
    /// Listen address; overrides COREMOCK_BIND_ADDR and PORT.
    #[arg(long)]
    bind_addr: Option<SocketAddr>,
    /// Delay before a timed-out request fails; overrides COREMOCK_TIMEOUT_DELAY_MS.
    #[arg(long)]
    timeout_delay_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(timeout_delay_ms) = args.timeout_delay_ms {
        config.timeout_delay_ms = timeout_delay_ms;
    }

    init_tracing(config.log_json);
    coremock_service::serve(config, shutdown_signal()).await
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(reason = %error, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(reason = %error, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
