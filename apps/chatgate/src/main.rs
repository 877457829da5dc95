use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

/// Grace period for draining in-flight requests after a shutdown signal.
const DEFAULT_DRAIN_DEADLINE_SECS: u64 = 30;

fn drain_deadline() -> Duration {
    let secs = std::env::var("CHATGATE_DRAIN_DEADLINE")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(DEFAULT_DRAIN_DEADLINE_SECS);
    Duration::from_secs(secs)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let debug = args.debug_logging;
    init_tracing(debug);

    let config = args.into_patch().into_config()?;
    let bind = format!("{}:{}", config.host, config.listen_port);
    let boot = chatgate_core::bootstrap(config).await?;

    let app = chatgate_router::gateway_router(boot.engine.clone());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing(debug: bool) {
    let default_filter = if debug { "chatgate=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    let deadline = drain_deadline();
    info!(deadline_secs = deadline.as_secs(), "shutdown signal received; draining");

    // Force exit if draining overruns the grace period.
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        info!("drain deadline exceeded; aborting remaining requests");
        std::process::exit(0);
    });
}
