use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tokio::signal;
use tracing::info;

use relais::config;
use relais::proxy::{self, AppState};

const GRACEFUL_WAIT: Duration = Duration::from_secs(15);

/// Caching HTTP reverse proxy with per-route load balancing.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().init();

    let args = Args::parse();
    let cfg = config::load(&args.config)?;

    info!(
        "loaded config '{}', listen = {}",
        args.config.display(),
        cfg.listen
    );
    for prefix in cfg.prioritized() {
        if let Some(route) = cfg.route(prefix) {
            info!(
                "route {} -> {} backend(s), strategy {:?}, cache {}",
                prefix,
                route.backends.len(),
                route.strategy,
                if route.cache.is_some() { "on" } else { "off" },
            );
        }
    }

    let listen = cfg.listen;
    let tls = cfg.tls.clone();

    let state = AppState::from_config(cfg)?;
    let app = proxy::router(state.clone());
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone(), state));

    info!("reverse proxy listening on {listen}");
    match tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            axum_server::bind_rustls(listen, rustls)
                .handle(handle)
                .serve(make_service)
                .await?;
        }
        None => {
            axum_server::bind(listen)
                .handle(handle)
                .serve(make_service)
                .await?;
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle, state: AppState) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to install CTRL+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
    // Sweepers stop first so draining requests still see a live cache.
    state.shutdown_caches();
    handle.graceful_shutdown(Some(GRACEFUL_WAIT));
}
