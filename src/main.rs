//! Server Shell (C7): parses CLI flags, loads the access policy, binds a
//! port, and installs the two routes this gateway understands.

use axum::Router;
use clap::Parser;
use tower_layer::layer_fn;
use tracing::info;

use crate::config::{Args, ServerContext};
use crate::layers::logger::LoggingMiddleware;

mod bridge;
mod classify;
mod config;
mod handlers;
mod layers;
mod policy;
mod repo;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let ctx = ServerContext::load(args)?;

    info!(gitbase = %ctx.gitbase.display(), realm = %ctx.realm, "starting gittornado");

    let app = Router::new()
        .fallback(handlers::dispatch)
        .layer(layer_fn(LoggingMiddleware))
        .with_state(ctx.clone());

    let addr = format!("0.0.0.0:{}", ctx.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {addr}: {e}"))?;

    info!(%addr, "listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    info!("shut down gracefully");

    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM so `main` returns `Ok(())` (exit code 0) on
/// an operator-requested shutdown instead of leaving the process to the OS's
/// default signal disposition, per SPEC_FULL.md §6.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
