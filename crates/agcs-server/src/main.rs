//! AGCS Server - mission execution and live telemetry backend

use anyhow::Result;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use agcs_server::{api, config::Config, loops, persistence, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    let filter = EnvFilter::from_default_env().add_directive("agcs_server=debug".parse()?);
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting AGCS Server...");

    let db = persistence::init_database(&config.database_path, config.database_max_connections).await?;
    let port = config.server_port;
    let (state, queues) = AppState::build(config, db);

    let recovered = state.machine().recover_interrupted().await?;
    if recovered > 0 {
        tracing::warn!(recovered, "Paused missions interrupted by the previous shutdown");
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let loop_handles = loops::spawn_all(&state, queues, &shutdown_tx);

    let app = api::routes()
        .with_state(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let channel = state.channel().clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown requested");
            channel.close_all();
        })
        .await?;

    state.machine().shutdown().await;
    let _ = shutdown_tx.send(());
    for handle in loop_handles {
        if let Err(err) = handle.await {
            tracing::warn!("Background loop ended abnormally: {}", err);
        }
    }

    tracing::info!("AGCS Server stopped");
    Ok(())
}
