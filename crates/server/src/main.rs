//! outdial server entry point

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::path::PathBuf;

use outdial_config::Settings;
use outdial_server::{AppState, MediaStreamHandler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config_path = std::env::var("OUTDIAL_CONFIG").ok().map(PathBuf::from);
    let settings = Settings::load(config_path.as_deref())?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .map_err(|e| anyhow::anyhow!("prometheus exporter: {}", e))?;

    let state = AppState::build(settings).await?;

    let app = Router::new()
        .route("/media", get(MediaStreamHandler::handle))
        .merge(outdial_server::http::router())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    tracing::info!(%addr, "outdial listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.shutdown_background_tasks();
    state.transcoder_pool.drain().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,outdial=debug"));

    if std::env::var("OUTDIAL_LOG_JSON").is_ok() {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}
