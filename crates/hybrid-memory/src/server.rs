//! HTTP server: builds the shared state, starts the periodic insight run and
//! serves the API until shutdown.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::{api, config::Config, metrics, shared_state::AppState};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    metrics::init_metrics();
    cfg.print_config();

    let state = AppState::build(&cfg)?;
    for adapter in state.orchestrator.refresh_health().await {
        info!("Adapter {} ({}): {}", adapter.name, adapter.kind.as_str(), adapter.health);
    }

    let insight_task = state.insights.clone().spawn_periodic();
    info!(
        "Insight engine running every {}s",
        state.insights.config().interval.as_secs()
    );

    let addr = cfg.api_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    insight_task.abort();
    served?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(api::healthz))
        .route("/status", get(api::status))
        .route("/metrics", get(metrics::get_metrics))
        .route("/memories", post(api::remember))
        .route("/memories/:id", get(api::memory_api::get_memory))
        .route("/memories/:id/related", get(api::get_related))
        .route("/memories/:id/chain", get(api::chain))
        .route("/recall", post(api::recall))
        .route("/relationships", post(api::relate))
        .route("/paths", get(api::paths))
        .route("/reflect", post(api::reflect))
        .route("/insights/pending", get(api::pending_insights))
        .route("/insights/:id/shown", post(api::mark_shown))
        .route("/insights/run", post(api::run_insights))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
