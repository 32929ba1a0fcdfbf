use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use skirmish_backend::api;
use skirmish_backend::config::Config;
use skirmish_backend::dispatch::{DecisionDispatcher, KeyPool};
use skirmish_backend::engine::{ScenarioConfig, SimulationScheduler};
use skirmish_backend::metrics;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let config = Config::load();

    let scenario = match &config.scenario_path {
        Some(path) => ScenarioConfig::load(path).expect("Failed to load scenario"),
        None => ScenarioConfig::default(),
    };

    let pool = KeyPool::new(&config.decision_keys);
    if pool.is_empty() && config.dispatcher.premium.is_none() {
        tracing::warn!("No DECISION_KEYS configured; decision requests will fail");
    }
    tracing::info!(keys = pool.len(), endpoint = %config.dispatcher.standard.endpoint, "Decision dispatcher ready");
    let dispatcher = Arc::new(DecisionDispatcher::new(config.dispatcher.clone(), pool));

    let scheduler =
        SimulationScheduler::new(scenario, dispatcher.clone(), config.scheduler.clone())
            .expect("Invalid scenario");

    let mut app = api::router(scheduler, dispatcher);
    if let Some(dir) = &config.static_dir {
        tracing::info!("Serving static files from {}", dir.display());
        app = app.fallback_service(ServeDir::new(dir));
    }
    let app = app.layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!("Skirmish backend listening on port {}", config.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
