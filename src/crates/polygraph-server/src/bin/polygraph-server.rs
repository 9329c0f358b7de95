//! polygraph HTTP server binary
//!
//! Wires the inference core to the axum transport: async latency observer
//! over the tracing sink, CEL-backed engine, bounded policy cache, then
//! serves `POST /infer` until ctrl-c and drains the observer on the way out.

use std::sync::Arc;

use polygraph_core::eval::CelEvaluator;
use polygraph_core::{
    AsyncNodeLatencyObserver, Compiler, Engine, InferenceService, PolicyCache,
    TracingNodeLatencyObserver,
};
use polygraph_server::api::routes::create_router;
use polygraph_server::config::RuntimeConfig;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(rust_log).init();

    let config = RuntimeConfig::load();
    tracing::info!(
        cache_max_items = config.cache_max_items,
        max_steps = config.policy_max_steps,
        obs_buffer = config.obs_buffer,
        "starting polygraph server"
    );

    let observer = Arc::new(AsyncNodeLatencyObserver::new(
        Arc::new(TracingNodeLatencyObserver),
        config.obs_buffer,
    ));

    let engine = Engine::new(Arc::new(CelEvaluator))
        .with_observer(observer.clone())
        .with_max_steps(config.policy_max_steps);

    let service = Arc::new(InferenceService::new(
        Compiler::new(),
        engine,
        Arc::new(PolicyCache::new(config.cache_max_items)),
    ));

    let app = create_router(service);
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    tracing::info!(addr = %config.http_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    observer.close().await;
    tracing::info!(dropped = observer.dropped(), "latency observer drained");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
