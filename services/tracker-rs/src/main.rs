use prometheus::Registry;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tracker::{
    config::Config, coordinator::DeliveryCoordinator, metrics::AppMetrics, router,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        app = %config.app_name,
        env = %config.app_env,
        transport = %config.transport(),
        topic = %config.topic,
        "starting tracker-rs"
    );
    if !config.kafka_available() {
        tracing::warn!("no broker configured, events will be logged only");
    }

    // Prometheus
    let registry = Registry::new();
    let app_metrics = Arc::new(AppMetrics::new(&registry)?);

    // Producer connects lazily on the first event.
    let coordinator = Arc::new(DeliveryCoordinator::from_config(
        &config,
        Arc::clone(&app_metrics),
    ));

    let addr = config.bind_addr.clone();
    let state = AppState::new(config, Arc::clone(&coordinator), app_metrics, registry);
    let app = router(state);

    tracing::info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    coordinator.drain().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("ctrl-c handler failed: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERM handler failed: {e}");
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
    tracing::info!("shutdown signal received");
}
