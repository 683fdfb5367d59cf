use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use backoffice_service::config::BackofficeConfig;
use backoffice_service::observability::init_tracing;
use backoffice_service::services::{get_metrics, init_metrics, Database};
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;

#[derive(Clone)]
struct HealthState {
    db: Database,
}

async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "backoffice-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "backoffice-service",
                "error": e.to_string()
            })),
        ),
    }
}

async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    match state.db.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Config before tracing: the log level comes from it.
    let config = BackofficeConfig::load()
        .map_err(|e| std::io::Error::other(format!("Configuration error: {}", e)))?;

    init_tracing(&config.service_name, &config.log_level);

    // Initialize metrics recorder (must be before any metrics are recorded)
    init_metrics();

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to connect to PostgreSQL: {}", e);
        std::io::Error::other(format!("Database connection error: {}", e))
    })?;

    db.run_migrations().await.map_err(|e| {
        tracing::error!("Failed to run migrations: {}", e);
        std::io::Error::other(format!("Migration error: {}", e))
    })?;

    let health_state = HealthState { db };

    // HTTP health/metrics endpoint for Docker/K8s probes and Prometheus
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(health_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!("Failed to bind listener to {}: {}", addr, e);
        e
    })?;
    tracing::info!("Health endpoint listening on port {}", config.port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
