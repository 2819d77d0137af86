//! Application startup and lifecycle management.

use crate::config::{BillingConfig, StoreBackend};
use crate::services::{
    get_metrics, init_metrics, record_http_request, BillingContext, BillingScheduler, BillingStore,
    BillingSweep, EmailNotifier, InMemoryStore, LogNotifier, Notifier, PgStore, SystemClock,
};
use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub context: BillingContext,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.context.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": "billing-service",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "billing-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.context.store.health_check().await.map_err(|e| {
        tracing::warn!(error = %e, "Readiness check failed");
        AppError::ServiceUnavailable
    })?;
    Ok(StatusCode::OK)
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;

    record_http_request(
        &method,
        &path,
        response.status().as_str(),
        start.elapsed().as_secs_f64(),
    );

    response
}

/// HTTP surface: health, readiness and metrics.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
    scheduler: Option<BillingScheduler>,
}

impl Application {
    /// Build the application with the given configuration: open the store
    /// (running migrations on PostgreSQL), pick the notifier and bind the
    /// HTTP listener.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        init_metrics();

        let store: Arc<dyn BillingStore> = match config.store {
            StoreBackend::Postgres => {
                let db = PgStore::new(
                    &config.database.url,
                    config.database.max_connections,
                    config.database.min_connections,
                )
                .await
                .map_err(|e| {
                    tracing::error!(error = %e, "Failed to connect to PostgreSQL");
                    e
                })?;
                db.run_migrations().await.map_err(|e| {
                    tracing::error!(error = %e, "Failed to run migrations");
                    e
                })?;
                Arc::new(db)
            }
            StoreBackend::Memory => {
                tracing::warn!("Using in-memory store, data is lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        let notifier: Arc<dyn Notifier> = match &config.smtp {
            Some(smtp) => Arc::new(EmailNotifier::new(smtp)?),
            None => {
                tracing::info!("SMTP not configured, invoice notifications are logged only");
                Arc::new(LogNotifier)
            }
        };

        let context = BillingContext::new(
            store,
            Arc::new(SystemClock),
            notifier,
            config.billing.clone(),
        );

        Self::build_with(config, context).await
    }

    /// Build around an existing billing context. Tests use this with the
    /// in-memory store and a fixed clock.
    pub async fn build_with(config: BillingConfig, context: BillingContext) -> Result<Self, AppError> {
        init_metrics();

        let scheduler = config.scheduler.enabled.then(|| {
            BillingScheduler::new(BillingSweep::new(context.clone()), config.scheduler.run_at)
        });

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Billing service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            state: AppState { context },
            scheduler,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn context(&self) -> &BillingContext {
        &self.state.context
    }

    /// Serve HTTP and run the daily sweep until stopped. The scheduler is
    /// cancelled when this future completes or is dropped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = CancellationToken::new();
        let _scheduler_guard = shutdown.clone().drop_guard();

        match self.scheduler {
            Some(scheduler) => {
                tokio::spawn(scheduler.run(shutdown.child_token()));
            }
            None => tracing::info!("Billing scheduler disabled by configuration"),
        }

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            http_port = self.http_port,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, router(self.state))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
