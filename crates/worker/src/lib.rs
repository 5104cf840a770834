//! Transfer worker: hosts money transfers behind an HTTP submission API.
//!
//! Provides the configuration surface shared by the binaries, the axum
//! router with structured logging (tracing) and Prometheus metrics, and a
//! small client for submitting transfers.

pub mod client;
pub mod config;
pub mod error;
pub mod routes;
pub mod telemetry;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use history::{HistoryStore, InMemoryHistoryStore};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{ActivityOptions, InMemoryBank, SagaError, TransferEngine, TransferWorker};
use tower_http::trace::TraceLayer;

use routes::transfers::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: HistoryStore + 'static>(
    engine: TransferEngine<S>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let state = Arc::new(AppState { engine });

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/transfers", post(routes::transfers::start::<S>))
        .route("/transfers/{workflow_id}", get(routes::transfers::get::<S>))
        .route(
            "/transfers/{workflow_id}/result",
            get(routes::transfers::result::<S>),
        )
        .route(
            "/transfers/{workflow_id}/history",
            get(routes::transfers::history::<S>),
        )
        .route(
            "/transfers/{workflow_id}/cancel",
            post(routes::transfers::cancel::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(TraceLayer::new_for_http())
}

/// Creates an engine backed by in-memory history, with the banking steps
/// registered against `bank`.
pub fn create_default_engine(
    namespace: common::Namespace,
    bank: InMemoryBank,
    options: ActivityOptions,
) -> Result<TransferEngine<InMemoryHistoryStore>, SagaError> {
    let worker = TransferWorker::builder(namespace)
        .register_banking_steps(bank)
        .activity_options(options)
        .build()?;
    Ok(TransferEngine::new(InMemoryHistoryStore::new(), worker))
}
