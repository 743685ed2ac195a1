//! Browser UI and JSON API served with axum.

pub mod api;
pub mod error;
pub mod handlers;
pub mod pages;

use crate::adapters::local_storage::LocalStorage;
use crate::core::engine::AnalysisEngine;
use crate::domain::model::AnalysisRequest;
use crate::report::ReportExporter;
use crate::utils::error::Result;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct AppState {
    pub engine: AnalysisEngine,
    pub exporter: Arc<ReportExporter<LocalStorage>>,
    analysis_slots: Arc<Semaphore>,
}

impl AppState {
    pub fn new(engine: AnalysisEngine) -> Self {
        let config = engine.config();
        let exporter = ReportExporter::new(LocalStorage::new(config.exports_dir()), config.export.clone());
        let slots = config.performance.max_concurrent_requests.max(1);
        Self {
            exporter: Arc::new(exporter),
            analysis_slots: Arc::new(Semaphore::new(slots)),
            engine,
        }
    }

    /// Records a pending run and executes it in the background.
    pub fn start_analysis(&self, request: AnalysisRequest) -> Result<i64> {
        let run_id = self.engine.start_run(&request)?;
        let engine = self.engine.clone();
        let slots = Arc::clone(&self.analysis_slots);
        tokio::spawn(async move {
            // queued runs stay pending until a slot frees up
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            if let Err(e) = engine.execute(run_id, request).await {
                tracing::debug!(run_id, "Background analysis ended: {}", e);
            }
        });
        Ok(run_id)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/analyze", post(handlers::start_analysis))
        .route("/runs/{id}", get(handlers::show_run))
        .route("/runs/{id}/cancel", post(handlers::cancel_run))
        .route("/runs/{id}/export/{format}", get(handlers::export_run))
        .route(
            "/watchlists",
            get(handlers::watchlists).post(handlers::create_watchlist),
        )
        .route("/watchlists/{id}/items", post(handlers::add_watchlist_item))
        .route(
            "/watchlists/{id}/items/{ticker}/delete",
            post(handlers::remove_watchlist_item),
        )
        .route("/alerts/{id}/ack", post(handlers::acknowledge_alert))
        .route("/api/analyze", post(api::analyze))
        .route("/api/runs", get(api::list_runs))
        .route("/api/runs/{id}", get(api::get_run))
        .route("/api/runs/{id}/memo", get(api::get_memo))
        .route("/api/stats", get(api::stats))
        .route("/health", get(api::health))
        .with_state(state)
}

/// Binds the configured address and serves until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let server = &state.engine.config().server;
    let addr = format!("{}:{}", server.address, server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Research analyst UI listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Could not listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
