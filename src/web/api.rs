use crate::adapters::sqlite::DatabaseStats;
use crate::domain::model::{AnalysisRequest, AnalysisResponse, AnalysisRun, Memo, RunStatus};
use crate::utils::error::AnalystError;
use crate::web::error::ApiError;
use crate::web::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

type ApiResult<T> = std::result::Result<T, ApiError>;

const MAX_RUNS_PAGE: usize = 100;

pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisResponse>)> {
    let query = request.normalized_query();
    let run_id = state.start_analysis(request)?;
    let response = AnalysisResponse {
        run_id,
        status: RunStatus::Pending,
        estimated_completion: Some(Utc::now() + Duration::seconds(60)),
        message: format!("Analysis started for {}", query),
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<RunsQuery>,
) -> ApiResult<Json<Vec<AnalysisRun>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, MAX_RUNS_PAGE);
    let runs = state
        .engine
        .database()
        .blocking(move |db| db.get_recent_runs(limit))
        .await?;
    Ok(Json(runs))
}

pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<i64>) -> ApiResult<Json<AnalysisRun>> {
    Ok(Json(state.engine.database().require_run(run_id)?))
}

pub async fn get_memo(State(state): State<AppState>, Path(run_id): Path<i64>) -> ApiResult<Json<Memo>> {
    let db = state.engine.database();
    db.require_run(run_id)?;
    let memo = db
        .get_memo(run_id)?
        .ok_or_else(|| AnalystError::not_found("memo for run", run_id))?;
    Ok(Json(memo))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<DatabaseStats>> {
    let stats = state
        .engine
        .database()
        .blocking(|db| db.get_database_stats())
        .await?;
    Ok(Json(stats))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
