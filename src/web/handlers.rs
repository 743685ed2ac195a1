use crate::adapters::watchlist::NewWatchlistItem;
use crate::domain::model::{AnalysisRequest, ExportFormat, ExportRequest};
use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::is_ticker;
use crate::web::error::PageError;
use crate::web::pages::{self, Dashboard, WatchlistView};
use crate::web::AppState;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Form;
use serde::Deserialize;

type PageResult<T> = std::result::Result<T, PageError>;

#[derive(Debug, Deserialize)]
pub struct AnalyzeForm {
    pub query: String,
    // unchecked checkboxes are absent from the form body
    pub include_sec: Option<String>,
    pub include_news: Option<String>,
    pub include_market: Option<String>,
    pub max_sources: Option<String>,
    pub priority: Option<String>,
}

impl AnalyzeForm {
    pub fn into_request(self) -> Result<AnalysisRequest> {
        let mut request = AnalysisRequest::new(self.query);
        request.include_sec = self.include_sec.is_some();
        request.include_news = self.include_news.is_some();
        request.include_market = self.include_market.is_some();
        if let Some(max) = non_empty(self.max_sources) {
            request.max_sources = max
                .parse()
                .map_err(|_| AnalystError::validation(format!("Invalid max sources '{}'", max)))?;
        }
        if let Some(priority) = non_empty(self.priority) {
            request.priority = priority.parse()?;
        }
        Ok(request)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_price(field: &str, value: Option<String>) -> Result<Option<f64>> {
    non_empty(value)
        .map(|v| {
            v.parse::<f64>()
                .ok()
                .filter(|p| *p > 0.0)
                .ok_or_else(|| AnalystError::validation(format!("Invalid {} '{}'", field, v)))
        })
        .transpose()
}

pub async fn index(State(state): State<AppState>) -> PageResult<Html<String>> {
    let (recent_runs, stats) = state
        .engine
        .database()
        .blocking(|db| Ok((db.get_recent_runs(10)?, db.get_database_stats()?)))
        .await?;
    Ok(Html(pages::dashboard(&Dashboard {
        page_title: &state.engine.config().server.page_title,
        recent_runs: &recent_runs,
        stats: &stats,
    })))
}

pub async fn start_analysis(
    State(state): State<AppState>,
    Form(form): Form<AnalyzeForm>,
) -> PageResult<Redirect> {
    let request = form.into_request()?;
    let run_id = state.start_analysis(request)?;
    Ok(Redirect::to(&format!("/runs/{}", run_id)))
}

pub async fn show_run(State(state): State<AppState>, Path(run_id): Path<i64>) -> PageResult<Html<String>> {
    let db = state.engine.database();
    let run = db.require_run(run_id)?;
    let memo = db.get_memo(run_id)?;
    let sources = db.get_sources(run_id)?;
    Ok(Html(pages::run_page(&run, memo.as_ref(), &sources)))
}

pub async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<i64>) -> PageResult<Redirect> {
    state.engine.cancel(run_id)?;
    Ok(Redirect::to(&format!("/runs/{}", run_id)))
}

pub async fn export_run(
    State(state): State<AppState>,
    Path((run_id, format)): Path<(i64, String)>,
) -> PageResult<Response> {
    let format: ExportFormat = format.parse()?;
    let export = &state.engine.config().export;
    let request = ExportRequest {
        run_id,
        format,
        include_sources: export.include_sources,
        include_charts: export.include_charts,
    };
    let report = state.exporter.export(state.engine.database(), &request).await?;
    let disposition = format!("attachment; filename=\"{}\"", report.filename);
    Ok((
        [
            (header::CONTENT_TYPE, report.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        report.bytes,
    )
        .into_response())
}

pub async fn watchlists(State(state): State<AppState>) -> PageResult<Html<String>> {
    let wm = state.engine.watchlists();
    let views = wm
        .get_watchlists()?
        .into_iter()
        .map(|watchlist| {
            let items = wm.get_watchlist_items(watchlist.id)?;
            Ok(WatchlistView { watchlist, items })
        })
        .collect::<Result<Vec<_>>>()?;
    let alerts = wm.get_pending_alerts(None)?;
    let stale = wm.get_stale_items(24)?;
    Ok(Html(pages::watchlists_page(&views, &alerts, &stale)))
}

#[derive(Debug, Deserialize)]
pub struct WatchlistForm {
    pub name: String,
    pub description: Option<String>,
}

pub async fn create_watchlist(
    State(state): State<AppState>,
    Form(form): Form<WatchlistForm>,
) -> PageResult<Redirect> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AnalystError::validation("Watchlist name is required").into());
    }
    let description = non_empty(form.description);
    state
        .engine
        .watchlists()
        .create_watchlist(name, description.as_deref())?;
    Ok(Redirect::to("/watchlists"))
}

#[derive(Debug, Deserialize)]
pub struct WatchlistItemForm {
    pub ticker: String,
    pub price_target_high: Option<String>,
    pub price_target_low: Option<String>,
    pub notes: Option<String>,
}

pub async fn add_watchlist_item(
    State(state): State<AppState>,
    Path(watchlist_id): Path<i64>,
    Form(form): Form<WatchlistItemForm>,
) -> PageResult<Redirect> {
    if !is_ticker(&form.ticker) {
        return Err(AnalystError::validation(format!("'{}' is not a ticker symbol", form.ticker.trim())).into());
    }
    let wm = state.engine.watchlists();
    wm.get_watchlist(watchlist_id)?;
    let item = NewWatchlistItem {
        price_target_high: parse_price("upper target", form.price_target_high)?,
        price_target_low: parse_price("lower target", form.price_target_low)?,
        notes: non_empty(form.notes),
    };
    if !wm.add_to_watchlist(watchlist_id, &form.ticker, &item)? {
        tracing::info!("{} already on watchlist {}", form.ticker.trim().to_uppercase(), watchlist_id);
    }
    Ok(Redirect::to("/watchlists"))
}

pub async fn remove_watchlist_item(
    State(state): State<AppState>,
    Path((watchlist_id, ticker)): Path<(i64, String)>,
) -> PageResult<Redirect> {
    state.engine.watchlists().remove_from_watchlist(watchlist_id, &ticker)?;
    Ok(Redirect::to("/watchlists"))
}

pub async fn acknowledge_alert(State(state): State<AppState>, Path(alert_id): Path<i64>) -> PageResult<Redirect> {
    state.engine.watchlists().acknowledge_alert(alert_id)?;
    Ok(Redirect::to("/watchlists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Priority;

    fn form(max_sources: Option<&str>, priority: Option<&str>) -> AnalyzeForm {
        AnalyzeForm {
            query: "tsla".to_string(),
            include_sec: None,
            include_news: Some("on".to_string()),
            include_market: Some("on".to_string()),
            max_sources: max_sources.map(str::to_string),
            priority: priority.map(str::to_string),
        }
    }

    #[test]
    fn test_form_checkboxes_and_defaults() {
        let request = form(Some(""), None).into_request().unwrap();
        assert!(!request.include_sec);
        assert!(request.include_news && request.include_market);
        assert_eq!(request.max_sources, 20);
        assert_eq!(request.priority, Priority::Balanced);
    }

    #[test]
    fn test_form_parses_numbers_and_priority() {
        let request = form(Some("35"), Some("quality")).into_request().unwrap();
        assert_eq!(request.max_sources, 35);
        assert_eq!(request.priority, Priority::Quality);

        assert!(form(Some("lots"), None).into_request().is_err());
        assert!(form(None, Some("fastest")).into_request().is_err());
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("target", Some(" 190.5 ".to_string())).unwrap(), Some(190.5));
        assert_eq!(parse_price("target", Some(String::new())).unwrap(), None);
        assert!(parse_price("target", Some("-3".to_string())).is_err());
    }
}
