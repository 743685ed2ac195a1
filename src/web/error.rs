use crate::utils::error::{AnalystError, ErrorCategory};
use crate::web::pages;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub fn status_for(error: &AnalystError) -> StatusCode {
    match error.category() {
        ErrorCategory::NotFound => StatusCode::NOT_FOUND,
        ErrorCategory::Validation => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn log(error: &AnalystError, status: StatusCode) {
    if status.is_server_error() {
        tracing::error!(
            "❌ Request failed: {} (Category: {:?}, Severity: {:?})",
            error,
            error.category(),
            error.severity()
        );
    } else {
        tracing::debug!("Request rejected: {}", error);
    }
}

/// Error rendered as a JSON body for `/api/*` routes.
#[derive(Debug)]
pub struct ApiError(pub AnalystError);

impl From<AnalystError> for ApiError {
    fn from(error: AnalystError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        log(&self.0, status);
        let body = json!({
            "error": {
                "category": format!("{:?}", self.0.category()).to_lowercase(),
                "message": self.0.user_friendly_message(),
                "suggestion": self.0.recovery_suggestion(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Error rendered as an HTML page for browser routes.
#[derive(Debug)]
pub struct PageError(pub AnalystError);

impl From<AnalystError> for PageError {
    fn from(error: AnalystError) -> Self {
        Self(error)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        log(&self.0, status);
        (status, Html(pages::error_page(status, &self.0))).into_response()
    }
}
