pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingestors;
pub mod report;
pub mod utils;
pub mod web;

#[cfg(feature = "cli")]
pub use config::Cli;
pub use config::AppConfig;

pub use adapters::{Database, LocalStorage, WatchlistManager};
pub use self::core::{engine::AnalysisEngine, pipeline::AnalysisPipeline};
pub use domain::model::{AnalysisRequest, ExportFormat, ExportRequest, Priority, RunStatus};
pub use report::ReportExporter;
pub use utils::error::{AnalystError, Result};
pub use web::AppState;
