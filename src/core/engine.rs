use crate::adapters::sqlite::Database;
use crate::adapters::watchlist::WatchlistManager;
use crate::config::AppConfig;
use crate::core::pipeline::AnalysisPipeline;
use crate::domain::model::{AnalysisRequest, Metadata, RunStatus, SourceType};
use crate::domain::ports::{Ingestor, Pipeline};
use crate::ingestors::build_ingestors;
use crate::utils::error::{AnalystError, Result};
use crate::utils::monitor::SystemMonitor;
use crate::utils::validation::Validate;
use std::sync::Arc;
use std::time::Duration;

/// Drives analysis runs through their lifecycle and keeps watchlists in sync.
#[derive(Clone)]
pub struct AnalysisEngine {
    db: Database,
    config: Arc<AppConfig>,
    ingestors: Vec<Arc<dyn Ingestor>>,
    watchlists: WatchlistManager,
    monitor_enabled: bool,
}

impl AnalysisEngine {
    pub fn new(db: Database, config: Arc<AppConfig>, ingestors: Vec<Arc<dyn Ingestor>>) -> Self {
        let watchlists = WatchlistManager::new(db.clone());
        Self {
            db,
            config,
            ingestors,
            watchlists,
            monitor_enabled: false,
        }
    }

    /// Opens the configured database and builds the HTTP ingestors.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let db = Database::open(config.database_path())?;
        let ingestors = build_ingestors(&config)?;
        Ok(Self::new(db, Arc::new(config), ingestors))
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    pub fn watchlists(&self) -> &WatchlistManager {
        &self.watchlists
    }

    /// Validates the request and records a pending run.
    pub fn start_run(&self, request: &AnalysisRequest) -> Result<i64> {
        request.validate()?;
        let metadata = match serde_json::to_value(request)? {
            serde_json::Value::Object(map) => map,
            _ => Metadata::new(),
        };
        self.db
            .create_run_with_metadata(&request.normalized_query(), &metadata)
    }

    /// Starts and executes a run in the foreground. Returns the run id.
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<i64> {
        let run_id = self.start_run(&request)?;
        self.execute(run_id, request).await?;
        Ok(run_id)
    }

    /// Runs a pending run to completion. Returns the memo id.
    pub async fn execute(&self, run_id: i64, request: AnalysisRequest) -> Result<i64> {
        if !self.db.transition_run_status(run_id, RunStatus::Running, None)? {
            return Err(AnalystError::Cancelled { run_id });
        }
        tracing::info!(run_id, "Starting analysis for '{}'", request.normalized_query());

        let monitor = SystemMonitor::new(self.monitor_enabled);
        monitor.log_stats("start");

        let limit_secs = self.config.performance.max_analysis_time_secs;
        let outcome = match tokio::time::timeout(
            Duration::from_secs(limit_secs),
            self.run_phases(run_id, request, &monitor),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(AnalystError::processing(format!(
                "Analysis exceeded the {}s time limit",
                limit_secs
            ))),
        };
        monitor.log_final_stats();

        match outcome {
            Ok(memo_id) => {
                if !self.db.transition_run_status(run_id, RunStatus::Completed, None)? {
                    tracing::warn!(run_id, "⚠️ Analysis cancelled after its memo was saved");
                    return Err(AnalystError::Cancelled { run_id });
                }
                tracing::info!(run_id, "✅ Analysis completed (memo {})", memo_id);
                Ok(memo_id)
            }
            Err(e @ AnalystError::Cancelled { .. }) => {
                tracing::warn!(run_id, "⚠️ Analysis cancelled");
                Err(e)
            }
            Err(e) => {
                tracing::error!(
                    run_id,
                    "❌ Analysis failed: {} (Category: {:?}, Severity: {:?})",
                    e,
                    e.category(),
                    e.severity()
                );
                match self
                    .db
                    .transition_run_status(run_id, RunStatus::Failed, Some(&e.to_string()))
                {
                    Ok(true) => {}
                    Ok(false) => return Err(AnalystError::Cancelled { run_id }),
                    Err(status_err) => {
                        tracing::error!(run_id, "Could not mark run as failed: {}", status_err)
                    }
                }
                Err(e)
            }
        }
    }

    async fn run_phases(&self, run_id: i64, request: AnalysisRequest, monitor: &SystemMonitor) -> Result<i64> {
        let pipeline = AnalysisPipeline::new(
            run_id,
            request,
            self.ingestors.clone(),
            self.db.clone(),
            Arc::clone(&self.config),
        );

        // Extract
        tracing::info!("📥 Collecting sources...");
        let sources = pipeline.extract().await?;
        tracing::info!("Collected {} sources", sources.len());
        if sources.is_empty() {
            tracing::warn!("⚠️ No data sources found for '{}'", pipeline.ticker());
        }
        monitor.log_stats("extract");
        self.ensure_active(run_id)?;

        // Transform
        tracing::info!("🔬 Analyzing...");
        let output = pipeline.transform(sources).await?;
        tracing::info!(
            "Found {} risks, {} opportunities, {} metrics",
            output.memo.risks.len(),
            output.memo.opportunities.len(),
            output.memo.metrics.len()
        );
        monitor.log_stats("transform");
        self.ensure_active(run_id)?;

        let latest_price = output
            .sources
            .iter()
            .filter(|s| s.source_type == SourceType::MarketData)
            .find_map(|s| s.metadata_f64("latest_price"));

        // Load
        tracing::info!("💾 Saving results...");
        let memo_id = pipeline.load(output).await?;
        monitor.log_stats("load");

        if let Err(e) = self.update_watchlists(&pipeline.ticker(), latest_price) {
            tracing::warn!("Watchlist update failed: {}", e);
        }
        Ok(memo_id)
    }

    fn ensure_active(&self, run_id: i64) -> Result<()> {
        if self.db.require_run(run_id)?.status == RunStatus::Cancelled {
            return Err(AnalystError::Cancelled { run_id });
        }
        Ok(())
    }

    fn update_watchlists(&self, ticker: &str, latest_price: Option<f64>) -> Result<()> {
        let items = self.watchlists.items_for_ticker(ticker)?;
        if items.is_empty() {
            return Ok(());
        }
        for item in &items {
            self.watchlists
                .update_last_analyzed(item.watchlist_id, &item.ticker)?;
        }
        if let Some(price) = latest_price {
            let alerts = self.watchlists.check_price_targets(ticker, price)?;
            if !alerts.is_empty() {
                tracing::info!("🔔 Raised {} price alerts for {}", alerts.len(), ticker);
            }
        }
        Ok(())
    }

    /// Marks a pending or running run as cancelled. Finished runs are left alone.
    pub fn cancel(&self, run_id: i64) -> Result<bool> {
        let run = self.db.require_run(run_id)?;
        if run.status.is_terminal() {
            return Ok(false);
        }
        self.db.update_run_status(run_id, RunStatus::Cancelled, None)?;
        tracing::info!(run_id, "Cancellation requested");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::watchlist::NewWatchlistItem;
    use crate::domain::model::DataSource;
    use crate::domain::ports::IngestOptions;
    use crate::ingestors::base::create_source;
    use async_trait::async_trait;
    use serde_json::json;

    struct FakeMarket {
        price: f64,
        cancel_db: Option<Database>,
    }

    #[async_trait]
    impl Ingestor for FakeMarket {
        fn source_type(&self) -> SourceType {
            SourceType::MarketData
        }

        fn name(&self) -> &'static str {
            "market"
        }

        fn can_handle(&self, _query: &str) -> bool {
            true
        }

        async fn ingest(&self, query: &str, run_id: i64, _options: &IngestOptions) -> Result<Vec<DataSource>> {
            if let Some(db) = &self.cancel_db {
                db.update_run_status(run_id, RunStatus::Cancelled, None)?;
            }
            let mut metadata = Metadata::new();
            metadata.insert("ticker".into(), json!(query));
            metadata.insert("latest_price".into(), json!(self.price));
            metadata.insert("price_change_pct".into(), json!(2.5));
            Ok(vec![create_source(
                SourceType::MarketData,
                run_id,
                format!("market://{}/history", query),
                format!("{} Historical Data (1y)", query),
                None,
                format!("Latest Price: ${:.2}", self.price),
                metadata,
            )])
        }
    }

    /// Cancels its run, then stalls past the time limit.
    struct SlowMarket {
        db: Database,
    }

    #[async_trait]
    impl Ingestor for SlowMarket {
        fn source_type(&self) -> SourceType {
            SourceType::MarketData
        }

        fn name(&self) -> &'static str {
            "market"
        }

        fn can_handle(&self, _query: &str) -> bool {
            true
        }

        async fn ingest(&self, _query: &str, run_id: i64, _options: &IngestOptions) -> Result<Vec<DataSource>> {
            self.db.update_run_status(run_id, RunStatus::Cancelled, None)?;
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn engine(price: f64, cancel: bool) -> AnalysisEngine {
        let db = Database::open_in_memory().unwrap();
        let market = FakeMarket {
            price,
            cancel_db: cancel.then(|| db.clone()),
        };
        AnalysisEngine::new(db, Arc::new(AppConfig::default()), vec![Arc::new(market)])
    }

    #[tokio::test]
    async fn test_analyze_completes_run() {
        let engine = engine(150.0, false);
        let run_id = engine.analyze(AnalysisRequest::new("aapl")).await.unwrap();

        let run = engine.database().require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.query, "AAPL");
        assert!(run.finished_at.is_some());
        assert_eq!(run.metadata["max_sources"], json!(20));

        let memo = engine.database().get_memo(run_id).unwrap().unwrap();
        assert!(memo.metrics.iter().any(|m| m.metric == "Latest Price"));
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_run() {
        let engine = engine(150.0, false);
        let mut request = AnalysisRequest::new("AAPL");
        request.include_market = false;
        request.include_news = false;
        request.include_sec = false;

        let err = engine.analyze(request).await.unwrap_err();
        assert!(matches!(err, AnalystError::ValidationError { .. }));
        assert!(engine.database().get_recent_runs(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_phases_keeps_status() {
        let engine = engine(150.0, true);
        let request = AnalysisRequest::new("AAPL");
        let run_id = engine.start_run(&request).unwrap();

        let err = engine.execute(run_id, request).await.unwrap_err();
        assert!(matches!(err, AnalystError::Cancelled { .. }));

        let db = engine.database();
        assert_eq!(db.require_run(run_id).unwrap().status, RunStatus::Cancelled);
        assert!(db.get_memo(run_id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_pending_run_is_not_started() {
        let engine = engine(150.0, false);
        let request = AnalysisRequest::new("AAPL");
        let run_id = engine.start_run(&request).unwrap();
        assert!(engine.cancel(run_id).unwrap());

        let err = engine.execute(run_id, request).await.unwrap_err();
        assert!(matches!(err, AnalystError::Cancelled { .. }));
        let run = engine.database().require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_cancel_keeps_cancelled() {
        let db = Database::open_in_memory().unwrap();
        let slow = SlowMarket { db: db.clone() };
        let mut config = AppConfig::default();
        config.performance.max_analysis_time_secs = 1;
        let engine = AnalysisEngine::new(db, Arc::new(config), vec![Arc::new(slow)]);

        let request = AnalysisRequest::new("AAPL");
        let run_id = engine.start_run(&request).unwrap();
        let err = engine.execute(run_id, request).await.unwrap_err();
        assert!(matches!(err, AnalystError::Cancelled { .. }));

        let run = engine.database().require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.error_message.is_none());
    }

    #[tokio::test]
    async fn test_cancel_finished_run_is_noop() {
        let engine = engine(150.0, false);
        let run_id = engine.analyze(AnalysisRequest::new("AAPL")).await.unwrap();
        assert!(!engine.cancel(run_id).unwrap());

        let pending = engine.start_run(&AnalysisRequest::new("MSFT")).unwrap();
        assert!(engine.cancel(pending).unwrap());
        assert!(matches!(engine.cancel(9999), Err(AnalystError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_watchlist_updated_and_alert_raised() {
        let engine = engine(210.0, false);
        let wm = engine.watchlists();
        let list = wm.create_watchlist("Tech", None).unwrap();
        let target = NewWatchlistItem {
            price_target_high: Some(200.0),
            ..Default::default()
        };
        wm.add_to_watchlist(list, "AAPL", &target).unwrap();

        engine.analyze(AnalysisRequest::new("AAPL")).await.unwrap();

        let items = wm.get_watchlist_items(list).unwrap();
        assert!(items[0].last_analyzed_at.is_some());
        let alerts = wm.get_pending_alerts(Some(list)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, "price_above_target");
    }
}
