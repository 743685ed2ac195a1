pub mod csv;
pub mod html;
pub mod pdf;
pub mod pptx;

use crate::adapters::sqlite::Database;
use crate::config::app_config::ExportConfig;
use crate::domain::model::{DataSource, ExportFormat, ExportRequest, Memo, TechnicalReport};
use crate::domain::ports::Storage;
use crate::utils::error::{AnalystError, Result};
use chrono::{DateTime, Utc};

/// Everything a renderer needs for one memo.
#[derive(Debug, Clone, Copy)]
pub struct MemoDocument<'a> {
    pub ticker: &'a str,
    pub memo: &'a Memo,
    pub sources: &'a [DataSource],
    pub technical: Option<&'a TechnicalReport>,
    pub include_sources: bool,
    pub include_charts: bool,
}

impl<'a> MemoDocument<'a> {
    pub fn new(ticker: &'a str, memo: &'a Memo, sources: &'a [DataSource]) -> Self {
        Self {
            ticker,
            memo,
            sources,
            technical: None,
            include_sources: true,
            include_charts: true,
        }
    }

    /// 1-based position of a cited source. Stored sources are matched by id;
    /// unsaved ones are cited by position already.
    pub fn citation(&self, source_id: i64) -> Option<usize> {
        if let Some(pos) = self.sources.iter().position(|s| s.id == Some(source_id)) {
            return Some(pos + 1);
        }
        let unsaved = self.sources.iter().all(|s| s.id.is_none());
        let in_range = source_id >= 1 && (source_id as usize) <= self.sources.len();
        (unsaved && in_range).then_some(source_id as usize)
    }

    /// "[1, 3]" or an empty string.
    pub fn citations(&self, source_ids: &[i64]) -> String {
        let labels: Vec<String> = source_ids
            .iter()
            .filter_map(|id| self.citation(*id))
            .map(|n| n.to_string())
            .collect();
        if labels.is_empty() {
            String::new()
        } else {
            format!("[{}]", labels.join(", "))
        }
    }

    pub fn title(&self) -> String {
        format!("{} Analysis Report", self.ticker)
    }
}

/// Technical analysis persisted alongside the memo, if any.
pub fn technical_from_memo(memo: &Memo) -> Option<TechnicalReport> {
    memo.metadata
        .get("technical")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// `{TICKER}_analysis_{YYYYmmdd_HHMMSS}.{ext}`
pub fn export_filename(ticker: &str, format: ExportFormat, at: DateTime<Utc>) -> String {
    let safe: String = ticker
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{}_analysis_{}.{}",
        safe,
        at.format("%Y%m%d_%H%M%S"),
        format.extension()
    )
}

pub fn render(format: ExportFormat, doc: &MemoDocument<'_>, config: &ExportConfig) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Html => Ok(html::render_memo(doc).into_bytes()),
        ExportFormat::Pdf => Ok(pdf::render_memo(doc, config)),
        ExportFormat::Pptx => pptx::render_memo(doc, config),
        ExportFormat::Csv => csv::render_sources(doc.sources),
    }
}

#[derive(Debug, Clone)]
pub struct ExportedReport {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Renders stored memos and writes them through a `Storage`.
pub struct ReportExporter<S: Storage> {
    storage: S,
    config: ExportConfig,
}

impl<S: Storage> ReportExporter<S> {
    pub fn new(storage: S, config: ExportConfig) -> Self {
        Self { storage, config }
    }

    pub async fn export(&self, db: &Database, request: &ExportRequest) -> Result<ExportedReport> {
        let run = db.require_run(request.run_id)?;
        let memo = db
            .get_memo(request.run_id)?
            .ok_or_else(|| AnalystError::not_found("memo for run", request.run_id))?;
        let sources = db.get_sources(request.run_id)?;
        let technical = technical_from_memo(&memo);

        let ticker = run.query.trim().to_uppercase();
        let doc = MemoDocument {
            technical: technical.as_ref(),
            include_sources: request.include_sources,
            include_charts: request.include_charts,
            ..MemoDocument::new(&ticker, &memo, &sources)
        };

        let bytes = render(request.format, &doc, &self.config).map_err(|e| match e {
            AnalystError::ExportError { .. } => e,
            other => AnalystError::ExportError {
                message: other.to_string(),
            },
        })?;
        let filename = export_filename(&ticker, request.format, Utc::now());

        tracing::debug!("Writing {} ({} bytes) to storage", filename, bytes.len());
        self.storage.write_file(&filename, &bytes).await?;
        tracing::info!("📄 Exported run {} as {}", request.run_id, filename);

        Ok(ExportedReport {
            filename,
            content_type: request.format.content_type(),
            bytes,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::domain::model::*;
    use chrono::{TimeZone, Utc};

    pub fn memo(run_id: i64) -> Memo {
        let risk = |name: &str, ids: Vec<i64>| RiskItem {
            risk: name.to_string(),
            rationale: format!("{} could weigh on margins", name),
            source_ids: ids,
            confidence: 0.8,
            severity: Severity::High,
        };
        let opp = |name: &str| OpportunityItem {
            opportunity: name.to_string(),
            rationale: format!("{} supports growth", name),
            source_ids: vec![2],
            confidence: 0.7,
            potential_impact: Impact::Medium,
        };
        Memo {
            id: None,
            run_id,
            tldr: "AAPL analysis based on 2 sources.\nShares last traded at $190.00.".to_string(),
            risks: vec![
                risk("Supply chain <constraints>", vec![1]),
                risk("Regulatory scrutiny", vec![1, 2]),
                risk("Competition & pricing", vec![]),
            ],
            opportunities: vec![opp("Services growth"), opp("Emerging markets"), opp("Wearables")],
            metrics: vec![MetricItem {
                metric: "Latest Price".to_string(),
                value: "$190.00".to_string(),
                trend: Trend::Up,
                period: "Current".to_string(),
                source_ids: vec![1],
                context: None,
            }],
            html_content: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap(),
            metadata: Metadata::new(),
        }
    }

    pub fn sources(run_id: i64) -> Vec<DataSource> {
        let mut market = DataSource::new(run_id, SourceType::MarketData);
        market.url = Some("market://AAPL/history".to_string());
        market.title = Some("AAPL Historical Data (1y)".to_string());
        market.raw_content = Some("HISTORICAL PRICE DATA".to_string());

        let mut news = DataSource::new(run_id, SourceType::NewsArticle);
        news.url = Some("https://news.example.com/apple".to_string());
        news.title = Some("Apple, \"iPhone\" sales rise".to_string());
        news.published_at = Some(Utc.with_ymd_and_hms(2024, 9, 9, 8, 0, 0).unwrap());
        news.raw_content = Some("Apple reported strong iPhone sales.".to_string());
        vec![market, news]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local_storage::LocalStorage;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_export_filename() {
        let at = Utc.with_ymd_and_hms(2024, 9, 10, 14, 5, 9).unwrap();
        assert_eq!(export_filename("aapl", ExportFormat::Pdf, at), "AAPL_analysis_20240910_140509.pdf");
        assert_eq!(export_filename("BRK.B", ExportFormat::Csv, at), "BRK_B_analysis_20240910_140509.csv");
    }

    #[test]
    fn test_citations_before_and_after_save() {
        let memo = fixtures::memo(1);
        let mut sources = fixtures::sources(1);
        let doc = MemoDocument::new("AAPL", &memo, &sources);
        assert_eq!(doc.citations(&[1, 2]), "[1, 2]");
        assert_eq!(doc.citations(&[7]), "");

        sources[0].id = Some(41);
        sources[1].id = Some(42);
        let doc = MemoDocument::new("AAPL", &memo, &sources);
        assert_eq!(doc.citations(&[42]), "[2]");
        assert_eq!(doc.citations(&[1]), "");
    }

    #[tokio::test]
    async fn test_export_writes_file_through_storage() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("aapl").unwrap();
        let mut ids = Vec::new();
        for source in fixtures::sources(run_id) {
            ids.push(db.add_source(&source).unwrap());
        }
        let mut memo = fixtures::memo(run_id);
        memo.risks[0].source_ids = vec![ids[0]];
        db.save_memo(&memo).unwrap();

        let dir = TempDir::new().unwrap();
        let exporter = ReportExporter::new(LocalStorage::new(dir.path()), ExportConfig::default());
        let request = ExportRequest {
            run_id,
            format: ExportFormat::Html,
            include_sources: true,
            include_charts: false,
        };
        let report = exporter.export(&db, &request).await.unwrap();

        assert!(report.filename.starts_with("AAPL_analysis_"));
        assert!(report.filename.ends_with(".html"));
        assert_eq!(report.content_type, "text/html; charset=utf-8");
        let written = std::fs::read(dir.path().join(&report.filename)).unwrap();
        assert_eq!(written, report.bytes);
        assert!(String::from_utf8(written).unwrap().contains("AAPL Analysis Report"));
    }

    #[tokio::test]
    async fn test_export_without_memo_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("MSFT").unwrap();
        let dir = TempDir::new().unwrap();
        let exporter = ReportExporter::new(LocalStorage::new(dir.path()), ExportConfig::default());
        let request = ExportRequest {
            run_id,
            format: ExportFormat::Pdf,
            include_sources: true,
            include_charts: true,
        };
        let err = exporter.export(&db, &request).await.unwrap_err();
        assert!(matches!(err, AnalystError::NotFound { .. }));
    }
}
