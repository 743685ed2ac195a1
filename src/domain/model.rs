use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::{is_ticker, validate_non_empty_string, validate_range, Validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

pub const MIN_MEMO_RISKS: usize = 3;
pub const MIN_MEMO_OPPORTUNITIES: usize = 3;

/// Implements `as_str`, `Display` and `FromStr` for a snake_case string enum.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AnalystError;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(AnalystError::validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(RunStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    SecFiling,
    NewsArticle,
    MarketData,
    RssFeed,
}

string_enum!(SourceType {
    SecFiling => "sec_filing",
    NewsArticle => "news_article",
    MarketData => "market_data",
    RssFeed => "rss_feed",
});

impl SourceType {
    /// "sec_filing" -> "Sec Filing"
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub id: Option<i64>,
    pub query: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl AnalysisRun {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: Option<i64>,
    pub run_id: i64,
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub url: Option<String>,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub checksum: Option<String>,
    pub raw_content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl DataSource {
    pub fn new(run_id: i64, source_type: SourceType) -> Self {
        Self {
            id: None,
            run_id,
            source_type,
            url: None,
            title: None,
            published_at: None,
            checksum: None,
            raw_content: None,
            metadata: Metadata::new(),
        }
    }

    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: Option<i64>,
    pub source_id: i64,
    pub text: String,
    pub chunk_type: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

string_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
    Transformative,
}

string_enum!(Impact {
    Low => "low",
    Medium => "medium",
    High => "high",
    Transformative => "transformative",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

string_enum!(Trend {
    Up => "up",
    Down => "down",
    Stable => "stable",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    pub risk: String,
    pub rationale: String,
    #[serde(default)]
    pub source_ids: Vec<i64>,
    pub confidence: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityItem {
    pub opportunity: String,
    pub rationale: String,
    #[serde(default)]
    pub source_ids: Vec<i64>,
    pub confidence: f64,
    pub potential_impact: Impact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricItem {
    pub metric: String,
    pub value: String,
    pub trend: Trend,
    pub period: String,
    #[serde(default)]
    pub source_ids: Vec<i64>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memo {
    pub id: Option<i64>,
    pub run_id: i64,
    pub tldr: String,
    pub risks: Vec<RiskItem>,
    pub opportunities: Vec<OpportunityItem>,
    pub metrics: Vec<MetricItem>,
    pub html_content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn check_confidence(kind: &str, index: usize, confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(AnalystError::validation(format!(
            "{} {} has confidence {} outside [0, 1]",
            kind,
            index + 1,
            confidence
        )));
    }
    Ok(())
}

impl Validate for Memo {
    fn validate(&self) -> Result<()> {
        if self.risks.len() < MIN_MEMO_RISKS {
            return Err(AnalystError::validation(format!(
                "Memo must have at least {} risks, got {}",
                MIN_MEMO_RISKS,
                self.risks.len()
            )));
        }
        if self.opportunities.len() < MIN_MEMO_OPPORTUNITIES {
            return Err(AnalystError::validation(format!(
                "Memo must have at least {} opportunities, got {}",
                MIN_MEMO_OPPORTUNITIES,
                self.opportunities.len()
            )));
        }
        for (i, risk) in self.risks.iter().enumerate() {
            check_confidence("Risk", i, risk.confidence)?;
        }
        for (i, opp) in self.opportunities.iter().enumerate() {
            check_confidence("Opportunity", i, opp.confidence)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Speed,
    #[default]
    Balanced,
    Quality,
}

string_enum!(Priority {
    Speed => "speed",
    Balanced => "balanced",
    Quality => "quality",
});

fn default_true() -> bool {
    true
}

fn default_max_sources() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub query: String,
    #[serde(default = "default_true")]
    pub include_sec: bool,
    #[serde(default = "default_true")]
    pub include_news: bool,
    #[serde(default = "default_true")]
    pub include_market: bool,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default)]
    pub priority: Priority,
}

impl AnalysisRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            include_sec: true,
            include_news: true,
            include_market: true,
            max_sources: default_max_sources(),
            priority: Priority::default(),
        }
    }

    /// Trimmed query; ticker symbols are upper-cased.
    pub fn normalized_query(&self) -> String {
        let query = self.query.trim();
        if is_ticker(query) {
            query.to_uppercase()
        } else {
            query.to_string()
        }
    }
}

impl Validate for AnalysisRequest {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("query", &self.query)
            .map_err(|_| AnalystError::validation("Please enter a valid ticker symbol"))?;
        validate_range("max_sources", self.max_sources, 5, 50)?;
        if !(self.include_sec || self.include_news || self.include_market) {
            return Err(AnalystError::validation(
                "Select at least one data source",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub run_id: i64,
    pub status: RunStatus,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Html,
    Pdf,
    Pptx,
    Csv,
}

string_enum!(ExportFormat {
    Html => "html",
    Pdf => "pdf",
    Pptx => "pptx",
    Csv => "csv",
});

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Html => "text/html; charset=utf-8",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub run_id: i64,
    pub format: ExportFormat,
    #[serde(default = "default_true")]
    pub include_sources: bool,
    #[serde(default = "default_true")]
    pub include_charts: bool,
}

/// One OHLCV bar of daily price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechnicalInsight {
    pub kind: String,
    pub signal: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalReport {
    pub insights: Vec<TechnicalInsight>,
    pub chart_svg: Option<String>,
    pub data_points: usize,
    pub period: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn risk(confidence: f64) -> RiskItem {
        RiskItem {
            risk: "Market volatility".to_string(),
            rationale: "General market risks".to_string(),
            source_ids: vec![1],
            confidence,
            severity: Severity::Medium,
        }
    }

    fn opportunity() -> OpportunityItem {
        OpportunityItem {
            opportunity: "Market expansion".to_string(),
            rationale: "New regions".to_string(),
            source_ids: vec![],
            confidence: 0.7,
            potential_impact: Impact::High,
        }
    }

    fn memo(risks: Vec<RiskItem>, opportunities: Vec<OpportunityItem>) -> Memo {
        Memo {
            id: None,
            run_id: 1,
            tldr: "Summary".to_string(),
            risks,
            opportunities,
            metrics: vec![],
            html_content: "<h1>AAPL</h1>".to_string(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_memo_requires_three_risks_and_opportunities() {
        let ok = memo(vec![risk(0.7); 3], vec![opportunity(); 3]);
        assert!(ok.validate().is_ok());

        let few_risks = memo(vec![risk(0.7); 2], vec![opportunity(); 3]);
        let err = few_risks.validate().unwrap_err();
        assert!(err.to_string().contains("at least 3 risks"));

        let few_opps = memo(vec![risk(0.7); 3], vec![opportunity(); 1]);
        assert!(few_opps.validate().is_err());
    }

    #[test]
    fn test_memo_rejects_out_of_range_confidence() {
        let bad = memo(vec![risk(0.7), risk(1.5), risk(0.2)], vec![opportunity(); 3]);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Completed.as_str(), "completed");
        assert_eq!("RUNNING".parse::<RunStatus>().unwrap(), RunStatus::Running);
        assert!("paused".parse::<RunStatus>().is_err());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }

    #[test]
    fn test_source_type_serde_and_label() {
        let json = serde_json::to_string(&SourceType::SecFiling).unwrap();
        assert_eq!(json, "\"sec_filing\"");
        assert_eq!(SourceType::NewsArticle.label(), "News Article");

        let mut source = DataSource::new(1, SourceType::MarketData);
        source.url = Some("test://example.com".to_string());
        source.title = Some("Test Source".to_string());
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["type"], "market_data");
        assert_eq!(source.run_id, 1);
    }

    #[test]
    fn test_analysis_request_defaults_and_bounds() {
        let req: AnalysisRequest = serde_json::from_str(r#"{"query": "AAPL"}"#).unwrap();
        assert!(req.include_sec && req.include_news && req.include_market);
        assert_eq!(req.max_sources, 20);
        assert_eq!(req.priority, Priority::Balanced);
        assert!(req.validate().is_ok());

        let mut too_many = req.clone();
        too_many.max_sources = 60;
        assert!(too_many.validate().is_err());

        let blank = AnalysisRequest::new("   ");
        assert!(blank.validate().is_err());

        assert_eq!(AnalysisRequest::new(" msft ").normalized_query(), "MSFT");
        assert_eq!(AnalysisRequest::new("apple earnings").normalized_query(), "apple earnings");

        let mut nothing = req;
        nothing.include_sec = false;
        nothing.include_news = false;
        nothing.include_market = false;
        assert!(nothing.validate().is_err());
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("PDF".parse::<ExportFormat>().unwrap(), ExportFormat::Pdf);
        assert_eq!(ExportFormat::Pptx.extension(), "pptx");
        assert!("docx".parse::<ExportFormat>().is_err());
    }
}
