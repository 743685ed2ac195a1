use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, validate_user_agent, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub paths: PathsConfig,
    pub sources: SourcesConfig,
    pub processing: ProcessingConfig,
    pub export: ExportConfig,
    pub logging: LoggingConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    pub page_title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 8501,
            page_title: "AI Research Analyst Agent".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: String,
    pub database: String,
    pub exports_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            database: "data/research.db".to_string(),
            exports_dir: "exports".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub sec: SecConfig,
    pub news: NewsConfig,
    pub market: MarketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecConfig {
    pub tickers_url: String,
    pub submissions_url: String,
    pub archives_url: String,
    pub user_agent: String,
    pub rate_limit_delay_ms: u64,
    pub max_filings: usize,
    pub filing_types: Vec<String>,
    pub max_document_bytes: usize,
}

impl Default for SecConfig {
    fn default() -> Self {
        Self {
            tickers_url: "https://www.sec.gov/files/company_tickers.json".to_string(),
            submissions_url: "https://data.sec.gov/submissions".to_string(),
            archives_url: "https://www.sec.gov/Archives/edgar/data".to_string(),
            user_agent: "AI Research Assistant (your-email@domain.com)".to_string(),
            rate_limit_delay_ms: 100,
            max_filings: 5,
            filing_types: vec!["10-K".to_string(), "10-Q".to_string()],
            max_document_bytes: 2_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub rss_feeds: Vec<String>,
    pub max_articles: usize,
    pub article_timeout_secs: u64,
    pub respect_robots_txt: bool,
    pub scrape_articles: bool,
    pub feed_delay_ms: u64,
    pub user_agent: String,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            rss_feeds: vec![
                "https://feeds.finance.yahoo.com/rss/2.0/headline".to_string(),
                "https://www.marketwatch.com/rss/topstories".to_string(),
                "https://feeds.bloomberg.com/markets/news.rss".to_string(),
                "https://www.cnbc.com/id/100003114/device/rss/rss.html".to_string(),
                "https://feeds.npr.org/1007/rss.xml".to_string(),
            ],
            max_articles: 30,
            article_timeout_secs: 15,
            respect_robots_txt: true,
            scrape_articles: true,
            feed_delay_ms: 500,
            user_agent: "AI Research Assistant (your-email@domain.com)".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub base_url: String,
    pub period: String,
    pub interval: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub min_request_interval_ms: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://query1.finance.yahoo.com".to_string(),
            period: "1y".to_string(),
            interval: "1d".to_string(),
            max_retries: 3,
            retry_delay_ms: 1000,
            min_request_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub overlap: usize,
    pub max_risks: usize,
    pub max_opportunities: usize,
    pub max_metrics: usize,
    pub min_confidence: f64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            min_chunk_size: 100,
            max_chunk_size: 2000,
            overlap: 200,
            max_risks: 5,
            max_opportunities: 5,
            max_metrics: 10,
            min_confidence: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub pdf_font_size: f32,
    pub pdf_line_height: f32,
    pub pptx_slide_width_in: f32,
    pub pptx_slide_height_in: f32,
    pub pptx_title_font_size: u32,
    pub pptx_body_font_size: u32,
    pub include_sources: bool,
    pub include_charts: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            pdf_font_size: 11.0,
            pdf_line_height: 1.2,
            pptx_slide_width_in: 9.0,
            pptx_slide_height_in: 6.75,
            pptx_title_font_size: 24,
            pptx_body_font_size: 18,
            include_sources: true,
            include_charts: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "compact" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_concurrent_requests: usize,
    pub request_timeout_secs: u64,
    pub max_analysis_time_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            request_timeout_secs: 30,
            max_analysis_time_secs: 300,
            max_retries: 3,
            retry_delay_ms: 1000,
        }
    }
}

impl AppConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(AnalystError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// Loads `path` when it exists, otherwise falls back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            tracing::info!(
                "Config file {} not found, using defaults",
                path.as_ref().display()
            );
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| AnalystError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SEC_USER_AGENT})；未設定的變數保持原樣
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| AnalystError::config(e.to_string()))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.paths.database)
    }

    pub fn exports_dir(&self) -> PathBuf {
        PathBuf::from(&self.paths.exports_dir)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.request_timeout_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.logging.format.eq_ignore_ascii_case("json")
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("server.address", &self.server.address)?;
        validate_range("server.port", self.server.port, 1, u16::MAX)?;

        validate_path("paths.database", &self.paths.database)?;
        validate_path("paths.exports_dir", &self.paths.exports_dir)?;

        let sec = &self.sources.sec;
        validate_url("sources.sec.tickers_url", &sec.tickers_url)?;
        validate_url("sources.sec.submissions_url", &sec.submissions_url)?;
        validate_url("sources.sec.archives_url", &sec.archives_url)?;
        validate_user_agent("sources.sec.user_agent", &sec.user_agent)?;
        validate_positive_number("sources.sec.max_filings", sec.max_filings, 1)?;
        if sec.filing_types.is_empty() {
            return Err(AnalystError::MissingConfigError {
                field: "sources.sec.filing_types".to_string(),
            });
        }

        for feed in &self.sources.news.rss_feeds {
            validate_url("sources.news.rss_feeds", feed)?;
        }
        validate_positive_number("sources.news.max_articles", self.sources.news.max_articles, 1)?;

        validate_url("sources.market.base_url", &self.sources.market.base_url)?;
        validate_range("sources.market.max_retries", self.sources.market.max_retries, 1, 10)?;

        let p = &self.processing;
        validate_positive_number("processing.min_chunk_size", p.min_chunk_size, 1)?;
        if p.max_chunk_size <= p.min_chunk_size || p.overlap >= p.max_chunk_size {
            return Err(AnalystError::InvalidConfigValueError {
                field: "processing.max_chunk_size".to_string(),
                value: p.max_chunk_size.to_string(),
                reason: "must exceed min_chunk_size and overlap".to_string(),
            });
        }
        validate_range("processing.max_risks", p.max_risks, 3, 20)?;
        validate_range("processing.max_opportunities", p.max_opportunities, 3, 20)?;
        validate_range("processing.min_confidence", p.min_confidence, 0.0, 1.0)?;

        let valid_formats = ["compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_ascii_lowercase().as_str()) {
            return Err(AnalystError::InvalidConfigValueError {
                field: "logging.format".to_string(),
                value: self.logging.format.clone(),
                reason: format!("Valid formats: {}", valid_formats.join(", ")),
            });
        }

        validate_positive_number(
            "performance.max_concurrent_requests",
            self.performance.max_concurrent_requests,
            1,
        )?;
        validate_range("performance.max_retries", self.performance.max_retries, 1, 10)?;

        Ok(())
    }
}
