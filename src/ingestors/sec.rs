use crate::adapters::http::{build_client, check_status, RateLimiter};
use crate::config::app_config::SecConfig;
use crate::domain::model::{DataSource, Metadata, SourceType};
use crate::domain::ports::{IngestOptions, Ingestor};
use crate::ingestors::base::{create_source, log_ingestion_summary, now_iso, with_retry};
use crate::ingestors::text::{collapse_whitespace, decode_entities, truncate_to_boundary};
use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::is_ticker;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
struct TickerEntry {
    cik_str: u64,
    ticker: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct Submissions {
    #[serde(default)]
    name: Option<String>,
    filings: SubmissionFilings,
}

#[derive(Debug, Deserialize)]
struct SubmissionFilings {
    recent: RecentFilings,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
}

/// One filing picked from the submissions index.
#[derive(Debug, Clone, PartialEq)]
pub struct FilingRef {
    pub accession_number: String,
    pub filing_date: String,
    pub form: String,
    pub primary_document: String,
}

/// Company identity resolved from the ticker map.
#[derive(Debug, Clone, PartialEq)]
pub struct Company {
    pub cik: u64,
    pub ticker: String,
    pub name: String,
}

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn header_tag(content: &str, tag: &str) -> Option<String> {
    static CACHE: OnceLock<Vec<(String, Regex)>> = OnceLock::new();
    let patterns = CACHE.get_or_init(|| {
        ["FILING-DATE", "COMPANY-CONFORMED-NAME", "CIK", "TYPE", "ACCESSION-NUMBER"]
            .iter()
            .map(|t| {
                (
                    t.to_string(),
                    Regex::new(&format!(r"<{}>\s*([^<\n]+)", t)).expect("static regex"),
                )
            })
            .collect()
    });
    patterns
        .iter()
        .find(|(name, _)| name == tag)
        .and_then(|(_, re)| re.captures(content))
        .map(|c| c[1].trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fills metadata from the SGML header tags when the document carries them.
pub fn extract_filing_metadata(content: &str, metadata: &mut Metadata) {
    if let Some(date) = header_tag(content, "FILING-DATE") {
        let parsed = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&date, "%Y%m%d"));
        if let Ok(d) = parsed {
            metadata.insert("filing_date".into(), json!(d.format("%Y-%m-%d").to_string()));
        }
    }
    if let Some(name) = header_tag(content, "COMPANY-CONFORMED-NAME") {
        metadata.insert("company_name".into(), json!(name));
    }
    if let Some(cik) = header_tag(content, "CIK") {
        if cik.chars().all(|c| c.is_ascii_digit()) {
            metadata.insert("cik".into(), json!(cik));
        }
    }
    if let Some(doc_type) = header_tag(content, "TYPE") {
        metadata.insert("document_type".into(), json!(doc_type));
    }
    if let Some(acc) = header_tag(content, "ACCESSION-NUMBER") {
        metadata.insert("accession_number".into(), json!(acc));
    }
}

/// Strips markup and the standard cover-page boilerplate.
pub fn clean_filing_content(content: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static BOILERPLATE: OnceLock<Vec<Regex>> = OnceLock::new();

    let without_tags = regex(&TAGS, r"(?s)<[^>]+>").replace_all(content, " ");
    let mut text = collapse_whitespace(&decode_entities(&without_tags));

    let patterns = BOILERPLATE.get_or_init(|| {
        [
            r"(?is)UNITED STATES SECURITIES AND EXCHANGE COMMISSION.*?Washington,\s*D\.C\.\s*\d+",
            r"(?is)FORM\s+\d+[-\w]*\s*[-–]\s*.*?REPORT",
            r"(?is)PURSUANT TO SECTION\s+\d+.*?OF THE SECURITIES EXCHANGE ACT OF 1934",
            r"(?is)For the.*?ended.*?\d+",
            r"(?is)Commission File Number:\s*\d+[-–]\d+",
            r"(?is)\(Exact name of registrant as specified in its charter\)",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
    });
    for re in patterns {
        text = re.replace_all(&text, "").into_owned();
    }
    collapse_whitespace(&text)
}

/// EDGAR client: ticker map, submissions index and primary documents.
pub struct SecIngestor {
    client: Client,
    config: SecConfig,
    limiter: RateLimiter,
    max_retries: u32,
    retry_delay: Duration,
    tickers: tokio::sync::OnceCell<HashMap<String, Company>>,
}

impl SecIngestor {
    pub fn new(config: SecConfig, timeout: Duration, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = build_client(&config.user_agent, timeout)?;
        let limiter = RateLimiter::new(Duration::from_millis(config.rate_limit_delay_ms));
        tracing::info!("SEC ingestor initialized (user agent: {})", config.user_agent);
        Ok(Self {
            client,
            config,
            limiter,
            max_retries,
            retry_delay,
            tickers: tokio::sync::OnceCell::new(),
        })
    }

    pub fn supported_filing_types(&self) -> &[String] {
        &self.config.filing_types
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        with_retry("sec", self.max_retries, self.retry_delay, || async {
            self.limiter.wait().await;
            let response = self.client.get(url).send().await?;
            check_status("sec", response)
        })
        .await
    }

    async fn ticker_map(&self) -> Result<&HashMap<String, Company>> {
        self.tickers
            .get_or_try_init(|| async {
                let response = self.get(&self.config.tickers_url).await?;
                let raw: HashMap<String, TickerEntry> = response.json().await?;
                let map = raw
                    .into_values()
                    .map(|e| {
                        let ticker = e.ticker.to_uppercase();
                        (
                            ticker.clone(),
                            Company {
                                cik: e.cik_str,
                                ticker,
                                name: e.title,
                            },
                        )
                    })
                    .collect::<HashMap<_, _>>();
                tracing::debug!("Loaded {} tickers from EDGAR", map.len());
                Ok::<_, AnalystError>(map)
            })
            .await
    }

    pub async fn resolve_company(&self, ticker: &str) -> Result<Company> {
        let map = self.ticker_map().await?;
        map.get(&ticker.to_uppercase())
            .cloned()
            .ok_or_else(|| AnalystError::ingestion("sec", format!("unknown ticker {}", ticker)))
    }

    async fn recent_filings(&self, company: &Company) -> Result<(Option<String>, Vec<FilingRef>)> {
        let url = format!(
            "{}/CIK{:010}.json",
            self.config.submissions_url.trim_end_matches('/'),
            company.cik
        );
        let submissions: Submissions = self.get(&url).await?.json().await?;
        let recent = submissions.filings.recent;

        let filings = recent
            .form
            .iter()
            .enumerate()
            .filter_map(|(i, form)| {
                Some(FilingRef {
                    accession_number: recent.accession_number.get(i)?.clone(),
                    filing_date: recent.filing_date.get(i).cloned().unwrap_or_default(),
                    form: form.clone(),
                    primary_document: recent.primary_document.get(i)?.clone(),
                })
            })
            .collect();
        Ok((submissions.name, filings))
    }

    fn document_url(&self, company: &Company, filing: &FilingRef) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.archives_url.trim_end_matches('/'),
            company.cik,
            filing.accession_number.replace('-', ""),
            filing.primary_document
        )
    }

    async fn download_filing(
        &self,
        company: &Company,
        company_name: &str,
        filing: &FilingRef,
        run_id: i64,
    ) -> Result<DataSource> {
        let url = self.document_url(company, filing);
        let raw = self.get(&url).await?.text().await?;

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(company.ticker));
        metadata.insert("filing_type".into(), json!(filing.form));
        metadata.insert("file_size".into(), json!(raw.len()));
        metadata.insert("filing_date".into(), json!(filing.filing_date));
        metadata.insert("company_name".into(), json!(company_name));
        metadata.insert("cik".into(), json!(company.cik.to_string()));
        metadata.insert("accession_number".into(), json!(filing.accession_number));
        metadata.insert("document_type".into(), json!(filing.form));
        metadata.insert("extracted_at".into(), now_iso());
        extract_filing_metadata(&raw, &mut metadata);

        let cleaned = clean_filing_content(&raw);
        let content = truncate_to_boundary(&cleaned, self.config.max_document_bytes).to_string();

        let filing_date = metadata
            .get("filing_date")
            .and_then(Value::as_str)
            .unwrap_or("Unknown Date")
            .to_string();
        let published_at = NaiveDate::parse_from_str(&filing_date, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc));

        Ok(create_source(
            SourceType::SecFiling,
            run_id,
            url,
            format!("{} {} - {}", company.ticker, filing.form, filing_date),
            published_at,
            content,
            metadata,
        ))
    }
}

#[async_trait]
impl Ingestor for SecIngestor {
    fn source_type(&self) -> SourceType {
        SourceType::SecFiling
    }

    fn name(&self) -> &'static str {
        "sec"
    }

    fn can_handle(&self, query: &str) -> bool {
        is_ticker(query)
    }

    async fn ingest(&self, query: &str, run_id: i64, options: &IngestOptions) -> Result<Vec<DataSource>> {
        if !self.can_handle(query) {
            tracing::warn!("SEC ingestor cannot handle query: {:?}", query);
            return Ok(Vec::new());
        }
        let ticker = query.trim().to_uppercase();
        tracing::info!("🏛️ Starting SEC ingestion for {}", ticker);

        let company = self.resolve_company(&ticker).await?;
        let (submission_name, filings) = self.recent_filings(&company).await?;
        let company_name = submission_name.unwrap_or_else(|| company.name.clone());

        let types = &self.config.filing_types;
        let per_type = options
            .filings_per_type
            .unwrap_or_else(|| (self.config.max_filings / types.len().max(1)).max(1));

        let mut sources = Vec::new();
        for filing_type in types {
            let selected: Vec<&FilingRef> = filings
                .iter()
                .filter(|f| f.form.eq_ignore_ascii_case(filing_type))
                .take(per_type)
                .collect();
            tracing::info!("Found {} {} filings for {}", selected.len(), filing_type, ticker);

            for filing in selected {
                match self.download_filing(&company, &company_name, filing, run_id).await {
                    Ok(source) => sources.push(source),
                    Err(e) => tracing::warn!(
                        "Failed to process filing {} for {}: {}",
                        filing.accession_number,
                        ticker,
                        e
                    ),
                }
            }
        }

        if let Some(max) = options.max_items {
            sources.truncate(max);
        }
        log_ingestion_summary(self.name(), &ticker, &sources);
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const UA: &str = "Research Tests tests@example.com";

    fn test_config(server: &MockServer) -> SecConfig {
        SecConfig {
            tickers_url: server.url("/files/company_tickers.json"),
            submissions_url: server.url("/submissions"),
            archives_url: server.url("/Archives/edgar/data"),
            user_agent: UA.to_string(),
            rate_limit_delay_ms: 0,
            max_filings: 2,
            ..SecConfig::default()
        }
    }

    #[test]
    fn test_clean_filing_content() {
        let raw = "<html><body><p>UNITED STATES SECURITIES AND EXCHANGE COMMISSION Washington, D.C. 20549</p>\
                   <p>(Exact name of registrant as specified in its charter)</p>\
                   <p>Revenue increased 8% driven by&nbsp;Services.</p></body></html>";
        assert_eq!(clean_filing_content(raw), "Revenue increased 8% driven by Services.");
    }

    #[test]
    fn test_extract_filing_metadata() {
        let header = "<SEC-HEADER>\n<ACCESSION-NUMBER>0000320193-23-000106\n<TYPE>10-K\n\
                      <FILING-DATE>20231103\n<COMPANY-CONFORMED-NAME>Apple Inc.\n<CIK>0000320193\n";
        let mut metadata = Metadata::new();
        extract_filing_metadata(header, &mut metadata);
        assert_eq!(metadata["filing_date"], json!("2023-11-03"));
        assert_eq!(metadata["company_name"], json!("Apple Inc."));
        assert_eq!(metadata["document_type"], json!("10-K"));
        assert_eq!(metadata["accession_number"], json!("0000320193-23-000106"));
        assert_eq!(metadata["cik"], json!("0000320193"));
    }

    #[tokio::test]
    async fn test_ingest_filings() {
        let server = MockServer::start();
        let tickers = server.mock(|when, then| {
            when.method(GET)
                .path("/files/company_tickers.json")
                .header("user-agent", UA);
            then.status(200).json_body(json!({
                "0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."},
                "1": {"cik_str": 789019, "ticker": "MSFT", "title": "MICROSOFT CORP"}
            }));
        });
        server.mock(|when, then| {
            when.path("/submissions/CIK0000320193.json");
            then.status(200).json_body(json!({
                "cik": "320193",
                "name": "Apple Inc.",
                "filings": {"recent": {
                    "accessionNumber": ["0000320193-23-000106", "0000320193-23-000077", "0000320193-23-000064"],
                    "filingDate": ["2023-11-03", "2023-08-04", "2023-05-05"],
                    "form": ["10-K", "10-Q", "8-K"],
                    "primaryDocument": ["aapl-20230930.htm", "aapl-20230701.htm", "aapl-8k.htm"]
                }}
            }));
        });
        server.mock(|when, then| {
            when.path("/Archives/edgar/data/320193/000032019323000106/aapl-20230930.htm");
            then.status(200).body("<html><body><p>Annual report: iPhone revenue grew.</p></body></html>");
        });
        server.mock(|when, then| {
            when.path("/Archives/edgar/data/320193/000032019323000077/aapl-20230701.htm");
            then.status(200).body("<html><body><p>Quarterly report: Services grew.</p></body></html>");
        });

        let ingestor = SecIngestor::new(test_config(&server), Duration::from_secs(5), 1, Duration::from_millis(1)).unwrap();
        let sources = ingestor.ingest("aapl", 9, &IngestOptions::default()).await.unwrap();

        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title.as_deref(), Some("AAPL 10-K - 2023-11-03"));
        assert_eq!(sources[0].metadata["filing_type"], json!("10-K"));
        assert_eq!(sources[0].metadata["cik"], json!("320193"));
        assert_eq!(
            sources[0].raw_content.as_deref(),
            Some("Annual report: iPhone revenue grew.")
        );
        assert!(sources[0].published_at.is_some());
        assert_eq!(sources[1].metadata["filing_type"], json!("10-Q"));
        tickers.assert_hits(1);
    }

    #[tokio::test]
    async fn test_unknown_ticker_is_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/files/company_tickers.json");
            then.status(200).json_body(json!({"0": {"cik_str": 1, "ticker": "AAPL", "title": "Apple"}}));
        });

        let ingestor = SecIngestor::new(test_config(&server), Duration::from_secs(5), 1, Duration::from_millis(1)).unwrap();
        let err = ingestor.ingest("ZZZZ", 1, &IngestOptions::default()).await.unwrap_err();
        assert!(matches!(err, AnalystError::IngestionError { .. }));
    }

    #[tokio::test]
    async fn test_non_ticker_query_is_skipped() {
        let server = MockServer::start();
        let ingestor = SecIngestor::new(test_config(&server), Duration::from_secs(5), 1, Duration::from_millis(1)).unwrap();
        assert!(ingestor.ingest("not a ticker", 1, &IngestOptions::default()).await.unwrap().is_empty());
    }
}
