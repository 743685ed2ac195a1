use crate::domain::model::{DataSource, Memo, SourceType, TechnicalReport, TextChunk};
use crate::utils::error::Result;
use async_trait::async_trait;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// Per-call knobs derived from the analysis request and its priority.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Upper bound on sources this ingestor should return.
    pub max_items: Option<usize>,
    /// Fetch full article bodies instead of feed summaries.
    pub scrape_articles: bool,
    /// Filings per form type; `None` uses the configured split.
    pub filings_per_type: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_items: None,
            scrape_articles: true,
            filings_per_type: None,
        }
    }
}

/// Fetches one category of external data for a query.
#[async_trait]
pub trait Ingestor: Send + Sync {
    fn source_type(&self) -> SourceType;

    fn name(&self) -> &'static str;

    fn can_handle(&self, query: &str) -> bool;

    async fn ingest(&self, query: &str, run_id: i64, options: &IngestOptions)
        -> Result<Vec<DataSource>>;

    async fn cleanup(&self) -> Result<()> {
        Ok(())
    }
}

/// A chunk tied to the position of its source in `AnalysisOutput::sources`.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub source_index: usize,
    pub chunk: TextChunk,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    pub sources: Vec<DataSource>,
    pub chunks: Vec<PendingChunk>,
    /// Memo whose `source_ids` are 1-based positions into `sources` until loaded.
    pub memo: Memo,
    pub technical: Option<TechnicalReport>,
}

#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn extract(&self) -> Result<Vec<DataSource>>;
    async fn transform(&self, sources: Vec<DataSource>) -> Result<AnalysisOutput>;
    /// Persists the output and returns the memo id.
    async fn load(&self, output: AnalysisOutput) -> Result<i64>;
}
