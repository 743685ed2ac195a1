use crate::adapters::sqlite::Database;
use crate::config::AppConfig;
use crate::core::analyzer::RuleBasedAnalyzer;
use crate::core::chunker::TextChunker;
use crate::core::technical;
use crate::domain::model::{AnalysisRequest, DataSource, Memo, Metadata, Priority, SourceType};
use crate::domain::ports::{AnalysisOutput, IngestOptions, Ingestor, Pipeline};
use crate::report::{html, MemoDocument};
use crate::utils::error::Result;
use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;

/// One analysis run: ingest, analyse, persist.
pub struct AnalysisPipeline {
    run_id: i64,
    request: AnalysisRequest,
    ingestors: Vec<Arc<dyn Ingestor>>,
    db: Database,
    config: Arc<AppConfig>,
}

impl AnalysisPipeline {
    pub fn new(
        run_id: i64,
        request: AnalysisRequest,
        ingestors: Vec<Arc<dyn Ingestor>>,
        db: Database,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            run_id,
            request,
            ingestors,
            db,
            config,
        }
    }

    pub fn ticker(&self) -> String {
        self.request.normalized_query().to_uppercase()
    }

    fn enabled(&self, source_type: SourceType) -> bool {
        match source_type {
            SourceType::SecFiling => self.request.include_sec,
            SourceType::NewsArticle | SourceType::RssFeed => self.request.include_news,
            SourceType::MarketData => self.request.include_market,
        }
    }

    /// Speed skips scraping and keeps one filing per type; quality always scrapes.
    pub fn ingest_options(&self) -> IngestOptions {
        let news = &self.config.sources.news;
        let (scrape_articles, filings_per_type) = match self.request.priority {
            Priority::Speed => (false, Some(1)),
            Priority::Balanced => (news.scrape_articles, None),
            Priority::Quality => (true, None),
        };
        IngestOptions {
            max_items: Some(self.request.max_sources),
            scrape_articles,
            filings_per_type,
        }
    }
}

#[async_trait::async_trait]
impl Pipeline for AnalysisPipeline {
    async fn extract(&self) -> Result<Vec<DataSource>> {
        let query = self.request.normalized_query();
        let options = self.ingest_options();

        let active: Vec<&Arc<dyn Ingestor>> = self
            .ingestors
            .iter()
            .filter(|i| self.enabled(i.source_type()))
            .filter(|i| {
                let ok = i.can_handle(&query);
                if !ok {
                    tracing::info!("Skipping {} ingestor for query '{}'", i.name(), query);
                }
                ok
            })
            .collect();

        let results = join_all(active.iter().map(|ingestor| {
            let query = query.as_str();
            let options = &options;
            async move {
                tracing::info!("Fetching {} data...", ingestor.name());
                (ingestor.name(), ingestor.ingest(query, self.run_id, options).await)
            }
        }))
        .await;

        let mut sources = Vec::new();
        for (name, result) in results {
            match result {
                Ok(found) => {
                    tracing::info!("Fetched {} {} sources", found.len(), name);
                    sources.extend(found);
                }
                Err(e) => tracing::warn!("{} data failed: {}", name, e),
            }
        }

        if sources.len() > self.request.max_sources {
            tracing::debug!(
                "Capping {} sources at max_sources={}",
                sources.len(),
                self.request.max_sources
            );
            sources.truncate(self.request.max_sources);
        }
        for source in &mut sources {
            source.run_id = self.run_id;
        }
        Ok(sources)
    }

    async fn transform(&self, sources: Vec<DataSource>) -> Result<AnalysisOutput> {
        let ticker = self.ticker();
        let chunker = TextChunker::from_config(&self.config.processing);
        let chunks: Vec<_> = sources
            .iter()
            .enumerate()
            .flat_map(|(i, s)| chunker.chunk_source(i, s))
            .collect();
        tracing::debug!("Created {} chunks from {} sources", chunks.len(), sources.len());

        let analysis = RuleBasedAnalyzer::new(self.config.processing.clone()).analyze(&ticker, &sources, &chunks);

        let bars = technical::bars_from_sources(&sources);
        let technical = technical::analyze(
            &ticker,
            &bars,
            &self.config.sources.market.period,
            self.config.export.include_charts,
        );

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(ticker));
        metadata.insert("source_count".into(), json!(sources.len()));
        metadata.insert("chunk_count".into(), json!(chunks.len()));
        metadata.insert("priority".into(), json!(self.request.priority));
        if let Some(report) = &technical {
            metadata.insert("technical".into(), serde_json::to_value(report)?);
        }

        let mut memo = Memo {
            id: None,
            run_id: self.run_id,
            tldr: analysis.tldr,
            risks: analysis.risks,
            opportunities: analysis.opportunities,
            metrics: analysis.metrics,
            html_content: String::new(),
            created_at: Utc::now(),
            metadata,
        };
        let doc = MemoDocument {
            technical: technical.as_ref(),
            include_sources: self.config.export.include_sources,
            include_charts: self.config.export.include_charts,
            ..MemoDocument::new(&ticker, &memo, &sources)
        };
        let html_content = html::render_memo(&doc);
        memo.html_content = html_content;

        Ok(AnalysisOutput {
            sources,
            chunks,
            memo,
            technical,
        })
    }

    async fn load(&self, output: AnalysisOutput) -> Result<i64> {
        let AnalysisOutput {
            sources,
            chunks,
            mut memo,
            ..
        } = output;

        let mut ids = Vec::with_capacity(sources.len());
        for source in &sources {
            ids.push(self.db.add_source(source)?);
        }
        tracing::info!("Saved {} sources for run {}", ids.len(), self.run_id);

        for pending in chunks {
            let Some(source_id) = ids.get(pending.source_index).copied() else {
                continue;
            };
            let mut chunk = pending.chunk;
            chunk.source_id = source_id;
            self.db.add_chunk(&chunk)?;
        }

        let remap = |positions: &[i64]| -> Vec<i64> {
            positions
                .iter()
                .filter_map(|p| usize::try_from(*p - 1).ok().and_then(|i| ids.get(i).copied()))
                .collect()
        };
        for risk in &mut memo.risks {
            risk.source_ids = remap(&risk.source_ids);
        }
        for opp in &mut memo.opportunities {
            opp.source_ids = remap(&opp.source_ids);
        }
        for metric in &mut memo.metrics {
            metric.source_ids = remap(&metric.source_ids);
        }

        let memo_id = self.db.save_memo(&memo)?;
        tracing::info!("Saved memo {} for run {}", memo_id, self.run_id);
        Ok(memo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::IngestOptions;
    use crate::ingestors::base::create_source;
    use crate::utils::error::AnalystError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubIngestor {
        source_type: SourceType,
        name: &'static str,
        count: usize,
        fail: bool,
        seen: Mutex<Option<IngestOptions>>,
    }

    impl StubIngestor {
        fn new(source_type: SourceType, name: &'static str, count: usize) -> Self {
            Self {
                source_type,
                name,
                count,
                fail: false,
                seen: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Ingestor for StubIngestor {
        fn source_type(&self) -> SourceType {
            self.source_type
        }

        fn name(&self) -> &'static str {
            self.name
        }

        fn can_handle(&self, _query: &str) -> bool {
            true
        }

        async fn ingest(&self, query: &str, run_id: i64, options: &IngestOptions) -> Result<Vec<DataSource>> {
            *self.seen.lock().unwrap() = Some(options.clone());
            if self.fail {
                return Err(AnalystError::ingestion(self.name, "upstream down"));
            }
            Ok((0..self.count)
                .map(|i| {
                    create_source(
                        self.source_type,
                        run_id,
                        format!("https://{}.example.com/{}", self.name, i),
                        format!("{} item {}", query, i),
                        None,
                        "Risks include weak demand and losses from intense competition in key markets this year. \
                         Growth in services is expected to stay strong and profitable with new products launching."
                            .to_string(),
                        Metadata::new(),
                    )
                })
                .collect())
        }
    }

    fn pipeline(request: AnalysisRequest, ingestors: Vec<Arc<dyn Ingestor>>) -> (AnalysisPipeline, Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run(&request.query).unwrap();
        let p = AnalysisPipeline::new(run_id, request, ingestors, db.clone(), Arc::new(AppConfig::default()));
        (p, db, run_id)
    }

    #[tokio::test]
    async fn test_extract_respects_toggles_and_cap() {
        let news = Arc::new(StubIngestor::new(SourceType::NewsArticle, "news", 4));
        let sec = Arc::new(StubIngestor::new(SourceType::SecFiling, "sec", 4));
        let mut request = AnalysisRequest::new("aapl");
        request.include_sec = false;
        request.max_sources = 5;

        let (p, _db, run_id) = pipeline(request, vec![news.clone(), sec.clone()]);
        let sources = p.extract().await.unwrap();

        assert_eq!(sources.len(), 4);
        assert!(sources.iter().all(|s| s.run_id == run_id && s.source_type == SourceType::NewsArticle));
        assert!(sec.seen.lock().unwrap().is_none());
        assert_eq!(news.seen.lock().unwrap().as_ref().unwrap().max_items, Some(5));
    }

    #[tokio::test]
    async fn test_extract_skips_failing_ingestor() {
        let market = Arc::new(StubIngestor::new(SourceType::MarketData, "market", 2));
        let mut broken = StubIngestor::new(SourceType::NewsArticle, "news", 2);
        broken.fail = true;
        let mut request = AnalysisRequest::new("MSFT");
        request.max_sources = 5;

        let (p, _db, _) = pipeline(request, vec![market, Arc::new(broken)]);
        let sources = p.extract().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert!(sources.iter().all(|s| s.source_type == SourceType::MarketData));
    }

    #[test]
    fn test_priority_options() {
        let mut request = AnalysisRequest::new("AAPL");
        request.priority = Priority::Speed;
        let (p, _, _) = pipeline(request, vec![]);
        let options = p.ingest_options();
        assert!(!options.scrape_articles);
        assert_eq!(options.filings_per_type, Some(1));
    }

    #[tokio::test]
    async fn test_full_pipeline_persists_with_remapped_ids() {
        let news = Arc::new(StubIngestor::new(SourceType::NewsArticle, "news", 2));
        let (p, db, run_id) = pipeline(AnalysisRequest::new("AAPL"), vec![news]);

        let sources = p.extract().await.unwrap();
        let output = p.transform(sources).await.unwrap();
        assert!(output.memo.html_content.contains("AAPL Analysis Report"));
        assert!(output.technical.is_none());
        assert_eq!(output.memo.risks[0].source_ids, vec![1]);

        p.load(output).await.unwrap();

        let stored_sources = db.get_sources(run_id).unwrap();
        assert_eq!(stored_sources.len(), 2);
        let first_id = stored_sources[0].id.unwrap();
        assert!(!db.get_chunks(first_id).unwrap().is_empty());

        let memo = db.get_memo(run_id).unwrap().unwrap();
        assert!(memo.risks.len() >= 3);
        assert_eq!(memo.risks[0].source_ids, vec![first_id]);
        assert_eq!(memo.metadata["source_count"], json!(2));
    }
}
