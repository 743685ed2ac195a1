use crate::adapters::http::{build_client, check_robots_txt, check_status};
use crate::config::app_config::NewsConfig;
use crate::domain::model::{DataSource, Metadata, SourceType};
use crate::domain::ports::{IngestOptions, Ingestor};
use crate::ingestors::base::{create_source, log_ingestion_summary, now_iso, validate_query, with_retry};
use crate::ingestors::feed::{parse_feed, FeedEntry};
use crate::ingestors::text::{extract_article_text, strip_html};
use crate::utils::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

const BUSINESS_KEYWORDS: &[&str] = &[
    "stock", "market", "earnings", "revenue", "profit", "financial", "business", "company",
    "trading",
];

const GENERAL_KEYWORDS: &[&str] = &["economy", "investment"];

/// Names and products that identify well-known tickers in headlines.
fn company_aliases(ticker: &str) -> &'static [&'static str] {
    match ticker {
        "aapl" => &["apple", "apple inc", "iphone", "macbook", "ipad"],
        "tsla" => &["tesla", "tesla inc", "electric vehicle", "ev"],
        "msft" => &["microsoft", "microsoft corp", "windows", "azure"],
        "googl" | "goog" => &["google", "alphabet", "alphabet inc"],
        "amzn" => &["amazon", "amazon.com", "e-commerce"],
        "meta" => &["facebook", "meta platforms", "social media"],
        "nvda" => &["nvidia", "nvidia corp", "gpu", "artificial intelligence"],
        "brk" => &["berkshire hathaway", "warren buffett"],
        "jpm" => &["jpmorgan", "jpmorgan chase", "bank"],
        "v" => &["visa", "visa inc", "payment", "credit card"],
        _ => &[],
    }
}

fn looks_like_ticker(query: &str) -> bool {
    query.chars().count() <= 5
        && query.chars().any(|c| c.is_alphabetic())
        && !query.chars().any(|c| c.is_lowercase())
}

/// Decides whether a feed entry is worth keeping for `query`.
pub fn is_relevant(entry: &FeedEntry, query: &str) -> bool {
    let query = query.trim();
    if query.is_empty() {
        return true;
    }
    let query_lower = query.to_lowercase();
    let mut terms: Vec<&str> = vec![query_lower.as_str()];
    terms.extend_from_slice(company_aliases(&query_lower));

    let ticker_like = looks_like_ticker(query);
    let fields: Vec<String> = [entry.title.as_deref(), entry.summary.as_deref()]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .collect();

    for field in &fields {
        if terms.iter().any(|t| field.contains(t)) {
            return true;
        }
        if ticker_like && BUSINESS_KEYWORDS.iter().any(|k| field.contains(k)) {
            return true;
        }
    }

    if entry
        .categories
        .iter()
        .any(|c| c.to_lowercase().contains(&query_lower))
    {
        return true;
    }

    // ticker queries accept general business coverage
    if ticker_like {
        return true;
    }

    fields.iter().any(|field| {
        BUSINESS_KEYWORDS
            .iter()
            .chain(GENERAL_KEYWORDS)
            .any(|k| field.contains(k))
    })
}

/// Reads configured RSS/Atom feeds and keeps entries relevant to the query.
pub struct NewsIngestor {
    client: Client,
    config: NewsConfig,
    max_retries: u32,
    retry_delay: Duration,
}

impl NewsIngestor {
    pub fn new(config: NewsConfig, timeout: Duration, max_retries: u32, retry_delay: Duration) -> Result<Self> {
        let client = build_client(&config.user_agent, timeout)?;
        tracing::info!("News ingestor initialized with {} feeds", config.rss_feeds.len());
        Ok(Self {
            client,
            config,
            max_retries,
            retry_delay,
        })
    }

    pub fn supported_feeds(&self) -> &[String] {
        &self.config.rss_feeds
    }

    async fn fetch_text(&self, url: &str, timeout: Option<Duration>) -> Result<String> {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = check_status("news", request.send().await?)?;
        Ok(response.text().await?)
    }

    async fn process_feed(
        &self,
        feed_url: &str,
        query: &str,
        per_feed: usize,
        run_id: i64,
        scrape: bool,
    ) -> Result<Vec<DataSource>> {
        let body = with_retry("news feed", self.max_retries, self.retry_delay, || {
            self.fetch_text(feed_url, None)
        })
        .await?;
        let feed = parse_feed(&body)?;
        let feed_title = feed.title.clone().unwrap_or_else(|| "Unknown Feed".to_string());

        let mut sources = Vec::new();
        for entry in feed.entries.iter().take(per_feed) {
            if !is_relevant(entry, query) {
                continue;
            }
            sources.push(self.process_article(entry, &feed_title, query, run_id, scrape).await);
        }
        Ok(sources)
    }

    async fn process_article(
        &self,
        entry: &FeedEntry,
        feed_title: &str,
        query: &str,
        run_id: i64,
        scrape: bool,
    ) -> DataSource {
        let title = entry
            .title
            .as_deref()
            .map(strip_html)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Untitled Article".to_string());
        let url = entry.link.clone().unwrap_or_default().trim().to_string();

        let summary = entry
            .summary
            .as_deref()
            .or(entry.content.as_deref())
            .map(strip_html)
            .unwrap_or_default();

        let mut scraped = String::new();
        if scrape && !url.is_empty() {
            scraped = self.scrape_article(&url).await;
        }

        let was_scraped = !scraped.is_empty() && scraped != summary;
        let content = if !scraped.is_empty() {
            scraped
        } else if !summary.is_empty() {
            summary
        } else {
            title.clone()
        };

        let mut metadata = Metadata::new();
        metadata.insert("query".into(), json!(query));
        metadata.insert("feed_title".into(), json!(feed_title));
        metadata.insert(
            "author".into(),
            json!(entry.author.clone().unwrap_or_else(|| "Unknown".to_string())),
        );
        metadata.insert("scraped".into(), json!(was_scraped));
        metadata.insert("extracted_at".into(), now_iso());

        create_source(
            SourceType::NewsArticle,
            run_id,
            url,
            title,
            entry.published_at(),
            content,
            metadata,
        )
    }

    /// Fetches the article page; empty when blocked by robots.txt or failing.
    async fn scrape_article(&self, url: &str) -> String {
        if self.config.respect_robots_txt && !check_robots_txt(&self.client, url).await {
            tracing::debug!("robots.txt disallows {}", url);
            return String::new();
        }

        let timeout = Duration::from_secs(self.config.article_timeout_secs);
        match self.fetch_text(url, Some(timeout)).await {
            Ok(html) => extract_article_text(&html),
            Err(e) => {
                tracing::debug!("Failed to scrape article {}: {}", url, e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl Ingestor for NewsIngestor {
    fn source_type(&self) -> SourceType {
        SourceType::NewsArticle
    }

    fn name(&self) -> &'static str {
        "news"
    }

    fn can_handle(&self, query: &str) -> bool {
        validate_query(query)
    }

    async fn ingest(&self, query: &str, run_id: i64, options: &IngestOptions) -> Result<Vec<DataSource>> {
        if !self.can_handle(query) {
            tracing::warn!("News ingestor cannot handle query: {:?}", query);
            return Ok(Vec::new());
        }
        let feeds = &self.config.rss_feeds;
        if feeds.is_empty() {
            tracing::warn!("No RSS feeds configured");
            return Ok(Vec::new());
        }

        let max_articles = options
            .max_items
            .map(|m| m.min(self.config.max_articles))
            .unwrap_or(self.config.max_articles);
        let per_feed = (max_articles / feeds.len()).max(1);
        let scrape = self.config.scrape_articles && options.scrape_articles;

        tracing::info!("📰 Starting news ingestion for query: {}", query);

        let mut sources = Vec::new();
        for (i, feed_url) in feeds.iter().enumerate() {
            tracing::info!("Processing RSS feed: {}", feed_url);
            match self.process_feed(feed_url, query, per_feed, run_id, scrape).await {
                Ok(feed_sources) => {
                    tracing::info!("Feed {} returned {} sources", feed_url, feed_sources.len());
                    sources.extend(feed_sources);
                }
                Err(e) => tracing::warn!("Failed to process RSS feed {}: {}", feed_url, e),
            }

            if i + 1 < feeds.len() && self.config.feed_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.feed_delay_ms)).await;
            }
        }

        sources.truncate(max_articles);
        log_ingestion_summary(self.name(), query, &sources);
        Ok(sources)
    }
}
