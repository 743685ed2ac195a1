use crate::domain::model::{DataSource, Metadata, SourceType};
use crate::utils::error::{AnalystError, Result};
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

pub fn validate_query(query: &str) -> bool {
    !query.trim().is_empty()
}

/// SHA-256 hex digest of `content`.
pub fn content_checksum(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Runs `op` up to `max_retries` times with exponential backoff
/// (`base_delay * 2^attempt`). Only retryable errors are retried.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_retries: u32,
    base_delay: Duration,
    op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_retries.max(1);
    let backoff = ExponentialBuilder::default()
        .with_min_delay(base_delay)
        .with_factor(2.0)
        .with_max_times((attempts - 1) as usize);

    let mut attempt = 0u32;
    let result = op
        .retry(backoff)
        .when(|e: &AnalystError| e.is_retryable())
        .notify(|e: &AnalystError, wait: Duration| {
            attempt += 1;
            tracing::warn!("{}: attempt {} failed: {} (retrying in {:?})", label, attempt, e, wait);
        })
        .await;

    if let Err(e) = &result {
        if e.is_retryable() {
            tracing::error!("{}: all {} attempts failed: {}", label, attempts, e);
        }
    }
    result
}

/// Builds a source with its checksum computed from `content`.
pub fn create_source(
    source_type: SourceType,
    run_id: i64,
    url: impl Into<String>,
    title: impl Into<String>,
    published_at: Option<DateTime<Utc>>,
    content: String,
    metadata: Metadata,
) -> DataSource {
    let mut source = DataSource::new(run_id, source_type);
    source.url = Some(url.into());
    source.title = Some(title.into());
    source.published_at = published_at;
    source.checksum = (!content.is_empty()).then(|| content_checksum(&content));
    source.raw_content = Some(content);
    source.metadata = metadata;
    source
}

pub fn log_ingestion_summary(ingestor: &str, query: &str, sources: &[DataSource]) {
    tracing::info!(
        ingestor,
        count = sources.len(),
        "Ingested {} sources for query '{}' from {}",
        sources.len(),
        query,
        ingestor
    );

    let mut by_type: BTreeMap<SourceType, usize> = BTreeMap::new();
    for source in sources {
        *by_type.entry(source.source_type).or_default() += 1;
    }
    for (source_type, count) in by_type {
        tracing::debug!("  - {}: {}", source_type, count);
    }
}

/// `1234567.8` -> `"1,234,568"`
pub fn group_thousands(value: f64) -> String {
    let rounded = value.round();
    let negative = rounded < 0.0;
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if negative {
        format!("-{}", out)
    } else {
        out
    }
}

pub fn now_iso() -> serde_json::Value {
    serde_json::Value::String(Utc::now().to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_validate_query() {
        assert!(validate_query("AAPL"));
        assert!(validate_query(" apple "));
        assert!(!validate_query("   "));
        assert!(!validate_query(""));
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            content_checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_create_source() {
        let source = create_source(
            SourceType::MarketData,
            3,
            "market://AAPL/info",
            "AAPL Company Information",
            None,
            "COMPANY INFORMATION".to_string(),
            Metadata::new(),
        );
        assert_eq!(source.run_id, 3);
        assert_eq!(source.url.as_deref(), Some("market://AAPL/info"));
        assert_eq!(source.checksum.as_deref().map(str::len), Some(64));

        let empty = create_source(SourceType::NewsArticle, 1, "u", "t", None, String::new(), Metadata::new());
        assert!(empty.checksum.is_none());
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0.0), "0");
        assert_eq!(group_thousands(999.0), "999");
        assert_eq!(group_thousands(1000.0), "1,000");
        assert_eq!(group_thousands(1234567.8), "1,234,568");
        assert_eq!(group_thousands(-2500000.0), "-2,500,000");
    }

    #[tokio::test]
    async fn test_with_retry_retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<u32> = with_retry("test", 3, Duration::from_millis(1), || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AnalystError::UpstreamStatusError {
                        service: "test".to_string(),
                        status: 503,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry("test", 2, Duration::from_millis(1), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AnalystError::UpstreamStatusError {
                    service: "test".to_string(),
                    status: 500,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_skips_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: Result<()> = with_retry("test", 5, Duration::from_millis(1), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AnalystError::validation("bad ticker"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
