pub mod base;
pub mod feed;
pub mod market;
pub mod news;
pub mod sec;
pub mod text;

pub use market::MarketIngestor;
pub use news::NewsIngestor;
pub use sec::SecIngestor;

use crate::config::AppConfig;
use crate::domain::ports::Ingestor;
use crate::utils::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Market, news and SEC ingestors in the order runs consult them.
pub fn build_ingestors(config: &AppConfig) -> Result<Vec<Arc<dyn Ingestor>>> {
    let timeout = config.request_timeout();
    let retries = config.performance.max_retries;
    let retry_delay = Duration::from_millis(config.performance.retry_delay_ms);

    Ok(vec![
        Arc::new(MarketIngestor::new(config.sources.market.clone(), timeout)?),
        Arc::new(NewsIngestor::new(config.sources.news.clone(), timeout, retries, retry_delay)?),
        Arc::new(SecIngestor::new(config.sources.sec.clone(), timeout, retries, retry_delay)?),
    ])
}
