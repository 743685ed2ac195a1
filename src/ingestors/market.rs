use crate::adapters::http::{build_client, check_status, RateLimiter};
use crate::config::app_config::MarketConfig;
use crate::domain::model::{DataSource, Metadata, PriceBar, SourceType};
use crate::domain::ports::{IngestOptions, Ingestor};
use crate::ingestors::base::{create_source, group_thousands, log_ingestion_summary, now_iso, with_retry};
use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::is_ticker;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SUMMARY_MODULES: &str =
    "assetProfile,summaryDetail,defaultKeyStatistics,financialData,earnings,calendarEvents";

const MARKET_USER_AGENT: &str = "Mozilla/5.0 (compatible; research-analyst/0.1)";

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartResult {
    pub meta: ChartMeta,
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub indicators: Indicators,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
    pub symbol: Option<String>,
    pub currency: Option<String>,
    pub long_name: Option<String>,
    pub short_name: Option<String>,
    pub exchange_name: Option<String>,
    pub instrument_type: Option<String>,
    pub regular_market_price: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Indicators {
    #[serde(default)]
    pub quote: Vec<QuoteSeries>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuoteSeries {
    #[serde(default)]
    pub open: Vec<Option<f64>>,
    #[serde(default)]
    pub high: Vec<Option<f64>>,
    #[serde(default)]
    pub low: Vec<Option<f64>>,
    #[serde(default)]
    pub close: Vec<Option<f64>>,
    #[serde(default)]
    pub volume: Vec<Option<f64>>,
}

impl ChartResult {
    /// Bars with a close price; missing OHLV values fall back to the close/zero.
    pub fn bars(&self) -> Vec<PriceBar> {
        let Some(quote) = self.indicators.quote.first() else {
            return Vec::new();
        };
        let at = |series: &[Option<f64>], i: usize| series.get(i).copied().flatten();

        self.timestamp
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let close = at(&quote.close, i)?;
                let timestamp = DateTime::<Utc>::from_timestamp(*ts, 0)?;
                Some(PriceBar {
                    timestamp,
                    open: at(&quote.open, i).unwrap_or(close),
                    high: at(&quote.high, i).unwrap_or(close),
                    low: at(&quote.low, i).unwrap_or(close),
                    close,
                    volume: at(&quote.volume, i).unwrap_or(0.0),
                })
            })
            .collect()
    }
}

/// Summary statistics over a price history window.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryMetrics {
    pub latest_price: f64,
    pub price_change: f64,
    pub price_change_pct: f64,
    pub volatility: f64,
    pub ma_20: Option<f64>,
    pub ma_50: Option<f64>,
    pub volume_avg: f64,
    pub data_points: usize,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn trailing_mean(values: &[f64], window: usize) -> Option<f64> {
    (values.len() >= window).then(|| mean(&values[values.len() - window..]))
}

/// Sample standard deviation (n - 1).
fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

pub fn history_metrics(bars: &[PriceBar]) -> Option<HistoryMetrics> {
    let first = bars.first()?;
    let last = bars.last()?;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let price_change = last.close - first.close;
    let price_change_pct = if first.close != 0.0 {
        price_change / first.close * 100.0
    } else {
        0.0
    };

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect();

    Some(HistoryMetrics {
        latest_price: last.close,
        price_change,
        price_change_pct,
        volatility: std_dev(&returns) * 252f64.sqrt(),
        ma_20: trailing_mean(&closes, 20),
        ma_50: trailing_mean(&closes, 50),
        volume_avg: mean(&bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
        data_points: bars.len(),
    })
}

/// Reads `{"raw": x}` wrappers as well as bare numbers.
fn raw_number(value: &Value, path: &[&str]) -> Option<f64> {
    let mut node = value;
    for key in path {
        node = node.get(key)?;
    }
    node.get("raw").and_then(Value::as_f64).or_else(|| node.as_f64())
}

fn raw_string(value: &Value, path: &[&str]) -> Option<String> {
    let mut node = value;
    for key in path {
        node = node.get(key)?;
    }
    node.as_str().map(str::to_string)
}

fn title_case(key: &str) -> String {
    key.split('_')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn heading(lines: &mut Vec<String>, title: &str) {
    lines.push(title.to_string());
    lines.push("=".repeat(50));
}

const RATIO_CATEGORIES: &[(&str, &[(&str, &str, &str)])] = &[
    (
        "Valuation Ratios",
        &[
            ("pe_ratio", "summaryDetail", "trailingPE"),
            ("forward_pe", "summaryDetail", "forwardPE"),
            ("price_to_book", "defaultKeyStatistics", "priceToBook"),
            ("price_to_sales", "summaryDetail", "priceToSalesTrailing12Months"),
            ("enterprise_value_to_ebitda", "defaultKeyStatistics", "enterpriseToEbitda"),
        ],
    ),
    (
        "Profitability Ratios",
        &[
            ("return_on_equity", "financialData", "returnOnEquity"),
            ("return_on_assets", "financialData", "returnOnAssets"),
            ("profit_margin", "financialData", "profitMargins"),
            ("operating_margin", "financialData", "operatingMargins"),
        ],
    ),
    (
        "Financial Strength",
        &[
            ("current_ratio", "financialData", "currentRatio"),
            ("debt_to_equity", "financialData", "debtToEquity"),
            ("quick_ratio", "financialData", "quickRatio"),
        ],
    ),
];

/// Quotes, price history, ratios and earnings from a Yahoo-compatible API.
pub struct MarketIngestor {
    client: Client,
    config: MarketConfig,
    limiter: RateLimiter,
}

impl MarketIngestor {
    pub fn new(config: MarketConfig, timeout: Duration) -> Result<Self> {
        let client = build_client(MARKET_USER_AGENT, timeout)?;
        let limiter = RateLimiter::new(Duration::from_millis(config.min_request_interval_ms));
        tracing::info!("Market ingestor initialized ({})", config.base_url);
        Ok(Self {
            client,
            config,
            limiter,
        })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value> {
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        with_retry("market", self.config.max_retries, retry_delay, || async {
            self.limiter.wait().await;
            let response = self.client.get(url).query(query).send().await?;
            let response = check_status("market", response)?;
            Ok::<Value, AnalystError>(response.json::<Value>().await?)
        })
        .await
    }

    pub async fn fetch_chart(&self, ticker: &str) -> Result<ChartResult> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url(), ticker);
        let payload = self
            .get_json(
                &url,
                &[
                    ("range", self.config.period.as_str()),
                    ("interval", self.config.interval.as_str()),
                ],
            )
            .await?;

        let envelope: ChartEnvelope = serde_json::from_value(payload)?;
        if let Some(err) = envelope.chart.error.filter(|e| !e.is_null()) {
            return Err(AnalystError::ingestion("market", format!("chart error: {}", err)));
        }
        envelope
            .chart
            .result
            .and_then(|mut r| (!r.is_empty()).then(|| r.remove(0)))
            .ok_or_else(|| AnalystError::ingestion("market", format!("no chart data for {}", ticker)))
    }

    pub async fn fetch_summary(&self, ticker: &str) -> Result<Value> {
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url(), ticker);
        let payload = self.get_json(&url, &[("modules", SUMMARY_MODULES)]).await?;
        payload
            .pointer("/quoteSummary/result/0")
            .cloned()
            .ok_or_else(|| AnalystError::ingestion("market", format!("no summary data for {}", ticker)))
    }

    fn ticker_info(&self, ticker: &str, run_id: i64, chart: &ChartResult, summary: Option<&Value>) -> DataSource {
        let meta = &chart.meta;
        let empty = Value::Null;
        let s = summary.unwrap_or(&empty);

        let company_name = meta
            .long_name
            .clone()
            .or_else(|| meta.short_name.clone())
            .or_else(|| raw_string(s, &["quoteType", "longName"]))
            .unwrap_or_else(|| "Unknown".to_string());
        let sector = raw_string(s, &["assetProfile", "sector"]).unwrap_or_else(|| "Unknown".to_string());
        let industry =
            raw_string(s, &["assetProfile", "industry"]).unwrap_or_else(|| "Unknown".to_string());
        let market_cap = raw_number(s, &["summaryDetail", "marketCap"]);
        let enterprise_value = raw_number(s, &["defaultKeyStatistics", "enterpriseValue"]);
        let pe_ratio = raw_number(s, &["summaryDetail", "trailingPE"]);
        let forward_pe = raw_number(s, &["summaryDetail", "forwardPE"]);
        let price_to_book = raw_number(s, &["defaultKeyStatistics", "priceToBook"]);
        let dividend_yield = raw_number(s, &["summaryDetail", "dividendYield"]);
        let beta = raw_number(s, &["summaryDetail", "beta"]);
        let high_52 = meta
            .fifty_two_week_high
            .or_else(|| raw_number(s, &["summaryDetail", "fiftyTwoWeekHigh"]));
        let low_52 = meta
            .fifty_two_week_low
            .or_else(|| raw_number(s, &["summaryDetail", "fiftyTwoWeekLow"]));

        let mut lines = Vec::new();
        heading(&mut lines, "COMPANY INFORMATION");
        lines.push(format!("Company Name: {}", company_name));
        lines.push(format!("Sector: {}", sector));
        lines.push(format!("Industry: {}", industry));
        let money = |label: &str, v: Option<f64>| v.map(|v| format!("{}: ${}", label, group_thousands(v)));
        let ratio = |label: &str, v: Option<f64>| v.map(|v| format!("{}: {:.2}", label, v));
        lines.extend(money("Market Cap", market_cap));
        lines.extend(money("Enterprise Value", enterprise_value));
        lines.extend(ratio("P/E Ratio", pe_ratio));
        lines.extend(ratio("Forward P/E", forward_pe));
        lines.extend(ratio("Price to Book", price_to_book));
        lines.extend(dividend_yield.map(|v| format!("Dividend Yield: {:.2}%", v * 100.0)));
        lines.extend(ratio("Beta", beta));
        lines.extend(ratio("52 Week High", high_52));
        lines.extend(ratio("52 Week Low", low_52));
        lines.extend(ratio("Current Price", meta.regular_market_price));

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(ticker));
        metadata.insert("company_name".into(), json!(company_name));
        metadata.insert("sector".into(), json!(sector));
        metadata.insert("industry".into(), json!(industry));
        metadata.insert("market_cap".into(), json!(market_cap));
        metadata.insert("enterprise_value".into(), json!(enterprise_value));
        metadata.insert("pe_ratio".into(), json!(pe_ratio));
        metadata.insert("forward_pe".into(), json!(forward_pe));
        metadata.insert("price_to_book".into(), json!(price_to_book));
        metadata.insert("dividend_yield".into(), json!(dividend_yield));
        metadata.insert("beta".into(), json!(beta));
        metadata.insert("currency".into(), json!(meta.currency));
        metadata.insert("current_price".into(), json!(meta.regular_market_price));
        metadata.insert("extracted_at".into(), now_iso());

        create_source(
            SourceType::MarketData,
            run_id,
            format!("market://{}/info", ticker),
            format!("{} Company Information", ticker),
            Some(Utc::now()),
            lines.join("\n"),
            metadata,
        )
    }

    fn historical_data(&self, ticker: &str, run_id: i64, chart: &ChartResult) -> Option<DataSource> {
        let bars = chart.bars();
        let m = history_metrics(&bars)?;

        let mut lines = Vec::new();
        heading(&mut lines, "HISTORICAL PRICE DATA");
        lines.push(format!("Period: {}", self.config.period));
        lines.push(format!("Data Points: {}", m.data_points));
        lines.push(format!("Latest Price: ${:.2}", m.latest_price));
        lines.push(format!(
            "Price Change: ${:.2} ({:.2}%)",
            m.price_change, m.price_change_pct
        ));
        lines.push(format!("Volatility (Annualized): {:.2}%", m.volatility * 100.0));
        if let Some(ma) = m.ma_20 {
            lines.push(format!("20-Day Moving Average: ${:.2}", ma));
        }
        if let Some(ma) = m.ma_50 {
            lines.push(format!("50-Day Moving Average: ${:.2}", ma));
        }
        lines.push(format!("Average Volume: {}", group_thousands(m.volume_avg)));
        lines.push(String::new());
        lines.push("Recent Prices:".to_string());
        lines.push("-".repeat(20));
        for bar in bars.iter().rev().take(5).rev() {
            lines.push(format!(
                "{}: Open=${:.2}, Close=${:.2}, Volume={}",
                bar.timestamp.format("%Y-%m-%d"),
                bar.open,
                bar.close,
                group_thousands(bar.volume)
            ));
        }

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(ticker));
        metadata.insert("period".into(), json!(self.config.period));
        metadata.insert("interval".into(), json!(self.config.interval));
        metadata.insert("data_points".into(), json!(m.data_points));
        metadata.insert("latest_price".into(), json!(m.latest_price));
        metadata.insert("price_change".into(), json!(m.price_change));
        metadata.insert("price_change_pct".into(), json!(m.price_change_pct));
        metadata.insert("volatility".into(), json!(m.volatility));
        metadata.insert("ma_20".into(), json!(m.ma_20));
        metadata.insert("ma_50".into(), json!(m.ma_50));
        metadata.insert("volume_avg".into(), json!(m.volume_avg));
        metadata.insert("bars".into(), json!(bars));
        metadata.insert("extracted_at".into(), now_iso());

        Some(create_source(
            SourceType::MarketData,
            run_id,
            format!("market://{}/history", ticker),
            format!("{} Historical Data ({})", ticker, self.config.period),
            Some(Utc::now()),
            lines.join("\n"),
            metadata,
        ))
    }

    fn financial_ratios(&self, ticker: &str, run_id: i64, summary: &Value) -> Option<DataSource> {
        let mut ratios = serde_json::Map::new();
        let mut lines = Vec::new();
        heading(&mut lines, "FINANCIAL RATIOS");

        for (category, keys) in RATIO_CATEGORIES {
            lines.push(String::new());
            lines.push(format!("{}:", category));
            lines.push("-".repeat(category.len()));
            for (key, module, field) in keys.iter() {
                let value = raw_number(summary, &[*module, *field]);
                ratios.insert(key.to_string(), json!(value));
                if let Some(v) = value {
                    if key.contains("margin") || key.contains("return") {
                        lines.push(format!("{}: {:.2}%", title_case(key), v * 100.0));
                    } else {
                        lines.push(format!("{}: {:.2}", title_case(key), v));
                    }
                }
            }
        }

        if ratios.values().all(Value::is_null) {
            return None;
        }

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(ticker));
        metadata.insert("ratios".into(), Value::Object(ratios));
        metadata.insert("extracted_at".into(), now_iso());

        Some(create_source(
            SourceType::MarketData,
            run_id,
            format!("market://{}/ratios", ticker),
            format!("{} Financial Ratios", ticker),
            Some(Utc::now()),
            lines.join("\n"),
            metadata,
        ))
    }

    fn earnings_data(&self, ticker: &str, run_id: i64, summary: &Value) -> Option<DataSource> {
        let empty = Vec::new();
        let yearly = summary
            .pointer("/earnings/financialsChart/yearly")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let quarterly = summary
            .pointer("/earnings/earningsChart/quarterly")
            .and_then(Value::as_array)
            .unwrap_or(&empty);
        let upcoming = summary
            .pointer("/calendarEvents/earnings/earningsDate")
            .or_else(|| summary.pointer("/earnings/earningsChart/earningsDate"))
            .and_then(Value::as_array)
            .unwrap_or(&empty);

        if yearly.is_empty() && quarterly.is_empty() && upcoming.is_empty() {
            tracing::info!("No earnings data available for {}", ticker);
            return None;
        }

        let display = |v: &Value, key: &str| -> String {
            raw_number(v, &[key])
                .map(|n| {
                    if n.abs() >= 1000.0 {
                        group_thousands(n)
                    } else {
                        format!("{:.2}", n)
                    }
                })
                .unwrap_or_else(|| "N/A".to_string())
        };
        let date_of = |v: &Value| -> String {
            v.get("date")
                .map(|d| d.as_str().map(str::to_string).unwrap_or_else(|| d.to_string()))
                .unwrap_or_else(|| "N/A".to_string())
        };

        let mut lines = Vec::new();
        heading(&mut lines, "EARNINGS DATA");
        if !yearly.is_empty() {
            lines.push(format!("Historical Earnings: {} periods", yearly.len()));
            lines.push(String::new());
            lines.push("Recent Earnings:".to_string());
            lines.push("-".repeat(20));
            for period in yearly.iter().rev().take(5).rev() {
                lines.push(format!(
                    "{}: EPS={}, Revenue={}",
                    date_of(period),
                    display(period, "earnings"),
                    display(period, "revenue")
                ));
            }
        }
        if !quarterly.is_empty() {
            lines.push(String::new());
            lines.push("Quarterly EPS:".to_string());
            lines.push("-".repeat(20));
            for q in quarterly.iter().rev().take(5).rev() {
                lines.push(format!(
                    "{}: Actual={}, Estimate={}",
                    date_of(q),
                    display(q, "actual"),
                    display(q, "estimate")
                ));
            }
        }
        if !upcoming.is_empty() {
            lines.push(String::new());
            lines.push(format!("Earnings Dates: {} dates", upcoming.len()));
            for d in upcoming.iter().take(5) {
                let label = d
                    .get("fmt")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| d.to_string());
                lines.push(format!("Upcoming: {}", label));
            }
        }

        let mut metadata = Metadata::new();
        metadata.insert("ticker".into(), json!(ticker));
        metadata.insert("has_earnings".into(), json!(!yearly.is_empty()));
        metadata.insert("has_earnings_dates".into(), json!(!upcoming.is_empty()));
        metadata.insert("quarterly".into(), json!(quarterly));
        metadata.insert("extracted_at".into(), now_iso());

        Some(create_source(
            SourceType::MarketData,
            run_id,
            format!("market://{}/earnings", ticker),
            format!("{} Earnings Data", ticker),
            Some(Utc::now()),
            lines.join("\n"),
            metadata,
        ))
    }
}

fn collect(sources: &mut Vec<DataSource>, ticker: &str, label: &str, piece: Result<Option<DataSource>>) {
    match piece {
        Ok(Some(source)) => {
            tracing::info!("✅ Collected {} for {}", label, ticker);
            sources.push(source);
        }
        Ok(None) => tracing::warn!("⚠️ No {} collected for {}", label, ticker),
        Err(e) => tracing::error!("❌ Failed to get {} for {}: {}", label, ticker, e),
    }
}

#[async_trait]
impl Ingestor for MarketIngestor {
    fn source_type(&self) -> SourceType {
        SourceType::MarketData
    }

    fn name(&self) -> &'static str {
        "market"
    }

    fn can_handle(&self, query: &str) -> bool {
        is_ticker(query)
    }

    async fn ingest(&self, query: &str, run_id: i64, options: &IngestOptions) -> Result<Vec<DataSource>> {
        if !self.can_handle(query) {
            tracing::warn!("Market ingestor cannot handle query: {:?}", query);
            return Ok(Vec::new());
        }
        let ticker = query.trim().to_uppercase();
        tracing::info!("📈 Starting market data ingestion for {}", ticker);

        let chart = self.fetch_chart(&ticker).await;
        let summary = self.fetch_summary(&ticker).await;
        if let Err(e) = &summary {
            tracing::warn!("Quote summary unavailable for {}: {}", ticker, e);
        }

        let mut sources = Vec::new();
        let summary_ref = summary.as_ref().ok();

        let info = match &chart {
            Ok(c) => Ok(Some(self.ticker_info(&ticker, run_id, c, summary_ref))),
            Err(e) => Err(AnalystError::ingestion("market", e.to_string())),
        };
        collect(&mut sources, &ticker, "ticker info", info);

        let history = match &chart {
            Ok(c) => Ok(self.historical_data(&ticker, run_id, c)),
            Err(e) => Err(AnalystError::ingestion("market", e.to_string())),
        };
        collect(&mut sources, &ticker, "historical data", history);

        let ratios = match summary_ref {
            Some(s) => Ok(self.financial_ratios(&ticker, run_id, s)),
            None => Ok(None),
        };
        collect(&mut sources, &ticker, "financial ratios", ratios);

        let earnings = match summary_ref {
            Some(s) => Ok(self.earnings_data(&ticker, run_id, s)),
            None => Ok(None),
        };
        collect(&mut sources, &ticker, "earnings data", earnings);

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
    use chrono::TimeZone;
    use httpmock::prelude::*;

    fn bar(day: u32, close: f64, volume: f64) -> PriceBar {
        PriceBar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume,
        }
    }

    #[test]
    fn test_history_metrics() {
        let bars = vec![bar(1, 100.0, 1000.0), bar(2, 110.0, 3000.0), bar(3, 99.0, 2000.0)];
        let m = history_metrics(&bars).unwrap();
        assert_eq!(m.latest_price, 99.0);
        assert!((m.price_change - -1.0).abs() < 1e-9);
        assert!((m.price_change_pct - -1.0).abs() < 1e-9);
        assert_eq!(m.volume_avg, 2000.0);
        assert_eq!(m.data_points, 3);
        assert!(m.ma_20.is_none());
        assert!(m.volatility > 0.0);
        assert!(history_metrics(&[]).is_none());
    }

    #[test]
    fn test_moving_average_needs_full_window() {
        let bars: Vec<PriceBar> = (1..=25).map(|d| bar(d, d as f64, 10.0)).collect();
        let m = history_metrics(&bars).unwrap();
        // mean of 6..=25
        assert_eq!(m.ma_20, Some(15.5));
        assert!(m.ma_50.is_none());
    }

    #[test]
    fn test_raw_number_reads_wrapped_values() {
        let v = json!({"summaryDetail": {"marketCap": {"raw": 3.0e12, "fmt": "3T"}, "beta": 1.2}});
        assert_eq!(raw_number(&v, &["summaryDetail", "marketCap"]), Some(3.0e12));
        assert_eq!(raw_number(&v, &["summaryDetail", "beta"]), Some(1.2));
        assert_eq!(raw_number(&v, &["summaryDetail", "missing"]), None);
    }

    fn chart_body() -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": {
                        "symbol": "AAPL",
                        "currency": "USD",
                        "longName": "Apple Inc.",
                        "regularMarketPrice": 192.5,
                        "fiftyTwoWeekHigh": 199.6,
                        "fiftyTwoWeekLow": 164.1
                    },
                    "timestamp": [1704153600, 1704240000, 1704326400],
                    "indicators": {"quote": [{
                        "open": [187.0, 185.0, null],
                        "high": [188.0, 186.0, 184.0],
                        "low": [183.0, 182.0, 181.0],
                        "close": [185.6, 184.2, 181.9],
                        "volume": [82488700, 58414500, 71983600]
                    }]}
                }],
                "error": null
            }
        })
    }

    fn summary_body() -> Value {
        json!({
            "quoteSummary": {
                "result": [{
                    "assetProfile": {"sector": "Technology", "industry": "Consumer Electronics"},
                    "summaryDetail": {"marketCap": {"raw": 2.9e12}, "trailingPE": {"raw": 29.8}},
                    "financialData": {"profitMargins": {"raw": 0.253}, "currentRatio": {"raw": 0.98}},
                    "earnings": {"financialsChart": {"yearly": [
                        {"date": 2022, "revenue": {"raw": 394328000000.0}, "earnings": {"raw": 99803000000.0}},
                        {"date": 2023, "revenue": {"raw": 383285000000.0}, "earnings": {"raw": 96995000000.0}}
                    ]}}
                }],
                "error": null
            }
        })
    }

    fn test_config(base_url: String) -> MarketConfig {
        MarketConfig {
            base_url,
            max_retries: 2,
            retry_delay_ms: 1,
            min_request_interval_ms: 0,
            ..MarketConfig::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_all_market_sources() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/v8/finance/chart/AAPL")
                .query_param("range", "1y")
                .query_param("interval", "1d");
            then.status(200).json_body(chart_body());
        });
        server.mock(|when, then| {
            when.method(GET).path("/v10/finance/quoteSummary/AAPL");
            then.status(200).json_body(summary_body());
        });

        let ingestor = MarketIngestor::new(test_config(server.base_url()), Duration::from_secs(5)).unwrap();
        let sources = ingestor.ingest("aapl", 4, &IngestOptions::default()).await.unwrap();

        let urls: Vec<_> = sources.iter().filter_map(|s| s.url.as_deref()).collect();
        assert_eq!(
            urls,
            vec![
                "market://AAPL/info",
                "market://AAPL/history",
                "market://AAPL/ratios",
                "market://AAPL/earnings"
            ]
        );

        let info = &sources[0];
        assert_eq!(info.metadata_str("company_name"), Some("Apple Inc."));
        assert_eq!(info.metadata_str("sector"), Some("Technology"));
        assert!(info.raw_content.as_deref().unwrap().starts_with("COMPANY INFORMATION\n====="));
        assert!(info.raw_content.as_deref().unwrap().contains("Market Cap: $2,900,000,000,000"));

        let history = &sources[1];
        assert_eq!(history.metadata_f64("latest_price"), Some(181.9));
        assert_eq!(history.metadata["data_points"], json!(3));
        let bars: Vec<PriceBar> = serde_json::from_value(history.metadata["bars"].clone()).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[2].open, 181.9);

        let ratios = sources[2].raw_content.as_deref().unwrap();
        assert!(ratios.contains("Profit Margin: 25.30%"));
        assert!(ratios.contains("Pe Ratio: 29.80"));
    }

    #[tokio::test]
    async fn test_summary_failure_keeps_chart_sources() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.path("/v8/finance/chart/MSFT");
            then.status(200).json_body(chart_body());
        });
        let summary = server.mock(|when, then| {
            when.path("/v10/finance/quoteSummary/MSFT");
            then.status(500);
        });

        let ingestor = MarketIngestor::new(test_config(server.base_url()), Duration::from_secs(5)).unwrap();
        let sources = ingestor.ingest("MSFT", 1, &IngestOptions::default()).await.unwrap();

        assert_eq!(sources.len(), 2);
        summary.assert_hits(2);
    }

    #[tokio::test]
    async fn test_non_ticker_query_is_skipped() {
        let ingestor =
            MarketIngestor::new(test_config("http://127.0.0.1:9".to_string()), Duration::from_secs(1)).unwrap();
        assert!(!ingestor.can_handle("apple inc"));
        let sources = ingestor
            .ingest("apple inc", 1, &IngestOptions::default())
            .await
            .unwrap();
        assert!(sources.is_empty());
    }
}
