//! Technical indicators and insights over daily price bars.

use crate::domain::model::{DataSource, PriceBar, SourceType, TechnicalInsight, TechnicalReport};
use std::fmt::Write as _;

pub const RSI_OVERBOUGHT: f64 = 70.0;
pub const RSI_OVERSOLD: f64 = 30.0;
const VOLUME_HIGH_RATIO: f64 = 1.5;
const VOLUME_LOW_RATIO: f64 = 0.5;

/// Indicator series aligned with the input bars; `None` until the window fills.
#[derive(Debug, Clone, Default)]
pub struct Indicators {
    pub sma_20: Vec<Option<f64>>,
    pub sma_50: Vec<Option<f64>>,
    pub ema_12: Vec<f64>,
    pub ema_26: Vec<f64>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<f64>,
    pub macd_signal: Vec<f64>,
    pub macd_histogram: Vec<f64>,
    pub bb_upper: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
    pub volume_sma: Vec<Option<f64>>,
}

pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            (window > 0 && i + 1 >= window)
                .then(|| values[i + 1 - window..=i].iter().sum::<f64>() / window as f64)
        })
        .collect()
}

/// Exponential moving average seeded with the first value (`alpha = 2 / (span + 1)`).
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// Rolling sample standard deviation.
pub fn rolling_std(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let mean = slice.iter().sum::<f64>() / window as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (window - 1) as f64;
            Some(var.sqrt())
        })
        .collect()
}

/// RSI from simple rolling means of gains and losses.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }
    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    for i in period..closes.len() {
        let window = &deltas[i - period..i];
        let gain = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
        out[i] = Some(if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        });
    }
    out
}

pub fn compute_indicators(bars: &[PriceBar]) -> Indicators {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

    let sma_20 = sma(&closes, 20);
    let std_20 = rolling_std(&closes, 20);
    let ema_12 = ema(&closes, 12);
    let ema_26 = ema(&closes, 26);
    let macd: Vec<f64> = ema_12.iter().zip(&ema_26).map(|(a, b)| a - b).collect();
    let macd_signal = ema(&macd, 9);
    let macd_histogram = macd.iter().zip(&macd_signal).map(|(m, s)| m - s).collect();

    let band = |sign: f64| -> Vec<Option<f64>> {
        sma_20
            .iter()
            .zip(&std_20)
            .map(|(m, s)| Some((*m)? + sign * 2.0 * (*s)?))
            .collect()
    };

    Indicators {
        sma_50: sma(&closes, 50),
        rsi: rsi(&closes, 14),
        bb_upper: band(1.0),
        bb_lower: band(-1.0),
        volume_sma: sma(&volumes, 20),
        sma_20,
        ema_12,
        ema_26,
        macd,
        macd_signal,
        macd_histogram,
    }
}

fn last<T: Copy>(series: &[Option<T>]) -> Option<T> {
    series.last().copied().flatten()
}

fn insight(kind: &str, signal: &str, description: impl Into<String>) -> TechnicalInsight {
    TechnicalInsight {
        kind: kind.to_string(),
        signal: signal.to_string(),
        description: description.into(),
    }
}

pub fn generate_insights(bars: &[PriceBar], ind: &Indicators) -> Vec<TechnicalInsight> {
    let mut insights = Vec::new();
    let Some(current) = bars.last().map(|b| b.close) else {
        return insights;
    };

    if let (Some(s20), Some(s50)) = (last(&ind.sma_20), last(&ind.sma_50)) {
        insights.push(if s20 > s50 {
            insight("Trend", "Bullish", "20-day SMA is above 50-day SMA, indicating upward momentum")
        } else {
            insight("Trend", "Bearish", "20-day SMA is below 50-day SMA, indicating downward momentum")
        });
    }

    if let Some(r) = last(&ind.rsi) {
        insights.push(if r > RSI_OVERBOUGHT {
            insight("Momentum", "Overbought", format!("RSI at {:.1} indicates potential selling pressure", r))
        } else if r < RSI_OVERSOLD {
            insight("Momentum", "Oversold", format!("RSI at {:.1} indicates potential buying opportunity", r))
        } else {
            insight("Momentum", "Neutral", format!("RSI at {:.1} is in normal range", r))
        });
    }

    if let (Some(m), Some(s)) = (ind.macd.last(), ind.macd_signal.last()) {
        insights.push(if m > s {
            insight("MACD", "Bullish", "MACD line above signal line suggests upward momentum")
        } else {
            insight("MACD", "Bearish", "MACD line below signal line suggests downward momentum")
        });
    }

    let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
    let avg_volume = volumes.iter().sum::<f64>() / volumes.len() as f64;
    let recent = &volumes[volumes.len().saturating_sub(5)..];
    let recent_volume = recent.iter().sum::<f64>() / recent.len() as f64;
    insights.push(if recent_volume > avg_volume * VOLUME_HIGH_RATIO {
        insight("Volume", "High", "Recent volume significantly above average")
    } else if recent_volume < avg_volume * VOLUME_LOW_RATIO {
        insight("Volume", "Low", "Recent volume below average")
    } else {
        insight("Volume", "Normal", "Volume in normal range")
    });

    if let (Some(upper), Some(lower)) = (last(&ind.bb_upper), last(&ind.bb_lower)) {
        insights.push(if current > upper {
            insight("Bollinger Bands", "Overbought", "Price above upper Bollinger Band")
        } else if current < lower {
            insight("Bollinger Bands", "Oversold", "Price below lower Bollinger Band")
        } else {
            insight("Bollinger Bands", "Normal", "Price within Bollinger Bands")
        });
    }

    insights
}

const CHART_WIDTH: f64 = 800.0;
const CHART_HEIGHT: f64 = 320.0;
const CHART_PAD: f64 = 40.0;

fn polyline(points: &[(usize, f64)], n: usize, lo: f64, hi: f64, style: &str) -> String {
    if points.len() < 2 {
        return String::new();
    }
    let span = (hi - lo).max(f64::EPSILON);
    let x_step = (CHART_WIDTH - 2.0 * CHART_PAD) / (n.max(2) - 1) as f64;
    let coords = points
        .iter()
        .map(|(i, v)| {
            let x = CHART_PAD + *i as f64 * x_step;
            let y = CHART_HEIGHT - CHART_PAD - (v - lo) / span * (CHART_HEIGHT - 2.0 * CHART_PAD);
            format!("{:.1},{:.1}", x, y)
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!(r#"<polyline fill="none" {} points="{}"/>"#, style, coords)
}

fn defined(series: &[Option<f64>]) -> Vec<(usize, f64)> {
    series
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect()
}

/// Inline SVG line chart of closes with SMA and Bollinger overlays.
pub fn render_chart_svg(ticker: &str, bars: &[PriceBar], ind: &Indicators) -> Option<String> {
    if bars.len() < 2 {
        return None;
    }
    let n = bars.len();
    let closes: Vec<(usize, f64)> = bars.iter().enumerate().map(|(i, b)| (i, b.close)).collect();
    let upper = defined(&ind.bb_upper);
    let lower = defined(&ind.bb_lower);

    let all = closes.iter().chain(&upper).chain(&lower).map(|(_, v)| *v);
    let (lo, hi) = all.fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="100%" role="img" aria-label="{t} price chart">"#,
        w = CHART_WIDTH,
        h = CHART_HEIGHT,
        t = ticker
    );
    let _ = write!(
        svg,
        r##"<rect x="0" y="0" width="{}" height="{}" fill="#ffffff"/>"##,
        CHART_WIDTH, CHART_HEIGHT
    );
    let _ = write!(
        svg,
        r##"<text x="{}" y="24" font-family="Helvetica,Arial,sans-serif" font-size="14" fill="#333">{} Price &amp; Moving Averages</text>"##,
        CHART_PAD, ticker
    );
    let _ = write!(
        svg,
        r##"<text x="4" y="{:.1}" font-size="10" fill="#666">{:.2}</text><text x="4" y="{:.1}" font-size="10" fill="#666">{:.2}</text>"##,
        CHART_PAD,
        hi,
        CHART_HEIGHT - CHART_PAD,
        lo
    );

    svg.push_str(&polyline(&upper, n, lo, hi, r##"stroke="#9e9e9e" stroke-dasharray="4 3" stroke-width="1""##));
    svg.push_str(&polyline(&lower, n, lo, hi, r##"stroke="#9e9e9e" stroke-dasharray="4 3" stroke-width="1""##));
    svg.push_str(&polyline(&defined(&ind.sma_50), n, lo, hi, r##"stroke="#1e88e5" stroke-width="1.5""##));
    svg.push_str(&polyline(&defined(&ind.sma_20), n, lo, hi, r##"stroke="#fb8c00" stroke-width="1.5""##));
    svg.push_str(&polyline(&closes, n, lo, hi, r##"stroke="#26a69a" stroke-width="2""##));
    svg.push_str("</svg>");
    Some(svg)
}

/// Price bars stored on the historical market-data source, if any.
pub fn bars_from_sources(sources: &[DataSource]) -> Vec<PriceBar> {
    sources
        .iter()
        .filter(|s| s.source_type == SourceType::MarketData)
        .find_map(|s| s.metadata.get("bars"))
        .and_then(|v| serde_json::from_value::<Vec<PriceBar>>(v.clone()).ok())
        .unwrap_or_default()
}

pub fn analyze(ticker: &str, bars: &[PriceBar], period: &str, include_chart: bool) -> Option<TechnicalReport> {
    if bars.is_empty() {
        tracing::warn!("No historical data found for {}", ticker);
        return None;
    }
    let indicators = compute_indicators(bars);
    let insights = generate_insights(bars, &indicators);
    let chart_svg = if include_chart {
        render_chart_svg(ticker, bars, &indicators)
    } else {
        None
    };
    tracing::debug!("Technical analysis for {}: {} insights over {} bars", ticker, insights.len(), bars.len());

    Some(TechnicalReport {
        insights,
        chart_svg,
        data_points: bars.len(),
        period: period.to_string(),
    })
}
