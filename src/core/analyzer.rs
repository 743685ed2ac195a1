//! Rule-based extraction of risks, opportunities, metrics and a summary.

use crate::config::app_config::ProcessingConfig;
use crate::domain::model::{
    DataSource, Impact, MetricItem, OpportunityItem, RiskItem, Severity, SourceType, Trend,
    MIN_MEMO_OPPORTUNITIES, MIN_MEMO_RISKS,
};
use crate::domain::ports::PendingChunk;
use crate::ingestors::base::group_thousands;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

const MIN_CHUNK_CHARS: usize = 100;
const MIN_SENTENCE_CHARS: usize = 50;
const MAX_PHRASE_CHARS: usize = 80;

const RISK_PATTERNS: &[&str] = &[
    r"risks?.*?(include|are|of)",
    r"challenges?.*?(include|facing|with)",
    r"threats?.*?(to|from|of)",
    r"concerns?.*?(about|regarding|over)",
    r"uncertainty.*?(in|about|regarding)",
    r"volatility.*?(in|of|due to)",
    r"decline.*?(in|of|due to)",
    r"competition.*?(from|in|increasing)",
];

const OPPORTUNITY_PATTERNS: &[&str] = &[
    r"opportunit(y|ies).*?(to|in|for|include)",
    r"growth.*?(in|opportunity|potential|expected)",
    r"expansion.*?(into|of|in|plans)",
    r"investments?.*?(in|to|for|opportunity)",
    r"new.*?(markets?|products?|services?)",
    r"innovations?.*?(in|to|for)",
    r"partnerships?.*?(with|to|for)",
    r"acquisitions?.*?(of|to|for)",
];

const NEGATIVE_WORDS: &[&str] = &[
    "adverse", "challenge", "challenges", "concern", "concerns", "decline", "declined",
    "declines", "decrease", "decreased", "deficit", "delay", "downturn", "fail", "failure",
    "fell", "headwind", "headwinds", "impair", "impairment", "lawsuit", "litigation", "loss",
    "losses", "lower", "miss", "negative", "penalty", "pressure", "recession", "risk",
    "risks", "shortage", "slowdown", "threat", "threats", "uncertain", "uncertainty",
    "volatile", "volatility", "weak", "weakness", "worse",
];

const POSITIVE_WORDS: &[&str] = &[
    "accelerate", "advantage", "beat", "benefit", "boost", "expand", "expansion", "gain",
    "gains", "grew", "grow", "growing", "growth", "improve", "improved", "increase",
    "increased", "innovation", "innovative", "launch", "leader", "leading", "momentum",
    "opportunity", "opportunities", "outperform", "partnership", "positive", "profit",
    "profitable", "record", "rise", "robust", "strong", "stronger", "success", "surge",
];

const FALLBACK_RISKS: &[&str] = &[
    "competition",
    "regulatory",
    "market volatility",
    "economic uncertainty",
    "supply chain",
    "cybersecurity",
];

const FALLBACK_OPPORTUNITIES: &[&str] = &[
    "market expansion",
    "digital transformation",
    "innovation",
    "strategic partnerships",
    "operational efficiency",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(&format!("(?i){}", p)).expect("static regex"))
        .collect()
}

fn risk_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(RISK_PATTERNS))
}

fn opportunity_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| compile(OPPORTUNITY_PATTERNS))
}

fn sentence_split_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+").expect("static regex"))
}

fn leading_stop_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(the|a|an|in|on|at|to|for|of|with|by)\s+").expect("static regex"))
}

/// Lexicon sentiment for one sentence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentiment {
    pub positive: usize,
    pub negative: usize,
}

impl Sentiment {
    pub fn of(sentence: &str) -> Self {
        let mut positive = 0;
        let mut negative = 0;
        for word in sentence
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_ascii_lowercase();
            if NEGATIVE_WORDS.contains(&word.as_str()) {
                negative += 1;
            }
            if POSITIVE_WORDS.contains(&word.as_str()) {
                positive += 1;
            }
        }
        Self { positive, negative }
    }

    /// (positive - negative) / total, 0 when no lexicon word matched.
    pub fn score(&self) -> f64 {
        let total = self.positive + self.negative;
        if total == 0 {
            0.0
        } else {
            (self.positive as f64 - self.negative as f64) / total as f64
        }
    }

    fn confidence(&self) -> f64 {
        let hits = (self.positive + self.negative) as f64;
        (0.55 + 0.2 * self.score().abs() + 0.05 * hits).min(0.95)
    }
}

/// Lower-cases, strips a leading stop word, capitalises and caps at 80 chars.
pub fn key_phrase(sentence: &str) -> String {
    let lowered = sentence.trim().to_lowercase();
    let stripped = leading_stop_word_re().replace(&lowered, "");
    let stripped = stripped.trim();

    let mut chars = stripped.chars();
    let mut phrase: String = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    };
    if phrase.chars().count() > MAX_PHRASE_CHARS {
        phrase = phrase.chars().take(MAX_PHRASE_CHARS - 3).collect::<String>() + "...";
    }
    phrase
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(f) => f.to_uppercase().chain(c).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Sentences of a chunk long enough to carry a finding.
fn candidate_sentences(text: &str) -> impl Iterator<Item = &str> {
    sentence_split_re()
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().count() >= MIN_SENTENCE_CHARS)
}

#[derive(Debug, Clone)]
pub struct Analysis {
    pub tldr: String,
    pub risks: Vec<RiskItem>,
    pub opportunities: Vec<OpportunityItem>,
    pub metrics: Vec<MetricItem>,
}

/// Source ids in the output are 1-based positions into the `sources` slice.
pub struct RuleBasedAnalyzer {
    config: ProcessingConfig,
}

impl RuleBasedAnalyzer {
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, ticker: &str, sources: &[DataSource], chunks: &[PendingChunk]) -> Analysis {
        let risks = self.extract_risks(chunks, !sources.is_empty());
        let opportunities = self.extract_opportunities(chunks, !sources.is_empty());
        let metrics = self.extract_metrics(sources);
        let tldr = self.summarize(ticker, sources, chunks, risks.len(), opportunities.len());
        tracing::info!(
            "Analysis for {}: {} risks, {} opportunities, {} metrics",
            ticker,
            risks.len(),
            opportunities.len(),
            metrics.len()
        );
        Analysis {
            tldr,
            risks,
            opportunities,
            metrics,
        }
    }

    fn text_chunks<'a>(chunks: &'a [PendingChunk]) -> impl Iterator<Item = &'a PendingChunk> {
        chunks
            .iter()
            .filter(|c| c.chunk.chunk_type != "market" && c.chunk.text.chars().count() >= MIN_CHUNK_CHARS)
    }

    pub fn extract_risks(&self, chunks: &[PendingChunk], has_sources: bool) -> Vec<RiskItem> {
        let max = self.config.max_risks.max(MIN_MEMO_RISKS);
        let mut seen = HashSet::new();
        let mut risks = Vec::new();

        'chunks: for chunk in Self::text_chunks(chunks) {
            for sentence in candidate_sentences(&chunk.chunk.text) {
                if !risk_patterns().iter().any(|re| re.is_match(sentence)) {
                    continue;
                }
                let sentiment = Sentiment::of(sentence);
                if sentiment.score() >= 0.0 {
                    continue;
                }
                let confidence = sentiment.confidence();
                if confidence < self.config.min_confidence {
                    continue;
                }
                let phrase = key_phrase(sentence);
                if phrase.is_empty() || !seen.insert(phrase.clone()) {
                    continue;
                }
                let severity = match sentiment.negative {
                    n if n >= 3 => Severity::High,
                    2 => Severity::Medium,
                    _ => Severity::Low,
                };
                risks.push(RiskItem {
                    risk: phrase,
                    rationale: sentence.to_string(),
                    source_ids: vec![chunk.source_index as i64 + 1],
                    confidence,
                    severity,
                });
                if risks.len() >= max {
                    break 'chunks;
                }
            }
        }

        let fallback_ids = if has_sources { vec![1] } else { Vec::new() };
        for keyword in FALLBACK_RISKS {
            if risks.len() >= MIN_MEMO_RISKS {
                break;
            }
            let risk = format!("{} challenges", title_case(keyword));
            if seen.insert(risk.clone()) {
                risks.push(RiskItem {
                    risk,
                    rationale: format!("Industry-wide {} concerns may impact performance", keyword),
                    source_ids: fallback_ids.clone(),
                    confidence: self.config.min_confidence,
                    severity: Severity::Medium,
                });
            }
        }
        risks
    }

    pub fn extract_opportunities(&self, chunks: &[PendingChunk], has_sources: bool) -> Vec<OpportunityItem> {
        let max = self.config.max_opportunities.max(MIN_MEMO_OPPORTUNITIES);
        let mut seen = HashSet::new();
        let mut opportunities = Vec::new();

        'chunks: for chunk in Self::text_chunks(chunks) {
            for sentence in candidate_sentences(&chunk.chunk.text) {
                if !opportunity_patterns().iter().any(|re| re.is_match(sentence)) {
                    continue;
                }
                let sentiment = Sentiment::of(sentence);
                if sentiment.score() <= 0.0 {
                    continue;
                }
                let confidence = sentiment.confidence();
                if confidence < self.config.min_confidence {
                    continue;
                }
                let phrase = key_phrase(sentence);
                if phrase.is_empty() || !seen.insert(phrase.clone()) {
                    continue;
                }
                let potential_impact = match sentiment.positive {
                    n if n >= 4 => Impact::Transformative,
                    3 => Impact::High,
                    2 => Impact::Medium,
                    _ => Impact::Low,
                };
                opportunities.push(OpportunityItem {
                    opportunity: phrase,
                    rationale: sentence.to_string(),
                    source_ids: vec![chunk.source_index as i64 + 1],
                    confidence,
                    potential_impact,
                });
                if opportunities.len() >= max {
                    break 'chunks;
                }
            }
        }

        let fallback_ids = if has_sources { vec![1] } else { Vec::new() };
        for keyword in FALLBACK_OPPORTUNITIES {
            if opportunities.len() >= MIN_MEMO_OPPORTUNITIES {
                break;
            }
            let opportunity = format!("{} potential", title_case(keyword));
            if seen.insert(opportunity.clone()) {
                opportunities.push(OpportunityItem {
                    opportunity,
                    rationale: format!("Potential for growth through {}", keyword),
                    source_ids: fallback_ids.clone(),
                    confidence: self.config.min_confidence,
                    potential_impact: Impact::Medium,
                });
            }
        }
        opportunities
    }

    pub fn extract_metrics(&self, sources: &[DataSource]) -> Vec<MetricItem> {
        let mut metrics = Vec::new();
        let position = |url_suffix: &str| {
            sources.iter().position(|s| {
                s.source_type == SourceType::MarketData
                    && s.url.as_deref().is_some_and(|u| u.ends_with(url_suffix))
            })
        };

        if let Some(i) = position("/history") {
            let history = &sources[i];
            let ids = vec![i as i64 + 1];
            let period = history.metadata_str("period").unwrap_or("1y").to_string();
            let change = history.metadata_f64("price_change_pct");
            let trend_of = |v: Option<f64>| match v {
                Some(v) if v > 0.5 => Trend::Up,
                Some(v) if v < -0.5 => Trend::Down,
                _ => Trend::Stable,
            };

            if let Some(price) = history.metadata_f64("latest_price") {
                metrics.push(MetricItem {
                    metric: "Latest Price".to_string(),
                    value: format!("${:.2}", price),
                    trend: trend_of(change),
                    period: "Current".to_string(),
                    source_ids: ids.clone(),
                    context: None,
                });
            }
            if let Some(pct) = change {
                metrics.push(MetricItem {
                    metric: "Price Change".to_string(),
                    value: format!("{:+.2}%", pct),
                    trend: trend_of(change),
                    period: period.clone(),
                    source_ids: ids.clone(),
                    context: history
                        .metadata_f64("price_change")
                        .map(|abs| format!("Absolute change ${:+.2}", abs)),
                });
            }
            if let Some(vol) = history.metadata_f64("volatility") {
                metrics.push(MetricItem {
                    metric: "Volatility".to_string(),
                    value: format!("{:.1}%", vol * 100.0),
                    trend: Trend::Stable,
                    period: period.clone(),
                    source_ids: ids.clone(),
                    context: Some("Annualised standard deviation of daily returns".to_string()),
                });
            }
            let latest = history.metadata_f64("latest_price");
            for (key, label) in [("ma_20", "20-Day MA"), ("ma_50", "50-Day MA")] {
                if let Some(ma) = history.metadata_f64(key) {
                    let trend = match latest {
                        Some(p) if p > ma => Trend::Up,
                        Some(p) if p < ma => Trend::Down,
                        _ => Trend::Stable,
                    };
                    metrics.push(MetricItem {
                        metric: label.to_string(),
                        value: format!("${:.2}", ma),
                        trend,
                        period: period.clone(),
                        source_ids: ids.clone(),
                        context: None,
                    });
                }
            }
        }

        if let Some(i) = position("/info") {
            let info = &sources[i];
            let ids = vec![i as i64 + 1];
            if let Some(pe) = info.metadata_f64("pe_ratio") {
                metrics.push(MetricItem {
                    metric: "P/E Ratio".to_string(),
                    value: format!("{:.2}", pe),
                    trend: Trend::Stable,
                    period: "Trailing".to_string(),
                    source_ids: ids.clone(),
                    context: None,
                });
            }
            if let Some(cap) = info.metadata_f64("market_cap") {
                metrics.push(MetricItem {
                    metric: "Market Cap".to_string(),
                    value: format!("${}", group_thousands(cap)),
                    trend: Trend::Stable,
                    period: "Current".to_string(),
                    source_ids: ids,
                    context: None,
                });
            }
        }

        let mut counts: BTreeMap<SourceType, usize> = BTreeMap::new();
        for source in sources {
            *counts.entry(source.source_type).or_default() += 1;
        }
        metrics.push(MetricItem {
            metric: "Data Sources".to_string(),
            value: sources.len().to_string(),
            trend: Trend::Stable,
            period: "Current".to_string(),
            source_ids: Vec::new(),
            context: Some(format!("Total sources analyzed: {}", sources.len())),
        });
        metrics.push(MetricItem {
            metric: "Source Types".to_string(),
            value: counts.len().to_string(),
            trend: Trend::Stable,
            period: "Current".to_string(),
            source_ids: Vec::new(),
            context: Some(format!(
                "Data diversity: {}",
                counts.keys().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
            )),
        });

        metrics.truncate(self.config.max_metrics.max(1));
        metrics
    }

    /// Short extractive summary: coverage line, market line, up to three
    /// salient sentences, findings line.
    pub fn summarize(
        &self,
        ticker: &str,
        sources: &[DataSource],
        chunks: &[PendingChunk],
        risk_count: usize,
        opportunity_count: usize,
    ) -> String {
        if sources.is_empty() {
            return "Analysis completed with limited data available.".to_string();
        }

        let mut counts: BTreeMap<SourceType, usize> = BTreeMap::new();
        for source in sources {
            *counts.entry(source.source_type).or_default() += 1;
        }
        let breakdown = counts
            .iter()
            .map(|(t, n)| format!("{} {}", n, t.label().to_lowercase()))
            .collect::<Vec<_>>()
            .join(", ");

        let mut lines = vec![format!(
            "{} analysis based on {} sources ({}).",
            ticker,
            sources.len(),
            breakdown
        )];

        let history = sources.iter().find(|s| {
            s.source_type == SourceType::MarketData
                && s.url.as_deref().is_some_and(|u| u.ends_with("/history"))
        });
        if let Some(h) = history {
            if let (Some(price), Some(pct)) = (h.metadata_f64("latest_price"), h.metadata_f64("price_change_pct")) {
                let mut line = format!(
                    "Shares last traded at ${:.2}, {:+.2}% over {}",
                    price,
                    pct,
                    h.metadata_str("period").unwrap_or("the period")
                );
                if let Some(vol) = h.metadata_f64("volatility") {
                    line.push_str(&format!(" with {:.1}% annualised volatility", vol * 100.0));
                }
                line.push('.');
                lines.push(line);
            }
        }

        let mut salient: Vec<(f64, &str)> = Self::text_chunks(chunks)
            .flat_map(|c| candidate_sentences(&c.chunk.text))
            .map(|s| (Sentiment::of(s), s))
            .filter(|(sent, _)| sent.positive + sent.negative > 0)
            .map(|(sent, s)| (sent.score().abs() + 0.1 * (sent.positive + sent.negative) as f64, s))
            .collect();
        salient.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut used = HashSet::new();
        for (_, sentence) in salient {
            if lines.len() >= 5 {
                break;
            }
            if used.insert(sentence) {
                lines.push(format!("{}.", sentence));
            }
        }

        lines.push(format!(
            "Identified {} key risks and {} opportunities.",
            risk_count, opportunity_count
        ));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TextChunk;
    use chrono::Utc;
    use serde_json::json;

    fn chunk(source_index: usize, chunk_type: &str, text: &str) -> PendingChunk {
        PendingChunk {
            source_index,
            chunk: TextChunk {
                id: None,
                source_id: 0,
                text: text.to_string(),
                chunk_type: chunk_type.to_string(),
                metadata: Default::default(),
                created_at: Utc::now(),
            },
        }
    }

    fn analyzer() -> RuleBasedAnalyzer {
        RuleBasedAnalyzer::new(ProcessingConfig::default())
    }

    const FILING: &str = "Key risks include intense competition and weak demand that could lead to losses in our hardware segment. \
        Management believes growth in services is expected to remain strong and profitable as new products launch. \
        The company also reported the usual quarterly figures for the period ended in September.";

    #[test]
    fn test_sentiment_score() {
        let s = Sentiment::of("Strong growth despite risks");
        assert_eq!(s.positive, 2);
        assert_eq!(s.negative, 1);
        assert!(s.score() > 0.0);
        assert_eq!(Sentiment::of("The table lists figures").score(), 0.0);
    }

    #[test]
    fn test_key_phrase() {
        assert_eq!(key_phrase("The supply chain remains tight"), "Supply chain remains tight");
        let long = format!("a {}", "word ".repeat(40));
        let phrase = key_phrase(&long);
        assert_eq!(phrase.chars().count(), 80);
        assert!(phrase.ends_with("..."));
    }

    #[test]
    fn test_extracts_risks_and_opportunities_from_text() {
        let chunks = vec![chunk(1, "filing", FILING)];
        let risks = analyzer().extract_risks(&chunks, true);
        let opps = analyzer().extract_opportunities(&chunks, true);

        assert_eq!(risks.len(), 3);
        assert!(risks[0].risk.starts_with("Key risks include intense competition"));
        assert_eq!(risks[0].source_ids, vec![2]);
        assert_eq!(risks[0].severity, Severity::High);
        assert_eq!(risks[1].risk, "Competition challenges");

        assert!(opps[0].opportunity.starts_with("Management believes growth"));
        assert_eq!(opps.len(), 3);
        assert!(opps.iter().all(|o| (0.0..=1.0).contains(&o.confidence)));
    }

    #[test]
    fn test_fallbacks_when_nothing_matches() {
        let risks = analyzer().extract_risks(&[], false);
        assert_eq!(risks.len(), 3);
        assert!(risks.iter().all(|r| r.source_ids.is_empty()));
        assert_eq!(risks[2].risk, "Market Volatility challenges");

        let opps = analyzer().extract_opportunities(&[chunk(0, "market", FILING)], true);
        assert_eq!(opps[0].opportunity, "Market Expansion potential");
        assert_eq!(opps[0].source_ids, vec![1]);
    }

    #[test]
    fn test_risks_capped_by_config() {
        let sentence = "Risks of decline and losses threaten weak margins amid volatility number";
        let text: String = (0..10).map(|i| format!("{} {}. ", sentence, i)).collect();
        let chunks = vec![chunk(0, "news", &text)];
        let config = ProcessingConfig {
            max_risks: 4,
            ..ProcessingConfig::default()
        };
        let risks = RuleBasedAnalyzer::new(config).extract_risks(&chunks, true);
        assert_eq!(risks.len(), 4);
    }

    #[test]
    fn test_metrics_from_market_sources() {
        let mut history = DataSource::new(1, SourceType::MarketData);
        history.url = Some("market://AAPL/history".into());
        history.metadata.insert("latest_price".into(), json!(190.5));
        history.metadata.insert("price_change_pct".into(), json!(12.25));
        history.metadata.insert("volatility".into(), json!(0.24));
        history.metadata.insert("ma_20".into(), json!(185.0));
        history.metadata.insert("ma_50".into(), json!(null));
        history.metadata.insert("period".into(), json!("1y"));

        let mut info = DataSource::new(1, SourceType::MarketData);
        info.url = Some("market://AAPL/info".into());
        info.metadata.insert("pe_ratio".into(), json!(29.1));
        info.metadata.insert("market_cap".into(), json!(3.0e12));

        let news = DataSource::new(1, SourceType::NewsArticle);
        let metrics = analyzer().extract_metrics(&[info, history, news]);
        let names: Vec<&str> = metrics.iter().map(|m| m.metric.as_str()).collect();
        assert_eq!(
            names,
            vec!["Latest Price", "Price Change", "Volatility", "20-Day MA", "P/E Ratio", "Market Cap", "Data Sources", "Source Types"]
        );
        assert_eq!(metrics[0].value, "$190.50");
        assert_eq!(metrics[0].trend, Trend::Up);
        assert_eq!(metrics[0].source_ids, vec![2]);
        assert_eq!(metrics[1].value, "+12.25%");
        assert_eq!(metrics[2].value, "24.0%");
        assert_eq!(metrics[5].value, "$3,000,000,000,000");
        assert_eq!(metrics[7].value, "2");
    }

    #[test]
    fn test_summary() {
        let empty = analyzer().summarize("AAPL", &[], &[], 3, 3);
        assert_eq!(empty, "Analysis completed with limited data available.");

        let mut filing = DataSource::new(1, SourceType::SecFiling);
        filing.raw_content = Some(FILING.to_string());
        let chunks = vec![chunk(0, "filing", FILING)];
        let summary = analyzer().summarize("AAPL", &[filing], &chunks, 3, 3);
        let lines: Vec<&str> = summary.lines().collect();
        assert_eq!(lines[0], "AAPL analysis based on 1 sources (1 sec filing).");
        assert_eq!(lines.last().copied(), Some("Identified 3 key risks and 3 opportunities."));
        assert!(lines.len() >= 3 && lines.len() <= 6);
    }
}
