use super::MemoDocument;
use crate::domain::model::SourceType;
use std::collections::BTreeMap;
use std::fmt::Write as _;

pub(crate) const STYLE: &str = r#"
body { font-family: -apple-system, "Segoe UI", Helvetica, Arial, sans-serif; margin: 0; background: #f5f7fa; color: #1f2933; }
main { max-width: 960px; margin: 0 auto; padding: 32px 24px 64px; }
h1 { margin-bottom: 4px; }
h2 { border-bottom: 2px solid #e4e7eb; padding-bottom: 6px; margin-top: 36px; }
.meta { color: #616e7c; font-size: 14px; }
.summary { background: #fff; border-left: 4px solid #3e63dd; padding: 12px 18px; line-height: 1.6; }
.card { background: #fff; border-radius: 6px; padding: 12px 18px; margin: 10px 0; box-shadow: 0 1px 2px rgba(0,0,0,0.06); }
.card h3 { margin: 0 0 6px; font-size: 16px; }
.badge { display: inline-block; padding: 2px 8px; border-radius: 10px; font-size: 12px; margin-right: 6px; background: #e4e7eb; }
.badge.high, .badge.critical, .badge.down, .badge.bearish, .badge.overbought { background: #fde2e1; color: #a61b1b; }
.badge.medium { background: #fff3c4; color: #8d6708; }
.badge.low, .badge.stable, .badge.neutral, .badge.normal { background: #e4e7eb; }
.badge.transformative, .badge.up, .badge.bullish, .badge.oversold { background: #d9f5e5; color: #1b6b3a; }
table { width: 100%; border-collapse: collapse; background: #fff; }
th, td { text-align: left; padding: 8px 10px; border-bottom: 1px solid #e4e7eb; font-size: 14px; vertical-align: top; }
.cite { color: #3e63dd; font-size: 12px; }
.chart { background: #fff; padding: 8px; border-radius: 6px; }
"#;

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn badge(label: &str) -> String {
    format!(
        r#"<span class="badge {}">{}</span>"#,
        escape(&label.to_ascii_lowercase()),
        escape(label)
    )
}

fn cite(doc: &MemoDocument<'_>, ids: &[i64]) -> String {
    let c = doc.citations(ids);
    if c.is_empty() {
        c
    } else {
        format!(r#" <span class="cite">{}</span>"#, escape(&c))
    }
}

/// Standalone HTML page for a memo.
pub fn render_memo(doc: &MemoDocument<'_>) -> String {
    let memo = doc.memo;
    let mut html = String::with_capacity(8 * 1024);

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n<main>\n",
        escape(&doc.title()),
        STYLE
    );
    let _ = write!(
        html,
        "<h1>{}</h1>\n<p class=\"meta\">Generated {} &middot; Run #{} &middot; {} sources</p>\n",
        escape(&doc.title()),
        memo.created_at.format("%Y-%m-%d %H:%M UTC"),
        memo.run_id,
        doc.sources.len()
    );
    html.push_str(&render_sections(doc));
    html.push_str("</main>\n</body>\n</html>\n");
    html
}

/// Memo body without the page shell, for embedding in other pages.
pub fn render_sections(doc: &MemoDocument<'_>) -> String {
    let memo = doc.memo;
    let mut html = String::with_capacity(8 * 1024);

    html.push_str("<h2>Executive Summary</h2>\n<div class=\"summary\">");
    let summary = memo
        .tldr
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(escape)
        .collect::<Vec<_>>()
        .join("<br>\n");
    html.push_str(&summary);
    html.push_str("</div>\n");

    html.push_str("<h2>Key Risks</h2>\n");
    for (i, risk) in memo.risks.iter().enumerate() {
        let _ = write!(
            html,
            "<div class=\"card\"><h3>Risk {}: {}</h3><p>{}{}</p><p>{}<span class=\"meta\">Confidence {:.0}%</span></p></div>\n",
            i + 1,
            escape(&risk.risk),
            escape(&risk.rationale),
            cite(doc, &risk.source_ids),
            badge(risk.severity.as_str()),
            risk.confidence * 100.0
        );
    }

    html.push_str("<h2>Key Opportunities</h2>\n");
    for (i, opp) in memo.opportunities.iter().enumerate() {
        let _ = write!(
            html,
            "<div class=\"card\"><h3>Opportunity {}: {}</h3><p>{}{}</p><p>{}<span class=\"meta\">Confidence {:.0}%</span></p></div>\n",
            i + 1,
            escape(&opp.opportunity),
            escape(&opp.rationale),
            cite(doc, &opp.source_ids),
            badge(opp.potential_impact.as_str()),
            opp.confidence * 100.0
        );
    }

    if !memo.metrics.is_empty() {
        html.push_str("<h2>Key Metrics</h2>\n<table>\n<tr><th>Metric</th><th>Value</th><th>Trend</th><th>Period</th><th>Context</th></tr>\n");
        for m in &memo.metrics {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}{}</td></tr>\n",
                escape(&m.metric),
                escape(&m.value),
                badge(m.trend.as_str()),
                escape(&m.period),
                escape(m.context.as_deref().unwrap_or("")),
                cite(doc, &m.source_ids)
            );
        }
        html.push_str("</table>\n");
    }

    if let Some(tech) = doc.technical {
        if !tech.insights.is_empty() || tech.chart_svg.is_some() {
            let _ = write!(
                html,
                "<h2>Technical Analysis</h2>\n<p class=\"meta\">{} data points over {}</p>\n",
                tech.data_points,
                escape(&tech.period)
            );
            if doc.include_charts {
                if let Some(svg) = &tech.chart_svg {
                    // generated locally, not user text
                    let _ = write!(html, "<div class=\"chart\">{}</div>\n", svg);
                }
            }
            if !tech.insights.is_empty() {
                html.push_str("<table>\n<tr><th>Indicator</th><th>Signal</th><th>Description</th></tr>\n");
                for insight in &tech.insights {
                    let _ = write!(
                        html,
                        "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                        escape(&insight.kind),
                        badge(&insight.signal),
                        escape(&insight.description)
                    );
                }
                html.push_str("</table>\n");
            }
        }
    }

    if doc.include_sources && !doc.sources.is_empty() {
        html.push_str("<h2>Data Sources</h2>\n<table>\n<tr><th>#</th><th>Type</th><th>Title</th><th>Published</th></tr>\n");
        for (i, source) in doc.sources.iter().enumerate() {
            let title = escape(source.title.as_deref().unwrap_or("Untitled"));
            let linked = match source.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                    format!(r#"<a href="{}">{}</a>"#, escape(url), title)
                }
                _ => title,
            };
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                i + 1,
                escape(&source.source_type.label()),
                linked,
                source
                    .published_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default()
            );
        }
        html.push_str("</table>\n");
    }

    html
}

/// Sources grouped by type label, in type order.
pub fn group_sources<'a>(
    sources: &'a [crate::domain::model::DataSource],
) -> BTreeMap<SourceType, Vec<&'a crate::domain::model::DataSource>> {
    let mut groups: BTreeMap<SourceType, Vec<_>> = BTreeMap::new();
    for source in sources {
        groups.entry(source.source_type).or_default().push(source);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{TechnicalInsight, TechnicalReport};
    use crate::report::fixtures;

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">Tom & Jerry's</a>"#), "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&#39;s&lt;/a&gt;");
    }

    #[test]
    fn test_render_memo_sections_and_escaping() {
        let memo = fixtures::memo(3);
        let sources = fixtures::sources(3);
        let html = render_memo(&MemoDocument::new("AAPL", &memo, &sources));

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<h1>AAPL Analysis Report</h1>"));
        assert!(html.contains("Supply chain &lt;constraints&gt;"));
        assert!(!html.contains("<constraints>"));
        assert!(html.contains("Competition &amp; pricing"));
        assert!(html.contains(r#"<span class="cite">[1, 2]</span>"#));
        assert!(html.contains("Opportunity 3: Wearables"));
        assert!(html.contains("AAPL analysis based on 2 sources.<br>"));
        assert!(html.contains(r#"<a href="https://news.example.com/apple">Apple, &quot;iPhone&quot; sales rise</a>"#));
        assert!(html.contains("<td>2024-09-09</td>"));
        assert!(!html.contains("Technical Analysis"));
    }

    #[test]
    fn test_render_toggles_sources_and_chart() {
        let memo = fixtures::memo(3);
        let sources = fixtures::sources(3);
        let tech = TechnicalReport {
            insights: vec![TechnicalInsight {
                kind: "Trend".to_string(),
                signal: "Bullish".to_string(),
                description: "20-day SMA is above 50-day SMA".to_string(),
            }],
            chart_svg: Some("<svg></svg>".to_string()),
            data_points: 60,
            period: "1y".to_string(),
        };

        let with_all = MemoDocument {
            technical: Some(&tech),
            ..MemoDocument::new("AAPL", &memo, &sources)
        };
        let html = render_memo(&with_all);
        assert!(html.contains("<div class=\"chart\"><svg></svg></div>"));
        assert!(html.contains("Bullish"));

        let bare = MemoDocument {
            include_sources: false,
            include_charts: false,
            ..with_all
        };
        let html = render_memo(&bare);
        assert!(!html.contains("<svg"));
        assert!(html.contains("Technical Analysis"));
        assert!(!html.contains("Data Sources"));
    }

    #[test]
    fn test_group_sources() {
        let sources = fixtures::sources(1);
        let groups = group_sources(&sources);
        assert_eq!(groups[&SourceType::MarketData].len(), 1);
        assert_eq!(groups.keys().next(), Some(&SourceType::NewsArticle));
    }
}
