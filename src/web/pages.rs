use crate::adapters::sqlite::DatabaseStats;
use crate::adapters::watchlist::{Watchlist, WatchlistAlert, WatchlistItem};
use crate::domain::model::{AnalysisRun, DataSource, Memo, RunStatus};
use crate::report::html::{escape, group_sources, render_sections, STYLE};
use crate::report::{technical_from_memo, MemoDocument};
use crate::utils::error::AnalystError;
use axum::http::StatusCode;
use std::fmt::Write as _;

const PAGE_STYLE: &str = r#"
nav { background: #1f2933; padding: 10px 24px; }
nav a { color: #fff; margin-right: 18px; text-decoration: none; font-weight: 600; }
.grid { display: grid; grid-template-columns: 2fr 1fr; gap: 24px; }
form.inline { display: inline; }
label { display: block; margin: 6px 0; }
input[type=text], input[type=number], select { padding: 6px 8px; border: 1px solid #cbd2d9; border-radius: 4px; }
button { padding: 6px 14px; border: 0; border-radius: 4px; background: #3e63dd; color: #fff; cursor: pointer; }
button.secondary { background: #9aa5b1; }
.notice { padding: 10px 16px; border-radius: 6px; margin: 12px 0; }
.notice.ok { background: #d9f5e5; }
.notice.warn { background: #fff3c4; }
.notice.err { background: #fde2e1; }
ul.runs { list-style: none; padding: 0; }
ul.runs li { margin: 6px 0; }
details { background: #fff; border-radius: 6px; padding: 8px 14px; margin: 8px 0; }
"#;

pub fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Completed => "🟢",
        RunStatus::Running => "🟡",
        RunStatus::Failed => "🔴",
        RunStatus::Cancelled => "⚫",
        RunStatus::Pending => "⚪",
    }
}

/// Wraps a body in the shared page shell. `refresh_secs` adds a meta refresh.
pub fn layout(title: &str, body: &str, refresh_secs: Option<u32>) -> String {
    let refresh = refresh_secs
        .map(|s| format!("<meta http-equiv=\"refresh\" content=\"{}\">\n", s))
        .unwrap_or_default();
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n{}<title>{}</title>\n<style>{}{}</style>\n</head>\n<body>\n\
         <nav><a href=\"/\">Dashboard</a><a href=\"/watchlists\">Watchlists</a></nav>\n<main>\n{}</main>\n</body>\n</html>\n",
        refresh,
        escape(title),
        STYLE,
        PAGE_STYLE,
        body
    )
}

fn run_link(run: &AnalysisRun) -> String {
    format!(
        "<a href=\"/runs/{}\">{} {} ({})</a>",
        run.id.unwrap_or_default(),
        status_icon(run.status),
        escape(&run.query),
        run.status
    )
}

pub struct Dashboard<'a> {
    pub page_title: &'a str,
    pub recent_runs: &'a [AnalysisRun],
    pub stats: &'a DatabaseStats,
}

pub fn dashboard(d: &Dashboard<'_>) -> String {
    let mut body = String::new();
    let _ = write!(
        body,
        "<h1>🤖 {}</h1>\n<p class=\"meta\">Generate company analysis reports from public data sources</p>\n<div class=\"grid\">\n<section>\n",
        escape(d.page_title)
    );

    body.push_str(
        "<h2>🔍 Start New Analysis</h2>\n<form method=\"post\" action=\"/analyze\">\n\
         <label>Ticker symbol <input type=\"text\" name=\"query\" placeholder=\"e.g., AAPL, MSFT, TSLA\" required></label>\n\
         <label><input type=\"checkbox\" name=\"include_sec\" value=\"on\" checked> SEC Filings (10-K/10-Q)</label>\n\
         <label><input type=\"checkbox\" name=\"include_news\" value=\"on\" checked> News Articles</label>\n\
         <label><input type=\"checkbox\" name=\"include_market\" value=\"on\" checked> Market Data</label>\n\
         <label>Max sources <input type=\"number\" name=\"max_sources\" min=\"5\" max=\"50\" value=\"20\"></label>\n\
         <label>Priority <select name=\"priority\"><option value=\"balanced\">balanced</option><option value=\"speed\">speed</option><option value=\"quality\">quality</option></select></label>\n\
         <button type=\"submit\">🚀 Start Analysis</button>\n</form>\n",
    );

    body.push_str("<h2>Recent Analyses</h2>\n");
    if d.recent_runs.is_empty() {
        body.push_str("<p class=\"meta\">No analyses yet</p>\n");
    } else {
        body.push_str("<ul class=\"runs\">\n");
        for run in d.recent_runs {
            let _ = write!(
                body,
                "<li>{} <span class=\"meta\">Started {} &middot; ID {}</span></li>\n",
                run_link(run),
                run.started_at.format("%Y-%m-%d %H:%M"),
                run.id.unwrap_or_default()
            );
        }
        body.push_str("</ul>\n");
    }
    body.push_str("</section>\n<aside>\n");

    let _ = write!(
        body,
        "<h2>Database Stats</h2>\n<p>📁 Total Runs: {}<br>📰 Total Sources: {}<br>📊 Total Memos: {}<br>💾 Size: {:.1} MB</p>\n",
        d.stats.runs, d.stats.sources, d.stats.memos, d.stats.database_size_mb
    );

    body.push_str("<h2>📋 Quick Access</h2>\n");
    let completed: Vec<&AnalysisRun> = d
        .recent_runs
        .iter()
        .filter(|r| r.status == RunStatus::Completed)
        .take(5)
        .collect();
    if completed.is_empty() {
        body.push_str("<p class=\"meta\">No completed analyses yet</p>\n");
    } else {
        body.push_str("<ul class=\"runs\">\n");
        for run in completed {
            let _ = write!(
                body,
                "<li><a href=\"/runs/{}\">📄 {} - {}</a></li>\n",
                run.id.unwrap_or_default(),
                escape(&run.query),
                run.started_at.format("%m/%d")
            );
        }
        body.push_str("</ul>\n");
    }

    body.push_str(
        "<h2>❓ How It Works</h2>\n<ol><li>Enter a ticker symbol</li><li>Start the analysis</li>\
         <li>Wait for processing</li><li>Review results and download reports</li></ol>\n\
         <h2>📚 Data Sources</h2>\n<ul><li>SEC Filings: 10-K, 10-Q reports</li>\
         <li>News Articles: recent business news</li><li>Market Data: stock prices and ratios</li></ul>\n\
         </aside>\n</div>\n",
    );

    layout(d.page_title, &body, None)
}

fn sources_section(sources: &[DataSource]) -> String {
    let mut html = String::from("<h2>📚 Data Sources</h2>\n");
    if sources.is_empty() {
        html.push_str("<p class=\"meta\">No sources collected</p>\n");
        return html;
    }
    for (source_type, group) in group_sources(sources) {
        let _ = write!(
            html,
            "<details>\n<summary>{} ({})</summary>\n<ul>\n",
            escape(&source_type.label()),
            group.len()
        );
        for source in group {
            let _ = write!(html, "<li><strong>{}</strong>", escape(source.title.as_deref().unwrap_or("Untitled")));
            if let Some(url) = &source.url {
                let _ = write!(html, "<br>URL: {}", escape(url));
            }
            if let Some(date) = source.published_at {
                let _ = write!(html, "<br>Date: {}", date.format("%Y-%m-%d"));
            }
            html.push_str("</li>\n");
        }
        html.push_str("</ul>\n</details>\n");
    }
    html
}

pub fn run_page(run: &AnalysisRun, memo: Option<&Memo>, sources: &[DataSource]) -> String {
    let run_id = run.id.unwrap_or_default();
    let mut body = String::new();
    let _ = write!(body, "<h1>📋 {}</h1>\n", escape(&run.query));
    let _ = write!(
        body,
        "<p class=\"meta\">Run #{} &middot; {} {} &middot; Started {}",
        run_id,
        status_icon(run.status),
        run.status,
        run.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(secs) = run.duration_seconds() {
        let _ = write!(body, " &middot; Duration {:.1} seconds", secs);
    }
    body.push_str("</p>\n");

    let active = !run.status.is_terminal();
    match run.status {
        RunStatus::Pending => {
            let _ = write!(body, "<div class=\"notice warn\">⏳ Analysis pending for {}</div>\n", escape(&run.query));
        }
        RunStatus::Running => {
            body.push_str("<div class=\"notice warn\">🔄 Analysis in progress... This page refreshes every 5 seconds.</div>\n");
        }
        RunStatus::Completed => body.push_str("<div class=\"notice ok\">✅ Analysis completed!</div>\n"),
        RunStatus::Failed => {
            let _ = write!(
                body,
                "<div class=\"notice err\">❌ Analysis failed: {}</div>\n",
                escape(run.error_message.as_deref().unwrap_or("unknown error"))
            );
        }
        RunStatus::Cancelled => body.push_str("<div class=\"notice warn\">Analysis was cancelled</div>\n"),
    }
    if active {
        let _ = write!(
            body,
            "<form class=\"inline\" method=\"post\" action=\"/runs/{}/cancel\"><button class=\"secondary\" type=\"submit\">Cancel</button></form>\n",
            run_id
        );
    }

    if let Some(memo) = memo {
        let technical = technical_from_memo(memo);
        let ticker = run.query.to_uppercase();
        let doc = MemoDocument {
            technical: technical.as_ref(),
            include_sources: false,
            ..MemoDocument::new(&ticker, memo, sources)
        };
        body.push_str(&render_sections(&doc));
        body.push_str(&sources_section(sources));

        body.push_str("<h2>📤 Export Options</h2>\n<p>");
        for (format, label) in [("pdf", "📄 PDF"), ("pptx", "📊 PPTX"), ("html", "🌐 HTML"), ("csv", "🧾 Sources CSV")] {
            let _ = write!(body, "<a href=\"/runs/{}/export/{}\">{}</a> &nbsp; ", run_id, format, label);
        }
        body.push_str("</p>\n");
    } else if run.status == RunStatus::Completed {
        body.push_str("<p class=\"meta\">No memo found for this analysis</p>\n");
    }

    let title = format!("{} analysis", run.query);
    layout(&title, &body, active.then_some(5))
}

pub struct WatchlistView {
    pub watchlist: Watchlist,
    pub items: Vec<WatchlistItem>,
}

fn price(value: Option<f64>) -> String {
    value.map(|v| format!("${:.2}", v)).unwrap_or_else(|| "-".to_string())
}

pub fn watchlists_page(lists: &[WatchlistView], alerts: &[WatchlistAlert], stale: &[WatchlistItem]) -> String {
    let mut body = String::from("<h1>👀 Watchlists</h1>\n");

    body.push_str(
        "<form method=\"post\" action=\"/watchlists\">\n<input type=\"text\" name=\"name\" placeholder=\"Watchlist name\" required>\n\
         <input type=\"text\" name=\"description\" placeholder=\"Description\">\n<button type=\"submit\">Create</button>\n</form>\n",
    );

    if !alerts.is_empty() {
        body.push_str("<h2>🔔 Pending Alerts</h2>\n<table>\n<tr><th>Ticker</th><th>Watchlist</th><th>Alert</th><th>Triggered</th><th></th></tr>\n");
        for alert in alerts {
            let _ = write!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><form class=\"inline\" method=\"post\" action=\"/alerts/{}/ack\"><button class=\"secondary\" type=\"submit\">Acknowledge</button></form></td></tr>\n",
                escape(&alert.ticker),
                escape(&alert.watchlist_name),
                escape(&alert.message),
                alert.triggered_at.format("%Y-%m-%d %H:%M"),
                alert.id
            );
        }
        body.push_str("</table>\n");
    }

    if lists.is_empty() {
        body.push_str("<p class=\"meta\">No watchlists yet</p>\n");
    }
    for view in lists {
        let list = &view.watchlist;
        let _ = write!(body, "<h2>{} <span class=\"meta\">({} tickers)</span></h2>\n", escape(&list.name), list.item_count);
        if let Some(description) = &list.description {
            let _ = write!(body, "<p class=\"meta\">{}</p>\n", escape(description));
        }
        if !view.items.is_empty() {
            body.push_str("<table>\n<tr><th>Ticker</th><th>Last analyzed</th><th>Upper target</th><th>Lower target</th><th>Notes</th><th>Alerts</th><th></th></tr>\n");
            for item in &view.items {
                let analyzed = item
                    .last_analyzed_at
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                let _ = write!(
                    body,
                    "<tr><td>{ticker}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>\
                     <form class=\"inline\" method=\"post\" action=\"/analyze\"><input type=\"hidden\" name=\"query\" value=\"{ticker}\"><input type=\"hidden\" name=\"include_sec\" value=\"on\"><input type=\"hidden\" name=\"include_news\" value=\"on\"><input type=\"hidden\" name=\"include_market\" value=\"on\"><button type=\"submit\">Analyze</button></form> \
                     <form class=\"inline\" method=\"post\" action=\"/watchlists/{}/items/{ticker}/delete\"><button class=\"secondary\" type=\"submit\">Remove</button></form></td></tr>\n",
                    analyzed,
                    price(item.price_target_high),
                    price(item.price_target_low),
                    escape(item.notes.as_deref().unwrap_or("")),
                    item.pending_alerts,
                    list.id,
                    ticker = escape(&item.ticker),
                );
            }
            body.push_str("</table>\n");
        }
        let _ = write!(
            body,
            "<form method=\"post\" action=\"/watchlists/{}/items\">\n<input type=\"text\" name=\"ticker\" placeholder=\"Ticker\" required>\n\
             <input type=\"number\" step=\"0.01\" name=\"price_target_high\" placeholder=\"Upper target\">\n\
             <input type=\"number\" step=\"0.01\" name=\"price_target_low\" placeholder=\"Lower target\">\n\
             <input type=\"text\" name=\"notes\" placeholder=\"Notes\">\n<button type=\"submit\">Add</button>\n</form>\n",
            list.id
        );
    }

    if !stale.is_empty() {
        body.push_str("<h2>⏰ Needs Refresh</h2>\n<ul>\n");
        for item in stale {
            let _ = write!(
                body,
                "<li>{} <span class=\"meta\">{}</span></li>\n",
                escape(&item.ticker),
                escape(item.watchlist_name.as_deref().unwrap_or(""))
            );
        }
        body.push_str("</ul>\n");
    }

    layout("Watchlists", &body, None)
}

pub fn error_page(status: StatusCode, error: &AnalystError) -> String {
    let body = format!(
        "<h1>{}</h1>\n<div class=\"notice err\">❌ {}</div>\n<p class=\"meta\">💡 {}</p>\n<p><a href=\"/\">Back to dashboard</a></p>\n",
        status,
        escape(&error.user_friendly_message()),
        escape(error.recovery_suggestion())
    );
    layout("Error", &body, None)
}
