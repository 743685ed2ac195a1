use clap::Parser;
use research_analyst::adapters::watchlist::NewWatchlistItem;
use research_analyst::config::cli::{AnalyzeArgs, Command, WatchlistCommand};
use research_analyst::domain::model::{AnalysisRequest, ExportFormat, ExportRequest, Memo};
use research_analyst::utils::error::ErrorSeverity;
use research_analyst::utils::{logger, validation::Validate};
use research_analyst::{web, AnalysisEngine, AppConfig, AppState, Cli, LocalStorage, ReportExporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let mut config = match AppConfig::load_or_default(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    // 初始化日誌
    logger::init(cli.verbose, cli.json_logs || config.json_logs());
    tracing::info!("Starting research-analyst");
    if config_found {
        tracing::info!("Loaded configuration from {}", cli.config.display());
    } else {
        tracing::info!("Config file {} not found, using defaults", cli.config.display());
    }
    if cli.verbose {
        tracing::debug!("CLI: {:?}", cli);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
    }

    if let Err(e) = run(&cli, config).await {
        tracing::error!(
            "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

        eprintln!("❌ {}", e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());

        // 根據錯誤嚴重程度決定退出碼
        let exit_code = match e.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}

async fn run(cli: &Cli, config: AppConfig) -> research_analyst::Result<()> {
    let engine = AnalysisEngine::from_config(config)?.with_monitoring(cli.monitor);

    match cli.command() {
        Command::Serve(_) => web::serve(AppState::new(engine)).await?,
        Command::Analyze(args) => analyze(&engine, args).await?,
        Command::Runs { limit } => {
            let runs = engine.database().get_recent_runs(limit)?;
            if runs.is_empty() {
                println!("No analyses yet");
            }
            for run in runs {
                println!(
                    "{:>5}  {:<10} {:<9} {}{}",
                    run.id.unwrap_or_default(),
                    run.query,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M"),
                    run.duration_seconds()
                        .map(|s| format!("  ({:.1}s)", s))
                        .unwrap_or_default()
                );
            }
        }
        Command::Show { run_id } => {
            let db = engine.database();
            let run = db.require_run(run_id)?;
            println!("Run #{}: {} ({})", run_id, run.query, run.status);
            println!("Started: {}", run.started_at.format("%Y-%m-%d %H:%M:%S"));
            if let Some(error) = &run.error_message {
                println!("Error: {}", error);
            }
            let sources = db.get_sources(run_id)?;
            println!("Sources: {}", sources.len());
            match db.get_memo(run_id)? {
                Some(memo) => print_memo(&memo),
                None => println!("No memo found for this analysis"),
            }
        }
        Command::Export {
            run_id,
            format,
            no_sources,
            no_charts,
        } => {
            let format: ExportFormat = format.parse()?;
            let config = engine.config();
            let exporter = ReportExporter::new(LocalStorage::new(config.exports_dir()), config.export.clone());
            let request = ExportRequest {
                run_id,
                format,
                include_sources: !no_sources && config.export.include_sources,
                include_charts: !no_charts && config.export.include_charts,
            };
            let report = exporter.export(engine.database(), &request).await?;
            println!(
                "📁 Exported to {}",
                config.exports_dir().join(&report.filename).display()
            );
        }
        Command::Stats => {
            let stats = engine.database().blocking(|db| db.get_database_stats()).await?;
            println!("📁 Total Runs: {}", stats.runs);
            println!("📰 Total Sources: {}", stats.sources);
            println!("🧩 Total Chunks: {}", stats.chunks);
            println!("📊 Total Memos: {}", stats.memos);
            println!("🕒 Runs in last 7 days: {}", stats.recent_runs);
            for (status, count) in &stats.runs_by_status {
                println!("   {:<10} {}", status, count);
            }
            println!("💾 Size: {:.1} MB", stats.database_size_mb);
        }
        Command::Cleanup { days } => {
            let removed = engine
                .database()
                .blocking(move |db| db.cleanup_old_runs(days))
                .await?;
            println!("🧹 Removed {} runs older than {} days", removed, days);
        }
        Command::Watchlist(command) => watchlist(&engine, command)?,
    }
    Ok(())
}

async fn analyze(engine: &AnalysisEngine, args: AnalyzeArgs) -> research_analyst::Result<()> {
    let mut request = AnalysisRequest::new(args.ticker);
    request.include_sec = !args.no_sec;
    request.include_news = !args.no_news;
    request.include_market = !args.no_market;
    request.max_sources = args.max_sources;
    request.priority = args.priority.parse()?;

    println!("🔍 Analyzing {}...", request.normalized_query());
    let run_id = engine.analyze(request).await?;
    let db = engine.database();
    let run = db.require_run(run_id)?;
    println!(
        "✅ Analysis completed in {:.1}s (run #{})",
        run.duration_seconds().unwrap_or_default(),
        run_id
    );
    if let Some(memo) = db.get_memo(run_id)? {
        print_memo(&memo);
    }
    Ok(())
}

fn print_memo(memo: &Memo) {
    println!("\n📄 Executive Summary\n{}", memo.tldr);
    println!("\n⚠️ Key Risks");
    for (i, risk) in memo.risks.iter().enumerate() {
        println!(
            "  {}. {} [{}, {:.0}%]",
            i + 1,
            risk.risk,
            risk.severity,
            risk.confidence * 100.0
        );
    }
    println!("\n🎯 Key Opportunities");
    for (i, opp) in memo.opportunities.iter().enumerate() {
        println!(
            "  {}. {} [{}, {:.0}%]",
            i + 1,
            opp.opportunity,
            opp.potential_impact,
            opp.confidence * 100.0
        );
    }
    if !memo.metrics.is_empty() {
        println!("\n📊 Key Metrics");
        for metric in &memo.metrics {
            println!("  {}: {} ({})", metric.metric, metric.value, metric.trend);
        }
    }
}

fn watchlist(engine: &AnalysisEngine, command: WatchlistCommand) -> research_analyst::Result<()> {
    let wm = engine.watchlists();
    match command {
        WatchlistCommand::Create { name, description } => {
            let id = wm.create_watchlist(&name, description.as_deref())?;
            println!("✅ Watchlist '{}' (id {})", name, id);
        }
        WatchlistCommand::List => {
            for list in wm.get_watchlists()? {
                println!("{:>4}  {:<20} {} tickers", list.id, list.name, list.item_count);
            }
        }
        WatchlistCommand::Add {
            watchlist_id,
            ticker,
            target_price,
            target_low,
            notes,
        } => {
            wm.get_watchlist(watchlist_id)?;
            let item = NewWatchlistItem {
                price_target_high: target_price,
                price_target_low: target_low,
                notes,
            };
            if wm.add_to_watchlist(watchlist_id, &ticker, &item)? {
                println!("✅ Added {} to watchlist {}", ticker.to_uppercase(), watchlist_id);
            } else {
                println!("⚠️ {} is already on watchlist {}", ticker.to_uppercase(), watchlist_id);
            }
        }
        WatchlistCommand::Remove { watchlist_id, ticker } => {
            if wm.remove_from_watchlist(watchlist_id, &ticker)? {
                println!("Removed {} from watchlist {}", ticker.to_uppercase(), watchlist_id);
            } else {
                println!("{} was not on watchlist {}", ticker.to_uppercase(), watchlist_id);
            }
        }
        WatchlistCommand::Items { watchlist_id } => {
            for item in wm.get_watchlist_items(watchlist_id)? {
                println!(
                    "{:<6} last analyzed {:<16} alerts {}{}",
                    item.ticker,
                    item.last_analyzed_at
                        .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".to_string()),
                    item.pending_alerts,
                    item.price_target_high
                        .map(|p| format!("  target {:.2}", p))
                        .unwrap_or_default()
                );
            }
        }
        WatchlistCommand::Alerts { all } => {
            let alerts = if all {
                wm.get_all_alerts()?
            } else {
                wm.get_pending_alerts(None)?
            };
            for alert in alerts {
                println!(
                    "{:>4}  {} {:<6} {}{}",
                    alert.id,
                    alert.triggered_at.format("%Y-%m-%d %H:%M"),
                    alert.ticker,
                    alert.message,
                    if alert.acknowledged { "  (ack)" } else { "" }
                );
            }
        }
        WatchlistCommand::Ack { alert_id } => {
            wm.acknowledge_alert(alert_id)?;
            println!("✅ Alert {} acknowledged", alert_id);
        }
        WatchlistCommand::Stale { hours } => {
            for item in wm.get_stale_items(hours)? {
                println!(
                    "{:<6} {}",
                    item.ticker,
                    item.watchlist_name.as_deref().unwrap_or("")
                );
            }
        }
    }
    Ok(())
}
