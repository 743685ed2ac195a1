use crate::config::app_config::AppConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "research-analyst", version)]
#[command(about = "Local research assistant that turns market data, news and SEC filings into analyst memos")]
pub struct Cli {
    #[arg(
        long,
        short,
        global = true,
        default_value = "research.toml",
        env = "ANALYST_CONFIG",
        help = "Path to the TOML configuration file"
    )]
    pub config: PathBuf,

    #[arg(long, global = true, env = "ANALYST_DATABASE", help = "Override the SQLite database path")]
    pub database: Option<PathBuf>,

    #[arg(long, short, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit JSON formatted logs")]
    pub json_logs: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage per analysis phase")]
    pub monitor: bool,

    /// Defaults to `serve` when omitted.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Launch the web UI
    Serve(ServeArgs),
    /// Run one analysis in the foreground and print the memo summary
    Analyze(AnalyzeArgs),
    /// List recent analysis runs
    Runs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show a run with its memo
    Show { run_id: i64 },
    /// Export a run's memo to the exports directory
    Export {
        run_id: i64,
        #[arg(long, short, default_value = "html", help = "html, pdf, pptx or csv")]
        format: String,
        #[arg(long, help = "Leave the source list out of the export")]
        no_sources: bool,
        #[arg(long, help = "Leave the price chart out of the export")]
        no_charts: bool,
    },
    /// Print database statistics
    Stats,
    /// Delete runs older than the given number of days
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Manage watchlists and price alerts
    #[command(subcommand)]
    Watchlist(WatchlistCommand),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    #[arg(long, env = "ANALYST_SERVER_ADDRESS")]
    pub address: Option<String>,

    #[arg(long, short, env = "ANALYST_SERVER_PORT")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Args)]
pub struct AnalyzeArgs {
    pub ticker: String,

    #[arg(long)]
    pub no_sec: bool,

    #[arg(long)]
    pub no_news: bool,

    #[arg(long)]
    pub no_market: bool,

    #[arg(long, default_value_t = 20)]
    pub max_sources: usize,

    #[arg(long, default_value = "balanced", help = "speed, balanced or quality")]
    pub priority: String,
}

#[derive(Debug, Clone, Subcommand)]
pub enum WatchlistCommand {
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    List,
    Add {
        watchlist_id: i64,
        ticker: String,
        #[arg(long, help = "Upper price target")]
        target_price: Option<f64>,
        #[arg(long, help = "Lower price target")]
        target_low: Option<f64>,
        #[arg(long)]
        notes: Option<String>,
    },
    Remove {
        watchlist_id: i64,
        ticker: String,
    },
    Items {
        watchlist_id: i64,
    },
    Alerts {
        #[arg(long, help = "Include acknowledged alerts")]
        all: bool,
    },
    Ack {
        alert_id: i64,
    },
    /// Tickers not analysed within the given window
    Stale {
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Serve(ServeArgs::default()))
    }

    /// Command-line flags win over the file.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(db) = &self.database {
            config.paths.database = db.to_string_lossy().into_owned();
        }
        if let Some(Command::Serve(args)) = &self.command {
            if let Some(address) = &args.address {
                config.server.address = address.clone();
            }
            if let Some(port) = args.port {
                config.server.port = port;
            }
        }
    }
}
