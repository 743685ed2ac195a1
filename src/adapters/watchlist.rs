use crate::adapters::sqlite::{cutoff_before, format_ts, parse_opt_ts, parse_ts, Database};
use crate::utils::error::{AnalystError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use rusqlite::{params, ErrorCode, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

pub(crate) const WATCHLIST_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS watchlists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT UNIQUE NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS watchlist_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    watchlist_id INTEGER NOT NULL REFERENCES watchlists(id) ON DELETE CASCADE,
    ticker TEXT NOT NULL,
    added_at TEXT NOT NULL,
    last_analyzed_at TEXT,
    alert_enabled INTEGER NOT NULL DEFAULT 1,
    price_target_high REAL,
    price_target_low REAL,
    notes TEXT,
    UNIQUE(watchlist_id, ticker)
);

CREATE TABLE IF NOT EXISTS watchlist_alerts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    watchlist_item_id INTEGER NOT NULL REFERENCES watchlist_items(id) ON DELETE CASCADE,
    alert_type TEXT NOT NULL,
    message TEXT NOT NULL,
    triggered_at TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_watchlist_items_ticker ON watchlist_items(ticker);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistItem {
    pub id: i64,
    pub watchlist_id: i64,
    pub ticker: String,
    pub added_at: DateTime<Utc>,
    pub last_analyzed_at: Option<DateTime<Utc>>,
    pub alert_enabled: bool,
    pub price_target_high: Option<f64>,
    pub price_target_low: Option<f64>,
    pub notes: Option<String>,
    pub pending_alerts: i64,
    pub watchlist_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistAlert {
    pub id: i64,
    pub watchlist_item_id: i64,
    pub alert_type: String,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub ticker: String,
    pub watchlist_name: String,
}

/// Optional fields for a new watchlist entry.
#[derive(Debug, Clone, Default)]
pub struct NewWatchlistItem {
    pub price_target_high: Option<f64>,
    pub price_target_low: Option<f64>,
    pub notes: Option<String>,
}

const WATCHLIST_COLUMNS: &str = "w.id, w.name, w.description, w.created_at, w.updated_at";
const ITEM_COLUMNS: &str = "wi.id, wi.watchlist_id, wi.ticker, wi.added_at, wi.last_analyzed_at, \
     wi.alert_enabled, wi.price_target_high, wi.price_target_low, wi.notes";

fn watchlist_from_row(row: &Row<'_>) -> rusqlite::Result<Watchlist> {
    Ok(Watchlist {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        updated_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        item_count: row.get(5)?,
    })
}

/// Item columns followed by pending alert count and watchlist name.
fn item_from_row(row: &Row<'_>) -> rusqlite::Result<WatchlistItem> {
    Ok(WatchlistItem {
        id: row.get(0)?,
        watchlist_id: row.get(1)?,
        ticker: row.get(2)?,
        added_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        last_analyzed_at: parse_opt_ts(4, row.get(4)?)?,
        alert_enabled: row.get(5)?,
        price_target_high: row.get(6)?,
        price_target_low: row.get(7)?,
        notes: row.get(8)?,
        pending_alerts: row.get(9)?,
        watchlist_name: row.get(10)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<WatchlistAlert> {
    Ok(WatchlistAlert {
        id: row.get(0)?,
        watchlist_item_id: row.get(1)?,
        alert_type: row.get(2)?,
        message: row.get(3)?,
        triggered_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        acknowledged: row.get(5)?,
        ticker: row.get(6)?,
        watchlist_name: row.get(7)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Watchlists, their tickers and price alerts, stored alongside the runs.
#[derive(Debug, Clone)]
pub struct WatchlistManager {
    db: Database,
}

impl WatchlistManager {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the existing id when a watchlist with `name` already exists.
    pub fn create_watchlist(&self, name: &str, description: Option<&str>) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AnalystError::validation("Watchlist name cannot be empty"));
        }
        let now = format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            let existing: Option<i64> = conn
                .query_row("SELECT id FROM watchlists WHERE name = ?1", params![name], |row| {
                    row.get(0)
                })
                .optional()?;
            if let Some(id) = existing {
                tracing::debug!("Watchlist '{}' already exists with ID {}", name, id);
                return Ok(id);
            }

            conn.execute(
                "INSERT INTO watchlists (name, description, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![name, description, now],
            )?;
            let id = conn.last_insert_rowid();
            tracing::info!("Created watchlist '{}' with ID {}", name, id);
            Ok(id)
        })
    }

    /// Most recently updated first.
    pub fn get_watchlists(&self) -> Result<Vec<Watchlist>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, COUNT(wi.id) AS item_count
                 FROM watchlists w
                 LEFT JOIN watchlist_items wi ON w.id = wi.watchlist_id
                 GROUP BY w.id
                 ORDER BY w.updated_at DESC, w.id DESC",
                WATCHLIST_COLUMNS
            ))?;
            let lists = stmt
                .query_map([], watchlist_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(lists)
        })
    }

    pub fn get_watchlist_by_name(&self, name: &str) -> Result<Option<Watchlist>> {
        self.db.with_conn(|conn| {
            let list = conn
                .query_row(
                    &format!(
                        "SELECT {}, (SELECT COUNT(*) FROM watchlist_items WHERE watchlist_id = w.id)
                         FROM watchlists w WHERE w.name = ?1",
                        WATCHLIST_COLUMNS
                    ),
                    params![name],
                    watchlist_from_row,
                )
                .optional()?;
            Ok(list)
        })
    }

    pub fn get_watchlist(&self, watchlist_id: i64) -> Result<Watchlist> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {}, (SELECT COUNT(*) FROM watchlist_items WHERE watchlist_id = w.id)
                     FROM watchlists w WHERE w.id = ?1",
                    WATCHLIST_COLUMNS
                ),
                params![watchlist_id],
                watchlist_from_row,
            )
            .optional()?
            .ok_or_else(|| AnalystError::not_found("watchlist", watchlist_id))
        })
    }

    /// Returns false when the ticker is already on the watchlist.
    pub fn add_to_watchlist(&self, watchlist_id: i64, ticker: &str, item: &NewWatchlistItem) -> Result<bool> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(AnalystError::validation("Ticker cannot be empty"));
        }
        let now = format_ts(&Utc::now());

        self.db.with_conn(|conn| {
            let exists: Option<i64> = conn
                .query_row("SELECT id FROM watchlists WHERE id = ?1", params![watchlist_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_none() {
                return Err(AnalystError::not_found("watchlist", watchlist_id));
            }

            let inserted = conn.execute(
                "INSERT INTO watchlist_items
                    (watchlist_id, ticker, added_at, price_target_high, price_target_low, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    watchlist_id,
                    ticker,
                    now,
                    item.price_target_high,
                    item.price_target_low,
                    item.notes
                ],
            );

            match inserted {
                Ok(_) => {
                    conn.execute(
                        "UPDATE watchlists SET updated_at = ?1 WHERE id = ?2",
                        params![now, watchlist_id],
                    )?;
                    tracing::info!("Added {} to watchlist {}", ticker, watchlist_id);
                    Ok(true)
                }
                Err(e) if is_unique_violation(&e) => {
                    tracing::warn!("Ticker {} already in watchlist {}", ticker, watchlist_id);
                    Ok(false)
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Items with their unacknowledged alert counts, ordered by ticker.
    pub fn get_watchlist_items(&self, watchlist_id: i64) -> Result<Vec<WatchlistItem>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {},
                    COUNT(CASE WHEN wa.acknowledged = 0 THEN wa.id END) AS pending_alerts,
                    w.name
                 FROM watchlist_items wi
                 JOIN watchlists w ON wi.watchlist_id = w.id
                 LEFT JOIN watchlist_alerts wa ON wi.id = wa.watchlist_item_id
                 WHERE wi.watchlist_id = ?1
                 GROUP BY wi.id
                 ORDER BY wi.ticker",
                ITEM_COLUMNS
            ))?;
            let items = stmt
                .query_map(params![watchlist_id], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Every watchlist entry for `ticker`, across watchlists.
    pub fn items_for_ticker(&self, ticker: &str) -> Result<Vec<WatchlistItem>> {
        let ticker = ticker.trim().to_uppercase();
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, 0, w.name
                 FROM watchlist_items wi
                 JOIN watchlists w ON wi.watchlist_id = w.id
                 WHERE wi.ticker = ?1",
                ITEM_COLUMNS
            ))?;
            let items = stmt
                .query_map(params![ticker], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    /// Returns false when the ticker was not on the watchlist.
    pub fn remove_from_watchlist(&self, watchlist_id: i64, ticker: &str) -> Result<bool> {
        let ticker = ticker.trim().to_uppercase();
        let now = format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM watchlist_items WHERE watchlist_id = ?1 AND ticker = ?2",
                params![watchlist_id, ticker],
            )?;
            if removed == 0 {
                tracing::warn!("Ticker {} not found in watchlist {}", ticker, watchlist_id);
                return Ok(false);
            }
            conn.execute(
                "UPDATE watchlists SET updated_at = ?1 WHERE id = ?2",
                params![now, watchlist_id],
            )?;
            tracing::info!("Removed {} from watchlist {}", ticker, watchlist_id);
            Ok(true)
        })
    }

    pub fn update_last_analyzed(&self, watchlist_id: i64, ticker: &str) -> Result<()> {
        let ticker = ticker.trim().to_uppercase();
        let now = format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE watchlist_items SET last_analyzed_at = ?1
                 WHERE watchlist_id = ?2 AND ticker = ?3",
                params![now, watchlist_id, ticker],
            )?;
            Ok(())
        })
    }

    pub fn create_alert(&self, watchlist_item_id: i64, alert_type: &str, message: &str) -> Result<i64> {
        let now = format_ts(&Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO watchlist_alerts (watchlist_item_id, alert_type, message, triggered_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![watchlist_item_id, alert_type, message, now],
            )?;
            let id = conn.last_insert_rowid();
            tracing::info!("🔔 Created alert for item {}: {}", watchlist_item_id, alert_type);
            Ok(id)
        })
    }

    /// Unacknowledged alerts, newest first.
    pub fn get_pending_alerts(&self, watchlist_id: Option<i64>) -> Result<Vec<WatchlistAlert>> {
        self.query_alerts(true, watchlist_id)
    }

    pub fn get_all_alerts(&self) -> Result<Vec<WatchlistAlert>> {
        self.query_alerts(false, None)
    }

    fn query_alerts(&self, pending_only: bool, watchlist_id: Option<i64>) -> Result<Vec<WatchlistAlert>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT wa.id, wa.watchlist_item_id, wa.alert_type, wa.message, wa.triggered_at,
                        wa.acknowledged, wi.ticker, w.name
                 FROM watchlist_alerts wa
                 JOIN watchlist_items wi ON wa.watchlist_item_id = wi.id
                 JOIN watchlists w ON wi.watchlist_id = w.id
                 WHERE (?1 = 0 OR wa.acknowledged = 0)
                   AND (?2 IS NULL OR w.id = ?2)
                 ORDER BY wa.triggered_at DESC, wa.id DESC",
            )?;
            let alerts = stmt
                .query_map(params![pending_only, watchlist_id], alert_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(alerts)
        })
    }

    pub fn acknowledge_alert(&self, alert_id: i64) -> Result<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE watchlist_alerts SET acknowledged = 1 WHERE id = ?1",
                params![alert_id],
            )?;
            if changed == 0 {
                return Err(AnalystError::not_found("alert", alert_id));
            }
            Ok(())
        })
    }

    /// Items never analysed, or last analysed more than `hours` ago.
    /// Never-analysed items come first.
    pub fn get_stale_items(&self, hours: i64) -> Result<Vec<WatchlistItem>> {
        let cutoff = format_ts(&cutoff_before("hours", hours, TimeDelta::try_hours(hours))?);
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {}, 0, w.name
                 FROM watchlist_items wi
                 JOIN watchlists w ON wi.watchlist_id = w.id
                 WHERE wi.last_analyzed_at IS NULL OR wi.last_analyzed_at < ?1
                 ORDER BY wi.last_analyzed_at IS NOT NULL, wi.last_analyzed_at ASC",
                ITEM_COLUMNS
            ))?;
            let items = stmt
                .query_map(params![cutoff], item_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(items)
        })
    }

    fn has_pending_alert(&self, watchlist_item_id: i64, alert_type: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT id FROM watchlist_alerts
                     WHERE watchlist_item_id = ?1 AND alert_type = ?2 AND acknowledged = 0
                     LIMIT 1",
                    params![watchlist_item_id, alert_type],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Raises `price_above_target` / `price_below_target` alerts for every
    /// watched entry of `ticker` whose targets `price` crosses. An item gets
    /// at most one unacknowledged alert per type.
    pub fn check_price_targets(&self, ticker: &str, price: f64) -> Result<Vec<i64>> {
        let mut created = Vec::new();
        for item in self.items_for_ticker(ticker)? {
            if !item.alert_enabled {
                continue;
            }
            let mut triggered = Vec::new();
            if let Some(high) = item.price_target_high.filter(|high| price >= *high) {
                triggered.push((
                    "price_above_target",
                    format!("{} at {:.2} reached the upper target {:.2}", item.ticker, price, high),
                ));
            }
            if let Some(low) = item.price_target_low.filter(|low| price <= *low) {
                triggered.push((
                    "price_below_target",
                    format!("{} at {:.2} fell to the lower target {:.2}", item.ticker, price, low),
                ));
            }
            for (alert_type, message) in triggered {
                if self.has_pending_alert(item.id, alert_type)? {
                    tracing::debug!("{} already has a pending {} alert", item.ticker, alert_type);
                    continue;
                }
                created.push(self.create_alert(item.id, alert_type, &message)?);
            }
        }
        Ok(created)
    }
}
