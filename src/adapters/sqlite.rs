use crate::domain::model::{
    AnalysisRun, DataSource, Memo, Metadata, RunStatus, SourceType, TextChunk,
};
use crate::utils::error::{AnalystError, Result};
use crate::utils::validation::Validate;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    url TEXT,
    title TEXT,
    published_at TEXT,
    checksum TEXT,
    raw_content TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    text TEXT NOT NULL,
    chunk_type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
    tldr TEXT NOT NULL,
    risks TEXT NOT NULL,
    opportunities TEXT NOT NULL,
    metrics TEXT NOT NULL,
    html_content TEXT NOT NULL,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_runs_query ON runs(query);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
CREATE INDEX IF NOT EXISTS idx_sources_run_id ON sources(run_id);
CREATE INDEX IF NOT EXISTS idx_sources_type ON sources(type);
CREATE INDEX IF NOT EXISTS idx_chunks_source_id ON chunks(source_id);
CREATE INDEX IF NOT EXISTS idx_memos_run_id ON memos(run_id);
"#;

/// Row counts and size of the research database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub runs: i64,
    pub sources: i64,
    pub chunks: i64,
    pub memos: i64,
    pub recent_runs: i64,
    pub runs_by_status: BTreeMap<String, i64>,
    pub database_size_mb: f64,
}

/// SQLite store for runs, sources, chunks, memos and watchlists.
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// `now - window` for a user-supplied window; negative or out-of-range values are rejected.
pub(crate) fn cutoff_before(field: &str, value: i64, window: Option<TimeDelta>) -> Result<DateTime<Utc>> {
    window
        .filter(|_| value >= 0)
        .and_then(|w| Utc::now().checked_sub_signed(w))
        .ok_or_else(|| AnalystError::validation(format!("Invalid {} '{}': out of range", field, value)))
}

pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

/// Unreadable metadata is treated as empty rather than failing the read.
fn parse_metadata(value: Option<String>) -> Metadata {
    value
        .and_then(|v| serde_json::from_str::<Metadata>(&v).ok())
        .unwrap_or_default()
}

fn parse_enum<T: std::str::FromStr<Err = AnalystError>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value
        .parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_json_column<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<AnalysisRun> {
    Ok(AnalysisRun {
        id: Some(row.get(0)?),
        query: row.get(1)?,
        started_at: parse_ts(2, &row.get::<_, String>(2)?)?,
        finished_at: parse_opt_ts(3, row.get(3)?)?,
        status: parse_enum(4, &row.get::<_, String>(4)?)?,
        error_message: row.get(5)?,
        metadata: parse_metadata(row.get(6)?),
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<DataSource> {
    Ok(DataSource {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        source_type: parse_enum::<SourceType>(2, &row.get::<_, String>(2)?)?,
        url: row.get(3)?,
        title: row.get(4)?,
        published_at: parse_opt_ts(5, row.get(5)?)?,
        checksum: row.get(6)?,
        raw_content: row.get(7)?,
        metadata: parse_metadata(row.get(8)?),
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<TextChunk> {
    Ok(TextChunk {
        id: Some(row.get(0)?),
        source_id: row.get(1)?,
        text: row.get(2)?,
        chunk_type: row.get(3)?,
        metadata: parse_metadata(row.get(4)?),
        created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
    })
}

fn memo_from_row(row: &Row<'_>) -> rusqlite::Result<Memo> {
    Ok(Memo {
        id: Some(row.get(0)?),
        run_id: row.get(1)?,
        tldr: row.get(2)?,
        risks: parse_json_column(3, &row.get::<_, String>(3)?)?,
        opportunities: parse_json_column(4, &row.get::<_, String>(4)?)?,
        metrics: parse_json_column(5, &row.get::<_, String>(5)?)?,
        html_content: row.get(6)?,
        created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
        metadata: parse_metadata(row.get(8)?),
    })
}

const RUN_COLUMNS: &str = "id, query, started_at, finished_at, status, error_message, metadata";
const SOURCE_COLUMNS: &str =
    "id, run_id, type, url, title, published_at, checksum, raw_content, metadata";
const CHUNK_COLUMNS: &str = "id, source_id, text, chunk_type, metadata, created_at";
const MEMO_COLUMNS: &str =
    "id, run_id, tldr, risks, opportunities, metrics, html_content, created_at, metadata";

impl Database {
    /// Opens (creating if needed) the database file and its parent directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        tracing::debug!("Opened database at {}", path.display());
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(super::watchlist::WATCHLIST_SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` with exclusive access to the connection.
    pub(crate) fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut guard = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Runs `f` on the blocking pool so slow queries stay off the async workers.
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| AnalystError::processing(format!("Database task failed: {}", e)))?
    }

    pub fn create_run(&self, query: &str) -> Result<i64> {
        self.create_run_with_metadata(query, &Metadata::new())
    }

    pub fn create_run_with_metadata(&self, query: &str, metadata: &Metadata) -> Result<i64> {
        let metadata = serde_json::to_string(metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (query, started_at, status, metadata) VALUES (?1, ?2, ?3, ?4)",
                params![query, format_ts(&Utc::now()), RunStatus::Pending.as_str(), metadata],
            )?;
            let id = conn.last_insert_rowid();
            tracing::info!(run_id = id, "Created analysis run for '{}'", query);
            Ok(id)
        })
    }

    /// Terminal statuses also stamp `finished_at`.
    pub fn update_run_status(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<()> {
        let finished_at = status.is_terminal().then(|| format_ts(&Utc::now()));
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, error_message = ?2,
                     finished_at = COALESCE(?3, finished_at)
                 WHERE id = ?4",
                params![status.as_str(), error, finished_at, run_id],
            )?;
            if changed == 0 {
                return Err(AnalystError::not_found("run", run_id));
            }
            tracing::debug!(run_id, status = status.as_str(), "Updated run status");
            Ok(())
        })
    }

    /// Like `update_run_status` but leaves cancelled runs alone.
    /// Returns false when the run had been cancelled.
    pub fn transition_run_status(&self, run_id: i64, status: RunStatus, error: Option<&str>) -> Result<bool> {
        let finished_at = status.is_terminal().then(|| format_ts(&Utc::now()));
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, error_message = ?2,
                     finished_at = COALESCE(?3, finished_at)
                 WHERE id = ?4 AND status != ?5",
                params![status.as_str(), error, finished_at, run_id, RunStatus::Cancelled.as_str()],
            )?;
            if changed > 0 {
                tracing::debug!(run_id, status = status.as_str(), "Updated run status");
                return Ok(true);
            }
            let exists: Option<i64> = conn
                .query_row("SELECT id FROM runs WHERE id = ?1", params![run_id], |row| row.get(0))
                .optional()?;
            match exists {
                Some(_) => Ok(false),
                None => Err(AnalystError::not_found("run", run_id)),
            }
        })
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<AnalysisRun>> {
        self.with_conn(|conn| {
            let run = conn
                .query_row(
                    &format!("SELECT {} FROM runs WHERE id = ?1", RUN_COLUMNS),
                    params![run_id],
                    run_from_row,
                )
                .optional()?;
            Ok(run)
        })
    }

    /// Like `get_run` but a missing run is an error.
    pub fn require_run(&self, run_id: i64) -> Result<AnalysisRun> {
        self.get_run(run_id)?
            .ok_or_else(|| AnalystError::not_found("run", run_id))
    }

    pub fn get_recent_runs(&self, limit: usize) -> Result<Vec<AnalysisRun>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
                RUN_COLUMNS
            ))?;
            let runs = stmt
                .query_map(params![limit as i64], run_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(runs)
        })
    }

    pub fn add_source(&self, source: &DataSource) -> Result<i64> {
        let metadata = serde_json::to_string(&source.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sources
                    (run_id, type, url, title, published_at, checksum, raw_content, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    source.run_id,
                    source.source_type.as_str(),
                    source.url,
                    source.title,
                    source.published_at.as_ref().map(format_ts),
                    source.checksum,
                    source.raw_content,
                    metadata,
                    format_ts(&Utc::now()),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_sources(&self, run_id: i64) -> Result<Vec<DataSource>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM sources WHERE run_id = ?1 ORDER BY id",
                SOURCE_COLUMNS
            ))?;
            let sources = stmt
                .query_map(params![run_id], source_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sources)
        })
    }

    pub fn add_chunk(&self, chunk: &TextChunk) -> Result<i64> {
        let metadata = serde_json::to_string(&chunk.metadata)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chunks (source_id, text, chunk_type, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chunk.source_id,
                    chunk.text,
                    chunk.chunk_type,
                    metadata,
                    format_ts(&chunk.created_at),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_chunks(&self, source_id: i64) -> Result<Vec<TextChunk>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chunks WHERE source_id = ?1 ORDER BY id",
                CHUNK_COLUMNS
            ))?;
            let chunks = stmt
                .query_map(params![source_id], chunk_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(chunks)
        })
    }

    /// Refuses memos that break the minimum risk/opportunity counts.
    pub fn save_memo(&self, memo: &Memo) -> Result<i64> {
        memo.validate()?;
        let risks = serde_json::to_string(&memo.risks)?;
        let opportunities = serde_json::to_string(&memo.opportunities)?;
        let metrics = serde_json::to_string(&memo.metrics)?;
        let metadata = serde_json::to_string(&memo.metadata)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO memos
                    (run_id, tldr, risks, opportunities, metrics, html_content, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    memo.run_id,
                    memo.tldr,
                    risks,
                    opportunities,
                    metrics,
                    memo.html_content,
                    format_ts(&memo.created_at),
                    metadata,
                ],
            )?;
            let id = conn.last_insert_rowid();
            tracing::info!(run_id = memo.run_id, memo_id = id, "Saved memo");
            Ok(id)
        })
    }

    /// Latest memo for the run.
    pub fn get_memo(&self, run_id: i64) -> Result<Option<Memo>> {
        self.with_conn(|conn| {
            let memo = conn
                .query_row(
                    &format!(
                        "SELECT {} FROM memos WHERE run_id = ?1 ORDER BY id DESC LIMIT 1",
                        MEMO_COLUMNS
                    ),
                    params![run_id],
                    memo_from_row,
                )
                .optional()?;
            Ok(memo)
        })
    }

    /// Deletes runs started more than `days` days ago along with their
    /// sources, chunks and memos. Returns the number of runs removed.
    pub fn cleanup_old_runs(&self, days: i64) -> Result<usize> {
        let cutoff = format_ts(&cutoff_before("days", days, TimeDelta::try_days(days))?);
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM chunks WHERE source_id IN
                    (SELECT s.id FROM sources s JOIN runs r ON s.run_id = r.id WHERE r.started_at < ?1)",
                params![cutoff],
            )?;
            tx.execute(
                "DELETE FROM sources WHERE run_id IN (SELECT id FROM runs WHERE started_at < ?1)",
                params![cutoff],
            )?;
            tx.execute(
                "DELETE FROM memos WHERE run_id IN (SELECT id FROM runs WHERE started_at < ?1)",
                params![cutoff],
            )?;
            let removed = tx.execute("DELETE FROM runs WHERE started_at < ?1", params![cutoff])?;
            tx.commit()?;
            tracing::info!("🧹 Removed {} runs older than {} days", removed, days);
            Ok(removed)
        })
    }

    pub fn get_database_stats(&self) -> Result<DatabaseStats> {
        let week_ago = format_ts(&(Utc::now() - TimeDelta::days(7)));
        self.with_conn(|conn| {
            let count = |table: &str| -> rusqlite::Result<i64> {
                conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            };

            let mut stats = DatabaseStats {
                runs: count("runs")?,
                sources: count("sources")?,
                chunks: count("chunks")?,
                memos: count("memos")?,
                ..Default::default()
            };

            stats.recent_runs = conn.query_row(
                "SELECT COUNT(*) FROM runs WHERE started_at >= ?1",
                params![week_ago],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, n) = row?;
                stats.runs_by_status.insert(status, n);
            }

            let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
            stats.database_size_mb = (page_count * page_size) as f64 / (1024.0 * 1024.0);

            Ok(stats)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Impact, OpportunityItem, RiskItem, Severity};
    use tempfile::TempDir;

    fn sample_memo(run_id: i64, risks: usize) -> Memo {
        let risk = RiskItem {
            risk: "Supply chain".to_string(),
            rationale: "Disruption risk".to_string(),
            source_ids: vec![1],
            confidence: 0.7,
            severity: Severity::Medium,
        };
        let opp = OpportunityItem {
            opportunity: "Services growth".to_string(),
            rationale: "Expanding margins".to_string(),
            source_ids: vec![1],
            confidence: 0.8,
            potential_impact: Impact::High,
        };
        Memo {
            id: None,
            run_id,
            tldr: "AAPL summary".to_string(),
            risks: vec![risk; risks],
            opportunities: vec![opp; 3],
            metrics: vec![],
            html_content: "<h1>AAPL</h1>".to_string(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_run_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("AAPL").unwrap();

        let run = db.require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Pending);
        assert!(run.finished_at.is_none());

        db.update_run_status(run_id, RunStatus::Running, None).unwrap();
        assert!(db.require_run(run_id).unwrap().finished_at.is_none());

        db.update_run_status(run_id, RunStatus::Failed, Some("boom")).unwrap();
        let run = db.require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        assert!(run.finished_at.is_some());
        assert!(run.duration_seconds().unwrap() >= 0.0);
    }

    #[test]
    fn test_update_unknown_run_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.update_run_status(99, RunStatus::Completed, None).unwrap_err();
        assert!(matches!(err, AnalystError::NotFound { entity: "run", .. }));
        assert!(db.get_run(99).unwrap().is_none());
    }

    #[test]
    fn test_sources_and_chunks_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("MSFT").unwrap();

        let mut source = DataSource::new(run_id, SourceType::NewsArticle);
        source.title = Some("Microsoft beats estimates".to_string());
        source.published_at = Some(Utc::now());
        source.metadata.insert("feed_title".into(), "Markets".into());
        let source_id = db.add_source(&source).unwrap();

        let chunk = TextChunk {
            id: None,
            source_id,
            text: "Revenue grew strongly.".to_string(),
            chunk_type: "news".to_string(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        };
        db.add_chunk(&chunk).unwrap();

        let sources = db.get_sources(run_id).unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, Some(source_id));
        assert_eq!(sources[0].source_type, SourceType::NewsArticle);
        assert_eq!(sources[0].metadata_str("feed_title"), Some("Markets"));

        let chunks = db.get_chunks(source_id).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Revenue grew strongly.");
    }

    #[test]
    fn test_malformed_metadata_reads_as_empty() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("TSLA").unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET metadata = 'not json' WHERE id = ?1",
                params![run_id],
            )?;
            Ok(())
        })
        .unwrap();

        let run = db.require_run(run_id).unwrap();
        assert!(run.metadata.is_empty());
    }

    #[test]
    fn test_save_memo_validates() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("AAPL").unwrap();

        assert!(db.save_memo(&sample_memo(run_id, 2)).is_err());
        assert!(db.get_memo(run_id).unwrap().is_none());

        db.save_memo(&sample_memo(run_id, 3)).unwrap();
        let mut newer = sample_memo(run_id, 4);
        newer.tldr = "Updated".to_string();
        db.save_memo(&newer).unwrap();

        let memo = db.get_memo(run_id).unwrap().unwrap();
        assert_eq!(memo.tldr, "Updated");
        assert_eq!(memo.risks.len(), 4);
        assert_eq!(memo.opportunities[0].potential_impact, Impact::High);
    }

    #[test]
    fn test_recent_runs_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let first = db.create_run("AAPL").unwrap();
        let second = db.create_run("MSFT").unwrap();

        let runs = db.get_recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, Some(second));
        assert_eq!(runs[1].id, Some(first));
        assert_eq!(db.get_recent_runs(1).unwrap().len(), 1);
    }

    #[test]
    fn test_cleanup_old_runs_removes_children() {
        let db = Database::open_in_memory().unwrap();
        let old = db.create_run("OLD").unwrap();
        let fresh = db.create_run("NEW").unwrap();
        let source_id = db.add_source(&DataSource::new(old, SourceType::MarketData)).unwrap();
        db.add_chunk(&TextChunk {
            id: None,
            source_id,
            text: "old".to_string(),
            chunk_type: "market".to_string(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        })
        .unwrap();
        db.save_memo(&sample_memo(old, 3)).unwrap();

        let long_ago = format_ts(&(Utc::now() - TimeDelta::days(45)));
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET started_at = ?1 WHERE id = ?2",
                params![long_ago, old],
            )?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.cleanup_old_runs(30).unwrap(), 1);
        assert!(db.get_run(old).unwrap().is_none());
        assert!(db.get_run(fresh).unwrap().is_some());
        assert!(db.get_sources(old).unwrap().is_empty());
        assert!(db.get_chunks(source_id).unwrap().is_empty());
        assert!(db.get_memo(old).unwrap().is_none());
    }

    #[test]
    fn test_cleanup_rejects_bad_windows() {
        let db = Database::open_in_memory().unwrap();
        db.create_run("AAPL").unwrap();
        for days in [1_000_000_000, i64::MAX, -1] {
            let err = db.cleanup_old_runs(days).unwrap_err();
            assert!(matches!(err, AnalystError::ValidationError { .. }));
        }
        assert!(db.cleanup_old_runs(0).is_ok());
    }

    #[test]
    fn test_transition_skips_cancelled_runs() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("AAPL").unwrap();
        assert!(db.transition_run_status(run_id, RunStatus::Running, None).unwrap());

        db.update_run_status(run_id, RunStatus::Cancelled, None).unwrap();
        assert!(!db.transition_run_status(run_id, RunStatus::Completed, None).unwrap());
        assert!(!db.transition_run_status(run_id, RunStatus::Failed, Some("timeout")).unwrap());

        let run = db.require_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.error_message.is_none());
        assert!(matches!(
            db.transition_run_status(999, RunStatus::Running, None),
            Err(AnalystError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_runtime() {
        let db = Database::open_in_memory().unwrap();
        db.create_run("AAPL").unwrap();
        let stats = db.blocking(|db| db.get_database_stats()).await.unwrap();
        assert_eq!(stats.runs, 1);
    }

    #[test]
    fn test_database_stats() {
        let db = Database::open_in_memory().unwrap();
        let run_id = db.create_run("AAPL").unwrap();
        db.add_source(&DataSource::new(run_id, SourceType::SecFiling)).unwrap();
        db.update_run_status(run_id, RunStatus::Completed, None).unwrap();
        db.create_run("MSFT").unwrap();

        let stats = db.get_database_stats().unwrap();
        assert_eq!(stats.runs, 2);
        assert_eq!(stats.sources, 1);
        assert_eq!(stats.recent_runs, 2);
        assert_eq!(stats.runs_by_status.get("completed"), Some(&1));
        assert_eq!(stats.runs_by_status.get("pending"), Some(&1));
        assert!(stats.database_size_mb > 0.0);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("research.db");
        let db = Database::open(&path).unwrap();
        db.create_run("AAPL").unwrap();
        assert!(path.exists());

        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.get_recent_runs(5).unwrap().len(), 1);
    }
}
