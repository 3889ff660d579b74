use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use crate::session::SessionSummary;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("summary encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArchivedSummary {
    pub id: i64,
    pub session_id: String,
    pub user_uid: String,
    pub closed_at: String,
    pub summary: SessionSummary,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveTotals {
    pub sessions: u64,
    pub events: u64,
    pub errors: u64,
}

/// SQLite store of closed-session summaries.
pub struct SummaryArchive {
    conn: Mutex<Connection>,
}

impl SummaryArchive {
    pub fn open(db_path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self, ArchiveError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, ArchiveError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS session_summaries (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 session_id TEXT NOT NULL,
                 user_uid TEXT NOT NULL,
                 closed_at TEXT NOT NULL,
                 duration_seconds REAL NOT NULL,
                 total_events INTEGER NOT NULL,
                 error_count INTEGER NOT NULL,
                 summary TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_summaries_user ON session_summaries(user_uid, closed_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn insert(&self, session_id: &str, user_uid: &str, summary: &SessionSummary) -> Result<i64, ArchiveError> {
        let encoded = serde_json::to_string(summary)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_summaries
                 (session_id, user_uid, closed_at, duration_seconds, total_events, error_count, summary)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                user_uid,
                Utc::now().to_rfc3339(),
                summary.session_duration_seconds,
                summary.total_events as i64,
                summary.error_count as i64,
                encoded,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent summaries first.
    pub fn recent(&self, limit: u32) -> Result<Vec<ArchivedSummary>, ArchiveError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, session_id, user_uid, closed_at, summary
             FROM session_summaries ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, session_id, user_uid, closed_at, raw) = row?;
            out.push(ArchivedSummary {
                id,
                session_id,
                user_uid,
                closed_at,
                summary: serde_json::from_str(&raw)?,
            });
        }
        Ok(out)
    }

    pub fn totals(&self) -> Result<ArchiveTotals, ArchiveError> {
        let conn = self.conn.lock();
        let totals = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(total_events), 0), COALESCE(SUM(error_count), 0)
             FROM session_summaries",
            [],
            |row| {
                Ok(ArchiveTotals {
                    sessions: row.get::<_, i64>(0)? as u64,
                    events: row.get::<_, i64>(1)? as u64,
                    errors: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vita-test-archive-{}", uuid::Uuid::now_v7()));
        dir.join("summaries.db")
    }

    fn summary(events: u64, errors: usize) -> SessionSummary {
        SessionSummary {
            session_duration_seconds: 12.5,
            total_events: events,
            agent_performance: BTreeMap::new(),
            tool_usage: BTreeMap::new(),
            handoff_history: Vec::new(),
            error_count: errors,
            errors: None,
        }
    }

    #[test]
    fn insert_and_read_back() {
        let archive = SummaryArchive::open(&temp_db()).unwrap();
        archive.insert("sess_a", "u1", &summary(4, 0)).unwrap();
        archive.insert("sess_b", "u1", &summary(6, 2)).unwrap();

        let recent = archive.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].session_id, "sess_b");
        assert_eq!(recent[0].summary.total_events, 6);

        let totals = archive.totals().unwrap();
        assert_eq!(totals, ArchiveTotals { sessions: 2, events: 10, errors: 2 });
    }

    #[test]
    fn empty_archive_totals() {
        let archive = SummaryArchive::in_memory().unwrap();
        assert_eq!(archive.totals().unwrap(), ArchiveTotals::default());
        assert!(archive.recent(5).unwrap().is_empty());
    }
}
