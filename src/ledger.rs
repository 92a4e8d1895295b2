//! Durable audit trail of suppression instances and counter wards.
//!
//! Identity columns are written once; `milliseconds` and the three
//! suppression counters only ever grow.

use anyhow::{anyhow, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::Mutex;

use crate::model::{NewSuppression, SuppressionKind, SuppressionRecord};

pub trait SuppressionLedger: Send + Sync {
    fn create(&self, new: &NewSuppression) -> Result<SuppressionRecord>;
    fn get(&self, id: i64) -> Result<Option<SuppressionRecord>>;
    /// All rows ever written for a subject, oldest first.
    fn history(&self, subject_id: &str, team_id: &str) -> Result<Vec<SuppressionRecord>>;
    fn add_duration(&self, id: i64, ms: u64) -> Result<()>;
    fn add_statistics(&self, id: i64, messages: u64, words: u64, characters: u64) -> Result<()>;
    /// Muzzles issued by `requestor_id` since `since_ms` (epoch millis).
    fn count_issued_since(&self, requestor_id: &str, team_id: &str, since_ms: i64) -> Result<u64>;
    fn record_ward(&self, warder_id: &str, blocked_id: &str, team_id: &str) -> Result<i64>;
    fn mark_ward_countered(&self, ward_id: i64) -> Result<()>;
    fn is_ward_countered(&self, ward_id: i64) -> Result<Option<bool>>;
}

pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open(path)?) })
    }

    pub fn in_memory() -> Result<Self> {
        let ledger = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        ledger.init()?;
        Ok(ledger)
    }

    pub fn init(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "BEGIN;
                CREATE TABLE IF NOT EXISTS suppressions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    requestor_id TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    team_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    milliseconds INTEGER NOT NULL,
                    messages_suppressed INTEGER NOT NULL DEFAULT 0,
                    words_suppressed INTEGER NOT NULL DEFAULT 0,
                    characters_suppressed INTEGER NOT NULL DEFAULT 0,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_suppressions_requestor
                    ON suppressions (requestor_id, team_id, created_at);
                CREATE TABLE IF NOT EXISTS wards (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    warder_id TEXT NOT NULL,
                    blocked_id TEXT NOT NULL,
                    team_id TEXT NOT NULL,
                    countered INTEGER NOT NULL DEFAULT 0,
                    countered_at INTEGER,
                    created_at INTEGER NOT NULL
                );
                COMMIT;",
            )?;
            Ok(())
        })
    }

    fn with_conn<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.conn.lock().map_err(|_| anyhow!("ledger connection poisoned"))?;
        f(&conn)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SuppressionRecord> {
    let kind: String = row.get(4)?;
    Ok(SuppressionRecord {
        id: row.get(0)?,
        issuer_id: row.get(1)?,
        subject_id: row.get(2)?,
        team_id: row.get(3)?,
        kind: SuppressionKind::parse(&kind).unwrap_or(SuppressionKind::Muzzle),
        duration_ms: row.get::<_, i64>(5)? as u64,
        messages_suppressed: row.get::<_, i64>(6)? as u64,
        words_suppressed: row.get::<_, i64>(7)? as u64,
        characters_suppressed: row.get::<_, i64>(8)? as u64,
    })
}

const RECORD_COLUMNS: &str = "id, requestor_id, subject_id, team_id, kind, milliseconds, \
     messages_suppressed, words_suppressed, characters_suppressed";

impl SuppressionLedger for SqliteLedger {
    fn create(&self, new: &NewSuppression) -> Result<SuppressionRecord> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO suppressions (requestor_id, subject_id, team_id, kind, milliseconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.issuer_id,
                    new.subject_id,
                    new.team_id,
                    new.kind.as_str(),
                    new.duration_ms as i64,
                    now_ms()
                ],
            )?;
            Ok(SuppressionRecord {
                id: conn.last_insert_rowid(),
                subject_id: new.subject_id.clone(),
                team_id: new.team_id.clone(),
                kind: new.kind,
                issuer_id: new.issuer_id.clone(),
                duration_ms: new.duration_ms,
                messages_suppressed: 0,
                words_suppressed: 0,
                characters_suppressed: 0,
            })
        })
    }

    fn get(&self, id: i64) -> Result<Option<SuppressionRecord>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM suppressions WHERE id = ?1", RECORD_COLUMNS);
            Ok(conn.query_row(&sql, params![id], record_from_row).optional()?)
        })
    }

    fn history(&self, subject_id: &str, team_id: &str) -> Result<Vec<SuppressionRecord>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM suppressions WHERE subject_id = ?1 AND team_id = ?2 ORDER BY id",
                RECORD_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![subject_id, team_id], record_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
    }

    fn add_duration(&self, id: i64, ms: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE suppressions SET milliseconds = milliseconds + ?1 WHERE id = ?2",
                params![ms as i64, id],
            )?;
            Ok(())
        })
    }

    fn add_statistics(&self, id: i64, messages: u64, words: u64, characters: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE suppressions
                 SET messages_suppressed = messages_suppressed + ?1,
                     words_suppressed = words_suppressed + ?2,
                     characters_suppressed = characters_suppressed + ?3
                 WHERE id = ?4",
                params![messages as i64, words as i64, characters as i64, id],
            )?;
            Ok(())
        })
    }

    fn count_issued_since(&self, requestor_id: &str, team_id: &str, since_ms: i64) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM suppressions
                 WHERE requestor_id = ?1 AND team_id = ?2 AND kind = ?3 AND created_at >= ?4",
                params![requestor_id, team_id, SuppressionKind::Muzzle.as_str(), since_ms],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    fn record_ward(&self, warder_id: &str, blocked_id: &str, team_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO wards (warder_id, blocked_id, team_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![warder_id, blocked_id, team_id, now_ms()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    fn mark_ward_countered(&self, ward_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE wards SET countered = 1, countered_at = ?1 WHERE id = ?2",
                params![now_ms(), ward_id],
            )?;
            Ok(())
        })
    }

    fn is_ward_countered(&self, ward_id: i64) -> Result<Option<bool>> {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT countered FROM wards WHERE id = ?1", params![ward_id], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?
                .map(|c| c != 0))
        })
    }
}
