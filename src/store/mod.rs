//! SQLite document store.
//!
//! One table per collection: `leads`, `lead_activities`,
//! `twilio_active_clients`, `twilio_logs`, `call_recordings`, `settings` and
//! `users`. Timestamps are stored as fixed-width RFC 3339 UTC strings so that
//! lexicographic order matches time order.

pub mod leads;
pub mod users;
pub mod voice;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS leads (
                id TEXT PRIMARY KEY,
                company_name TEXT NOT NULL,
                contact_name TEXT,
                email TEXT,
                phone TEXT,
                lead_type TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'new',
                tier TEXT,
                estimated_revenue REAL,
                last_contacted_at TEXT,
                next_follow_up_at TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS lead_activities (
                id TEXT PRIMARY KEY,
                lead_id TEXT NOT NULL REFERENCES leads(id),
                type TEXT NOT NULL,
                description TEXT NOT NULL,
                outcome TEXT,
                duration INTEGER,
                created_by TEXT NOT NULL,
                created_at TEXT NOT NULL,
                scheduled_for TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_lead_activities_lead
                ON lead_activities(lead_id, created_at);

            CREATE TABLE IF NOT EXISTS twilio_active_clients (
                identity TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                registered_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS twilio_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL,
                call_sid TEXT,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_twilio_logs_call ON twilio_logs(call_sid);

            CREATE TABLE IF NOT EXISTS call_recordings (
                recording_id TEXT PRIMARY KEY,
                recording_url TEXT NOT NULL,
                duration INTEGER,
                call_sid TEXT NOT NULL,
                lead_id TEXT,
                timestamp TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                updated_by TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                role TEXT NOT NULL DEFAULT 'member'
            );
            ",
        )?;

        Ok(Self { conn })
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an immediate transaction. Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|r| parse_ts(idx, &r)).transpose()
}

/// Parse a stored enum tag, surfacing unknown values as a conversion failure.
pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = Utc.with_ymd_and_hms(2026, 3, 9, 9, 5, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 1, 17, 0, 0).unwrap();
        assert!(ts(&early) < ts(&late));
        assert_eq!(parse_ts(0, &ts(&early)).unwrap(), early);
    }

    #[test]
    fn open_on_disk_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crm.db");
        Store::open(&path).expect("first open");
        Store::open(&path).expect("second open reuses schema");
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let mut store = Store::open_in_memory().unwrap();
        let result: Result<(), rusqlite::Error> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO users (id, role) VALUES ('u1', 'admin')", [])?;
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());

        let count: i64 = store
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
