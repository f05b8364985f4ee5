//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The collector and the cache reach it through `MarketDataSource` and
//! `CacheStore`; they never execute SQL directly.

mod cache;
mod market;

use crate::error::NavResult;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{types::Type, Connection};
use std::sync::{Mutex, MutexGuard};

pub struct NavStore {
    conn: Mutex<Connection>,
}

impl NavStore {
    pub fn open(path: &str) -> NavResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        log::debug!("opened store at {path}");
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> NavResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> NavResult<()> {
        let conn = self.conn();
        conn.execute_batch(include_str!("../../../migrations/001_market_data.sql"))?;
        conn.execute_batch(include_str!("../../../migrations/002_penalty_cache.sql"))?;
        Ok(())
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Column codecs ──────────────────────────────────────────────────

const MONTH_FORMAT: &str = "%Y-%m-%d";

fn month_to_sql(month: NaiveDate) -> String {
    month.format(MONTH_FORMAT).to_string()
}

fn month_from_sql(column: usize, raw: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&raw, MONTH_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

fn time_to_sql(at: DateTime<Utc>) -> String {
    at.to_rfc3339()
}

fn time_from_sql(column: usize, raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
