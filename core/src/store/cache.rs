//! Penalty cache rows. Payloads are opaque here.

use super::{time_to_sql, NavStore};
use crate::{
    cache::{CacheKey, CacheStore},
    error::NavResult,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl CacheStore for NavStore {
    fn get(&self, key: &CacheKey) -> NavResult<Option<String>> {
        let payload = self
            .conn()
            .query_row(
                "SELECT payload FROM penalty_cache WHERE ticker = ?1 AND analysis_type = ?2",
                params![&key.ticker, key.analysis_type.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put(&self, key: &CacheKey, payload: &str, valid_until: DateTime<Utc>) -> NavResult<()> {
        self.conn().execute(
            "INSERT INTO penalty_cache (ticker, analysis_type, payload, valid_until)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (ticker, analysis_type) DO UPDATE SET
                payload = excluded.payload,
                valid_until = excluded.valid_until",
            params![&key.ticker, key.analysis_type.as_str(), payload, time_to_sql(valid_until)],
        )?;
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> NavResult<bool> {
        let n = self.conn().execute(
            "DELETE FROM penalty_cache WHERE ticker = ?1 AND analysis_type = ?2",
            params![&key.ticker, key.analysis_type.as_str()],
        )?;
        Ok(n > 0)
    }

    fn delete_ticker(&self, ticker: &str) -> NavResult<usize> {
        let n = self
            .conn()
            .execute("DELETE FROM penalty_cache WHERE ticker = ?1", params![ticker])?;
        Ok(n)
    }
}
