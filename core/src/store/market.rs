//! Market data, ticker metadata and collection log queries.

use super::{month_from_sql, month_to_sql, time_from_sql, time_to_sql, NavStore};
use crate::{
    collector::{CollectionOutcome, DataCollectionLog},
    error::{NavError, NavResult},
    market_data::MarketDataSource,
    types::{AssetKind, AssetProfile, HistoricalRecord, TickerMetadata},
};
use rusqlite::{params, types::Type, OptionalExtension};

impl NavStore {
    // ── Historical records ─────────────────────────────────────────

    /// Insert or replace one month of history.
    pub fn upsert_record(&self, r: &HistoricalRecord) -> NavResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO historical_record (
                ticker, month, nav_close, distribution_amount, roc_fraction,
                underlying_benchmark_return
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &r.ticker,
                month_to_sql(r.month),
                r.nav_close,
                r.distribution_amount,
                r.roc_fraction,
                r.underlying_benchmark_return,
            ],
        )?;
        Ok(())
    }

    /// Bulk import inside one transaction. Returns rows written.
    pub fn import_records(&self, records: &[HistoricalRecord]) -> NavResult<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO historical_record (
                    ticker, month, nav_close, distribution_amount, roc_fraction,
                    underlying_benchmark_return
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for r in records {
                stmt.execute(params![
                    &r.ticker,
                    month_to_sql(r.month),
                    r.nav_close,
                    r.distribution_amount,
                    r.roc_fraction,
                    r.underlying_benchmark_return,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    pub fn list_records(&self, ticker: &str) -> NavResult<Vec<HistoricalRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ticker, month, nav_close, distribution_amount, roc_fraction,
                    underlying_benchmark_return
             FROM historical_record WHERE ticker = ?1
             ORDER BY month ASC",
        )?;
        let rows = stmt.query_map(params![ticker], |row| {
            Ok(HistoricalRecord {
                ticker: row.get(0)?,
                month: month_from_sql(1, row.get(1)?)?,
                nav_close: row.get(2)?,
                distribution_amount: row.get(3)?,
                roc_fraction: row.get(4)?,
                underlying_benchmark_return: row.get(5)?,
            })
        })?;
        let found = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }

    // ── Ticker metadata ────────────────────────────────────────────

    pub fn upsert_metadata(&self, m: &TickerMetadata) -> NavResult<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO ticker_metadata (
                ticker, strike_otm_pct, expense_ratio_annual, asset_kind, distribution_capping
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &m.ticker,
                m.strike_otm_pct,
                m.expense_ratio_annual,
                m.profile.kind.as_str(),
                if m.profile.distribution_capping { 1 } else { 0 },
            ],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, ticker: &str) -> NavResult<Option<TickerMetadata>> {
        let found = self
            .conn()
            .query_row(
                "SELECT ticker, strike_otm_pct, expense_ratio_annual, asset_kind,
                        distribution_capping
                 FROM ticker_metadata WHERE ticker = ?1",
                params![ticker],
                |row| {
                    Ok(TickerMetadata {
                        ticker: row.get(0)?,
                        strike_otm_pct: row.get(1)?,
                        expense_ratio_annual: row.get(2)?,
                        profile: AssetProfile {
                            kind: AssetKind::parse(&row.get::<_, String>(3)?),
                            distribution_capping: row.get::<_, i32>(4)? != 0,
                        },
                    })
                },
            )
            .optional()?;
        Ok(found)
    }

    pub fn list_tickers(&self) -> NavResult<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT ticker FROM ticker_metadata ORDER BY ticker")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let found = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }

    // ── Collection log ─────────────────────────────────────────────

    pub fn append_collection_log(&self, entry: &DataCollectionLog) -> NavResult<()> {
        self.conn().execute(
            "INSERT INTO data_collection_log (
                ticker, attempted_at, completeness_score, missing_months, outcome
            ) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &entry.ticker,
                time_to_sql(entry.attempted_at),
                entry.completeness_score,
                entry.missing_months as i64,
                entry.outcome.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Collection attempts for the ticker, oldest first.
    pub fn collection_logs(&self, ticker: &str) -> NavResult<Vec<DataCollectionLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT ticker, attempted_at, completeness_score, missing_months, outcome
             FROM data_collection_log WHERE ticker = ?1
             ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![ticker], |row| {
            let outcome: String = row.get(4)?;
            Ok(DataCollectionLog {
                ticker: row.get(0)?,
                attempted_at: time_from_sql(1, row.get(1)?)?,
                completeness_score: row.get(2)?,
                missing_months: row.get::<_, i64>(3)? as u32,
                outcome: CollectionOutcome::parse(&outcome).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        4,
                        Type::Text,
                        format!("unknown collection outcome '{outcome}'").into(),
                    )
                })?,
            })
        })?;
        let found = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(found)
    }
}

impl MarketDataSource for NavStore {
    fn records(&self, ticker: &str) -> NavResult<Vec<HistoricalRecord>> {
        self.list_records(ticker)
    }

    fn metadata(&self, ticker: &str) -> NavResult<TickerMetadata> {
        self.get_metadata(ticker)?
            .ok_or_else(|| NavError::UnknownTicker { ticker: ticker.to_string() })
    }

    fn log_collection(&self, entry: &DataCollectionLog) -> NavResult<()> {
        self.append_collection_log(entry)
    }
}
