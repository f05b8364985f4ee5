//! Market Data collaborator boundary.
//!
//! RULE: The engine never owns price history. It reads records and
//! static metadata through `MarketDataSource` and hands collection
//! audit entries back through the same seam.

use crate::{
    collector::DataCollectionLog,
    error::{NavError, NavResult},
    types::{HistoricalRecord, Ticker, TickerMetadata},
};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

pub trait MarketDataSource: Send + Sync {
    /// All known monthly records for the ticker, any order.
    fn records(&self, ticker: &str) -> NavResult<Vec<HistoricalRecord>>;

    fn metadata(&self, ticker: &str) -> NavResult<TickerMetadata>;

    /// Persist one collection attempt. Sources without an audit table
    /// just log it.
    fn log_collection(&self, entry: &DataCollectionLog) -> NavResult<()> {
        log::debug!(
            "collection ticker={} outcome={} completeness={:.1} missing={}",
            entry.ticker,
            entry.outcome.as_str(),
            entry.completeness_score,
            entry.missing_months
        );
        Ok(())
    }
}

/// In-process market data. Backs tests and JSON imports.
#[derive(Default)]
pub struct InMemoryMarketData {
    records:  RwLock<HashMap<Ticker, Vec<HistoricalRecord>>>,
    metadata: RwLock<HashMap<Ticker, TickerMetadata>>,
    logs:     Mutex<Vec<DataCollectionLog>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append records. A record for an already-present month replaces it.
    pub fn insert_records(&self, records: impl IntoIterator<Item = HistoricalRecord>) {
        let mut table = self.records.write().unwrap_or_else(|e| e.into_inner());
        for record in records {
            let rows = table.entry(record.ticker.clone()).or_default();
            rows.retain(|r| r.month != record.month);
            rows.push(record);
        }
    }

    pub fn set_metadata(&self, metadata: TickerMetadata) {
        self.metadata
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(metadata.ticker.clone(), metadata);
    }

    pub fn collection_logs(&self) -> Vec<DataCollectionLog> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl MarketDataSource for InMemoryMarketData {
    fn records(&self, ticker: &str) -> NavResult<Vec<HistoricalRecord>> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(ticker)
            .cloned()
            .unwrap_or_default())
    }

    fn metadata(&self, ticker: &str) -> NavResult<TickerMetadata> {
        self.metadata
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(ticker)
            .cloned()
            .ok_or_else(|| NavError::UnknownTicker { ticker: ticker.to_string() })
    }

    fn log_collection(&self, entry: &DataCollectionLog) -> NavResult<()> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner()).push(entry.clone());
        Ok(())
    }
}
