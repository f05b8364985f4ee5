use crate::{collector::SkipReason, types::AnalysisType};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NavError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Insufficient history for '{ticker}': {usable_months} usable months")]
    DataUnavailable { ticker: String, usable_months: usize },

    #[error("No records to calibrate from")]
    NoRecords,

    #[error("'{ticker}' was not analyzed: {reason}")]
    Skipped { ticker: String, reason: SkipReason },

    #[error("Simulation for '{ticker}' ({analysis_type}) exceeded {timeout_ms}ms")]
    ComputationTimeout {
        ticker:        String,
        analysis_type: AnalysisType,
        timeout_ms:    u64,
    },

    #[error("Batch of {size} tickers exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Ticker '{ticker}' not found")]
    UnknownTicker { ticker: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid simulation parameters for '{ticker}': {reason}")]
    InvalidParameters { ticker: String, reason: String },

    #[error("Simulation cancelled")]
    Cancelled,

    #[error("Computation for '{key}' failed: {reason}")]
    ComputationFailed { key: String, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type NavResult<T> = Result<T, NavError>;
