//! Historical Data Collector: raw monthly records in, calibrated
//! simulation parameters and a data-quality verdict out.
//!
//! Pipeline for one ticker:
//!   1. Metadata: skip instruments that do not cap distributions.
//!   2. Window:   latest `lookback` months, or the latest 6 usable
//!                months when history is shorter than the lookback.
//!                A gap inside them widens the fallback window.
//!   3. Quality:  usable-month floor, then completeness threshold.
//!   4. Calibrate: yields, volatility, regime labels, transitions,
//!                all from the security's own NAV total return.
//!
//! Every attempt is reported to the source as a DataCollectionLog.

use crate::{
    clock::Clock,
    config::{CalibrationConfig, CollectorConfig},
    error::{NavError, NavResult},
    market_data::MarketDataSource,
    regime::{self, RegimeDefinition, TransitionMatrix, REGIME_COUNT},
    stats,
    types::{
        month_from_index, month_index, AssetProfile, HistoricalRecord, Ticker, TickerMetadata,
        FIELDS_PER_MONTH,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Calibrated inputs for one simulation run. Replaced wholesale on
/// recalibration, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationParameters {
    pub ticker:                   Ticker,
    pub annualized_premium_yield: f64,
    pub annualized_volatility:    f64,
    pub strike_otm_pct:           f64,
    pub expense_ratio_annual:     f64,
    /// Average share of each distribution that is return of capital.
    pub roc_fraction:             f64,
    pub regime_definitions:       [RegimeDefinition; REGIME_COUNT],
    pub regime_transition_matrix: TransitionMatrix,
    pub history_window_months:    u32,
    pub reduced_window:           bool,
    pub derived_at:               DateTime<Utc>,
}

/// Records inside the analysis window for one ticker.
#[derive(Debug, Clone)]
pub struct Collection {
    pub ticker:         Ticker,
    /// Every record in the window, usable or not, oldest first.
    pub records:        Vec<HistoricalRecord>,
    pub window_start:   NaiveDate,
    pub window_months:  u32,
    pub reduced_window: bool,
    pub usable_months:  usize,
    pub missing_months: Vec<NaiveDate>,
}

impl Collection {
    pub fn usable_records(&self) -> Vec<HistoricalRecord> {
        self.records.iter().filter(|r| r.is_usable()).cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectionOutcome {
    Collected,
    ReducedWindow,
    InsufficientHistory,
    LowCompleteness,
}

impl CollectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collected           => "collected",
            Self::ReducedWindow       => "reduced_window",
            Self::InsufficientHistory => "insufficient_history",
            Self::LowCompleteness     => "low_completeness",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collected"            => Some(Self::Collected),
            "reduced_window"       => Some(Self::ReducedWindow),
            "insufficient_history" => Some(Self::InsufficientHistory),
            "low_completeness"     => Some(Self::LowCompleteness),
            _ => None,
        }
    }
}

/// Audit record per collection attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataCollectionLog {
    pub ticker:             Ticker,
    pub attempted_at:       DateTime<Utc>,
    pub completeness_score: f64,
    pub missing_months:     u32,
    pub outcome:            CollectionOutcome,
}

/// Why a ticker was not scored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientHistory,
    LowCompleteness,
    NotApplicable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientHistory => "insufficient_history",
            Self::LowCompleteness     => "low_completeness",
            Self::NotApplicable       => "not_applicable",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Result of `HistoricalDataCollector::collect`.
#[derive(Debug, Clone)]
pub enum CollectionVerdict {
    Ready {
        collection:   Collection,
        completeness: f64,
        metadata:     TickerMetadata,
    },
    Skip(SkipReason),
}

/// `100 × fields_present / fields_expected`, four fields per expected month.
pub fn completeness(records: &[HistoricalRecord], expected_months: u32) -> f64 {
    if expected_months == 0 {
        return 0.0;
    }
    let expected = expected_months as usize * FIELDS_PER_MONTH;
    let present: usize = records.iter().map(HistoricalRecord::fields_present).sum();
    (100.0 * present as f64 / expected as f64).min(100.0)
}

pub struct HistoricalDataCollector {
    source:      Arc<dyn MarketDataSource>,
    clock:       Arc<dyn Clock>,
    config:      CollectorConfig,
    calibration: CalibrationConfig,
}

impl HistoricalDataCollector {
    pub fn new(
        source:      Arc<dyn MarketDataSource>,
        clock:       Arc<dyn Clock>,
        config:      CollectorConfig,
        calibration: CalibrationConfig,
    ) -> Self {
        Self { source, clock, config, calibration }
    }

    /// Records for the analysis window, failing with `DataUnavailable`
    /// when fewer than `min_months` usable months exist in it.
    pub fn fetch(&self, ticker: &str, lookback_months: u32) -> NavResult<Collection> {
        let collection = self.window(ticker, lookback_months)?;
        if collection.usable_months < self.config.min_months as usize {
            return Err(NavError::DataUnavailable {
                ticker:        ticker.to_string(),
                usable_months: collection.usable_months,
            });
        }
        Ok(collection)
    }

    /// Calibrate parameters from usable records plus the ticker's static
    /// metadata.
    pub fn derive_parameters(&self, records: &[HistoricalRecord]) -> NavResult<SimulationParameters> {
        let ticker = records.first().map(|r| r.ticker.clone()).ok_or(NavError::NoRecords)?;
        let metadata = self.source.metadata(&ticker)?;
        let window = window_span(records);
        calibrate(records, &metadata, &self.calibration, window, false, self.clock.now())
    }

    /// True only for distribution-capping instruments with reliable data.
    pub fn should_analyze(&self, ticker: &str, profile: &AssetProfile, completeness: f64) -> bool {
        let ok = profile.distribution_capping && completeness >= self.config.completeness_threshold;
        if !ok {
            log::debug!(
                "{ticker}: not analyzable (capping={} completeness={completeness:.1})",
                profile.distribution_capping
            );
        }
        ok
    }

    /// Full collection step: metadata, window, quality gates, audit log.
    pub fn collect(&self, ticker: &str) -> NavResult<CollectionVerdict> {
        let metadata = self.source.metadata(ticker)?;
        if !metadata.profile.distribution_capping {
            log::debug!("{ticker}: {} does not cap distributions", metadata.profile.kind.as_str());
            return Ok(CollectionVerdict::Skip(SkipReason::NotApplicable));
        }

        let collection = match self.window(ticker, self.config.lookback_months) {
            Ok(collection) => collection,
            Err(NavError::DataUnavailable { .. }) => {
                self.audit(ticker, 0.0, self.config.lookback_months, CollectionOutcome::InsufficientHistory);
                log::warn!("{ticker}: no history");
                return Ok(CollectionVerdict::Skip(SkipReason::InsufficientHistory));
            }
            Err(e) => return Err(e),
        };
        let missing = collection.missing_months.len() as u32;
        let score = completeness(&collection.records, collection.window_months);

        if collection.usable_months < self.config.min_months as usize {
            self.audit(ticker, score, missing, CollectionOutcome::InsufficientHistory);
            log::warn!(
                "{ticker}: {} usable months, need {}",
                collection.usable_months, self.config.min_months
            );
            return Ok(CollectionVerdict::Skip(SkipReason::InsufficientHistory));
        }
        if !self.should_analyze(ticker, &metadata.profile, score) {
            self.audit(ticker, score, missing, CollectionOutcome::LowCompleteness);
            log::warn!("{ticker}: completeness {score:.1} below threshold");
            return Ok(CollectionVerdict::Skip(SkipReason::LowCompleteness));
        }

        let outcome = if collection.reduced_window {
            CollectionOutcome::ReducedWindow
        } else {
            CollectionOutcome::Collected
        };
        self.audit(ticker, score, missing, outcome);

        Ok(CollectionVerdict::Ready { collection, completeness: score, metadata })
    }

    /// Parameters for a collection that passed `collect`.
    pub fn parameters_for(
        &self,
        collection: &Collection,
        metadata:   &TickerMetadata,
    ) -> NavResult<SimulationParameters> {
        calibrate(
            &collection.usable_records(),
            metadata,
            &self.calibration,
            collection.window_months,
            collection.reduced_window,
            self.clock.now(),
        )
    }

    fn window(&self, ticker: &str, lookback_months: u32) -> NavResult<Collection> {
        let mut records: Vec<HistoricalRecord> = self
            .source
            .records(ticker)?
            .into_iter()
            .filter(|r| r.ticker == ticker)
            .collect();
        records.sort_by_key(|r| r.month);
        records.dedup_by_key(|r| month_index(r.month));

        let (Some(first_month), Some(last_month)) =
            (records.first().map(|r| r.month), records.last().map(|r| r.month))
        else {
            return Err(NavError::DataUnavailable { ticker: ticker.to_string(), usable_months: 0 });
        };

        let latest = month_index(last_month);
        let span = latest - month_index(first_month) + 1;
        let min_months = self.config.min_months.max(1);
        let lookback = lookback_months.max(min_months);
        let usable_all: Vec<i32> = records
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| month_index(r.month))
            .collect();

        let (start, reduced_window) = if span >= lookback as i32 {
            (latest - lookback as i32 + 1, false)
        } else if usable_all.len() >= min_months as usize {
            (usable_all[usable_all.len() - min_months as usize], true)
        } else {
            (latest - min_months as i32 + 1, true)
        };
        let window_months = (latest - start + 1) as u32;

        records.retain(|r| month_index(r.month) >= start);
        let usable: Vec<i32> = records
            .iter()
            .filter(|r| r.is_usable())
            .map(|r| month_index(r.month))
            .collect();
        let missing_months = (start..=latest)
            .filter(|m| !usable.contains(m))
            .filter_map(month_from_index)
            .collect();

        if reduced_window {
            log::debug!("{ticker}: history spans {span} months, using {window_months}-month window");
        }

        Ok(Collection {
            ticker: ticker.to_string(),
            window_start: month_from_index(start).unwrap_or(last_month),
            usable_months: usable.len(),
            records,
            window_months,
            reduced_window,
            missing_months,
        })
    }

    fn audit(&self, ticker: &str, score: f64, missing_months: u32, outcome: CollectionOutcome) {
        let entry = DataCollectionLog {
            ticker:             ticker.to_string(),
            attempted_at:       self.clock.now(),
            completeness_score: score,
            missing_months,
            outcome,
        };
        if let Err(e) = self.source.log_collection(&entry) {
            log::warn!("{ticker}: failed to record collection log: {e}");
        }
    }
}

fn window_span(records: &[HistoricalRecord]) -> u32 {
    let months = records.iter().map(|r| month_index(r.month));
    match (months.clone().min(), months.max()) {
        (Some(lo), Some(hi)) => (hi - lo + 1) as u32,
        _ => 0,
    }
}

/// Pure calibration from usable records.
///
/// Yield and volatility come from monthly log-returns, annualized by
/// ×12 and ×√12. Regime statistics use simple returns because the
/// engine samples simple returns.
///
/// The return series is the underlying return implied by the security's
/// NAV total return: `(nav + distribution) / prior_nav − 1`, less the
/// premium share of the distribution, plus the monthly expense. Fed back
/// through the engine's step it reproduces the observed total return, so
/// a NAV that bleeds while its benchmark is flat calibrates as a falling
/// regime. Months without the prior calendar month's NAV fall back to
/// the benchmark return.
pub fn calibrate(
    records:       &[HistoricalRecord],
    metadata:      &TickerMetadata,
    calibration:   &CalibrationConfig,
    window_months: u32,
    reduced:       bool,
    derived_at:    DateTime<Utc>,
) -> NavResult<SimulationParameters> {
    let mut usable: Vec<&HistoricalRecord> = records.iter().filter(|r| r.is_usable()).collect();
    usable.sort_by_key(|r| r.month);
    if usable.len() < 2 {
        return Err(NavError::DataUnavailable {
            ticker:        metadata.ticker.clone(),
            usable_months: usable.len(),
        });
    }

    let expense_monthly = metadata.expense_ratio_annual / 12.0;
    let returns: Vec<f64> = usable
        .iter()
        .enumerate()
        .map(|(i, record)| {
            let prior_nav = i
                .checked_sub(1)
                .map(|j| usable[j])
                .filter(|prior| month_index(prior.month) + 1 == month_index(record.month))
                .and_then(|prior| prior.nav_close)
                .filter(|nav| *nav > 0.0);
            let implied = match (prior_nav, record.nav_close) {
                (Some(prior), Some(nav)) => {
                    let distribution = record.distribution_amount.unwrap_or(0.0).max(0.0);
                    let roc = record.roc_fraction.unwrap_or(0.0).clamp(0.0, 0.95);
                    let total_return = (nav + distribution) / prior - 1.0;
                    total_return - distribution * (1.0 - roc) / prior + expense_monthly
                }
                _ => record.underlying_benchmark_return.unwrap_or(0.0),
            };
            implied.max(-0.999)
        })
        .collect();
    let log_returns: Vec<f64> = returns.iter().map(|r| r.ln_1p()).collect();
    let annualized_volatility = stats::std_dev(&log_returns) * 12f64.sqrt();

    let mut premium_log_yields = Vec::with_capacity(usable.len());
    let mut roc_shares = Vec::new();
    for record in &usable {
        let nav = record.nav_close.unwrap_or(0.0);
        let distribution = record.distribution_amount.unwrap_or(0.0).max(0.0);
        let roc = record.roc_fraction.unwrap_or(0.0).clamp(0.0, 0.95);
        if nav > 0.0 {
            premium_log_yields.push((distribution * (1.0 - roc) / nav).ln_1p());
        }
        if distribution > 0.0 {
            roc_shares.push(roc);
        }
    }
    let annualized_premium_yield = stats::mean(&premium_log_yields) * 12.0;
    let roc_fraction = stats::mean(&roc_shares).clamp(0.0, 0.95);

    let labels = regime::classify_months(&returns, calibration);
    let regime_definitions = regime::calibrate_regimes(&returns, &labels);
    let regime_transition_matrix = TransitionMatrix::from_labels(&labels);

    log::debug!(
        "{}: calibrated yield={annualized_premium_yield:.4} vol={annualized_volatility:.4} \
         roc={roc_fraction:.2} months={}",
        metadata.ticker,
        usable.len()
    );

    Ok(SimulationParameters {
        ticker: metadata.ticker.clone(),
        annualized_premium_yield,
        annualized_volatility,
        strike_otm_pct: metadata.strike_otm_pct,
        expense_ratio_annual: metadata.expense_ratio_annual,
        roc_fraction,
        regime_definitions,
        regime_transition_matrix,
        history_window_months: window_months,
        reduced_window: reduced,
        derived_at,
    })
}
