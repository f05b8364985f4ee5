//! Shared primitive types used across the entire engine.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange ticker of a distribution-paying security.
pub type Ticker = String;

/// Number of fields a fully populated monthly record carries.
pub const FIELDS_PER_MONTH: usize = 4;

/// Simulation depth. Each variant maps to a path count in `SimulationConfig`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Quick,
    Deep,
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 2] = [AnalysisType::Quick, AnalysisType::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep  => "deep",
        }
    }

    /// Stable RNG slot. NEVER renumber: it changes every seeded result.
    pub fn slot(&self) -> u64 {
        match self {
            Self::Quick => 1,
            Self::Deep  => 2,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quick" => Some(Self::Quick),
            "deep"  => Some(Self::Deep),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Graduated risk tier, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Minimal,
    Low,
    Moderate,
    High,
    Severe,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal  => "minimal",
            Self::Low      => "low",
            Self::Moderate => "moderate",
            Self::High     => "high",
            Self::Severe   => "severe",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    CoveredCallEtf,
    ClosedEndFund,
    Etf,
    Equity,
    Other,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CoveredCallEtf => "covered_call_etf",
            Self::ClosedEndFund  => "closed_end_fund",
            Self::Etf            => "etf",
            Self::Equity         => "equity",
            Self::Other          => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "covered_call_etf" => Self::CoveredCallEtf,
            "closed_end_fund"  => Self::ClosedEndFund,
            "etf"              => Self::Etf,
            "equity"           => Self::Equity,
            _ => Self::Other,
        }
    }
}

/// Asset-profile flags supplied by the market-data collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssetProfile {
    pub kind: AssetKind,
    /// True when the instrument writes options against its holdings and
    /// so forfeits upside beyond a strike.
    pub distribution_capping: bool,
}

/// Static per-ticker metadata. Never derived from history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TickerMetadata {
    pub ticker:               Ticker,
    /// Annualized out-of-the-money distance of the written strike, as a fraction.
    pub strike_otm_pct:       f64,
    pub expense_ratio_annual: f64,
    pub profile:              AssetProfile,
}

/// One security, one calendar month. Immutable once collected.
///
/// Every numeric field may be missing in the source feed; completeness
/// scoring counts how many are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalRecord {
    pub ticker:                      Ticker,
    /// First day of the calendar month.
    pub month:                       NaiveDate,
    pub nav_close:                   Option<f64>,
    pub distribution_amount:         Option<f64>,
    pub roc_fraction:                Option<f64>,
    pub underlying_benchmark_return: Option<f64>,
}

impl HistoricalRecord {
    pub fn fields_present(&self) -> usize {
        [
            self.nav_close.is_some(),
            self.distribution_amount.is_some(),
            self.roc_fraction.is_some(),
            self.underlying_benchmark_return.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// A record the calibrator can use: NAV and benchmark return are both known.
    pub fn is_usable(&self) -> bool {
        self.nav_close.is_some() && self.underlying_benchmark_return.is_some()
    }
}

/// Months elapsed since year 0. Used to do calendar arithmetic on month keys.
pub fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

/// Inverse of `month_index`, normalised to the first of the month.
pub fn month_from_index(index: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(index.div_euclid(12), index.rem_euclid(12) as u32 + 1, 1)
}
