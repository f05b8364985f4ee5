//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use nav_erosion_core::{
    cache::{CacheStore, MemoryCacheStore},
    clock::{Clock, ManualClock},
    collector::SimulationParameters,
    config::EngineConfig,
    engine::{MonteCarloEngine, SimulationResult, Simulator},
    error::{NavError, NavResult},
    market_data::InMemoryMarketData,
    regime::{Regime, RegimeDefinition, TransitionMatrix},
    service::SustainabilityService,
    types::{month_from_index, month_index, AnalysisType, AssetKind, AssetProfile, HistoricalRecord, TickerMetadata},
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// Last month of every fixture history.
pub fn last_month() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 12, 1).unwrap()
}

pub fn covered_call(ticker: &str) -> TickerMetadata {
    TickerMetadata {
        ticker:               ticker.to_string(),
        strike_otm_pct:       0.05,
        expense_ratio_annual: 0.0035,
        profile: AssetProfile { kind: AssetKind::CoveredCallEtf, distribution_capping: true },
    }
}

pub fn plain_equity(ticker: &str) -> TickerMetadata {
    TickerMetadata {
        ticker:               ticker.to_string(),
        strike_otm_pct:       0.0,
        expense_ratio_annual: 0.0,
        profile: AssetProfile { kind: AssetKind::Equity, distribution_capping: false },
    }
}

/// `months` complete records ending at `last_month()`: flat NAV, a
/// steady 0.5% monthly distribution and a benchmark oscillating ±0.1%.
pub fn stable_history(ticker: &str, months: u32) -> Vec<HistoricalRecord> {
    let end = month_index(last_month());
    (0..months as i32)
        .map(|i| {
            let idx = end - months as i32 + 1 + i;
            HistoricalRecord {
                ticker:                      ticker.to_string(),
                month:                       month_from_index(idx).unwrap(),
                nav_close:                   Some(20.0),
                distribution_amount:         Some(0.10),
                roc_fraction:                Some(0.10),
                underlying_benchmark_return: Some(if i % 2 == 0 { 0.001 } else { -0.001 }),
            }
        })
        .collect()
}

/// Complete records ending at `last_month()` where NAV falls by
/// `monthly_decline` every month while the benchmark oscillates ±0.1%.
pub fn declining_nav_history(ticker: &str, months: u32, monthly_decline: f64) -> Vec<HistoricalRecord> {
    stable_history(ticker, months)
        .into_iter()
        .enumerate()
        .map(|(i, mut r)| {
            r.nav_close = Some(20.0 * (1.0 - monthly_decline).powi(i as i32 + 1));
            r
        })
        .collect()
}

/// Twelve months dominated by falling and whipsawing benchmark months.
/// NAV tracks the benchmark and a 0.5% distribution is paid on the
/// prior NAV, 30% of it return of capital.
pub fn drawdown_history(ticker: &str) -> Vec<HistoricalRecord> {
    const BENCHMARK: [f64; 12] = [
        -0.04, -0.06, 0.08, -0.05, -0.03, 0.01, -0.07, -0.04, 0.09, -0.05, 0.005, -0.06,
    ];
    let end = month_index(last_month());
    let mut nav = 20.0;
    BENCHMARK
        .iter()
        .enumerate()
        .map(|(i, b)| {
            let prior = nav;
            nav = prior * (1.0 + b);
            HistoricalRecord {
                ticker:                      ticker.to_string(),
                month:                       month_from_index(end - 11 + i as i32).unwrap(),
                nav_close:                   Some(nav),
                distribution_amount:         Some(0.005 * prior),
                roc_fraction:                Some(0.30),
                underlying_benchmark_return: Some(*b),
            }
        })
        .collect()
}

/// Market holding a stable covered-call history per (ticker, months).
pub fn market_with(histories: &[(&str, u32)]) -> Arc<InMemoryMarketData> {
    let market = Arc::new(InMemoryMarketData::new());
    for (ticker, months) in histories {
        market.set_metadata(covered_call(ticker));
        market.insert_records(stable_history(ticker, *months));
    }
    market
}

pub fn engine(config: &EngineConfig) -> MonteCarloEngine {
    MonteCarloEngine::new(
        config.simulation.clone(),
        config.calibration.premium_vol_coupling,
        Arc::new(ManualClock::new(t0())),
    )
}

/// Wraps the real engine, counting runs and optionally delaying each.
pub struct CountingSimulator {
    inner: MonteCarloEngine,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingSimulator {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_delay(config, Duration::ZERO)
    }

    pub fn with_delay(config: &EngineConfig, delay: Duration) -> Self {
        Self { inner: engine(config), calls: AtomicUsize::new(0), delay }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Simulator for CountingSimulator {
    fn simulate(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        cancel:        &AtomicBool,
    ) -> NavResult<SimulationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.inner.simulate_with_cancel(params, analysis_type, cancel)
    }
}

/// Never finishes the listed analysis types; spins until cancelled.
pub struct StallingSimulator {
    inner:  MonteCarloEngine,
    stalls: Vec<AnalysisType>,
    calls:  AtomicUsize,
}

impl StallingSimulator {
    pub fn new(config: &EngineConfig, stalls: &[AnalysisType]) -> Self {
        Self { inner: engine(config), stalls: stalls.to_vec(), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Simulator for StallingSimulator {
    fn simulate(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        cancel:        &AtomicBool,
    ) -> NavResult<SimulationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalls.contains(&analysis_type) {
            while !cancel.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
            }
            return Err(NavError::Cancelled);
        }
        self.inner.simulate_with_cancel(params, analysis_type, cancel)
    }
}

pub struct Harness {
    pub service: SustainabilityService,
    pub market:  Arc<InMemoryMarketData>,
    pub store:   Arc<MemoryCacheStore>,
    pub clock:   Arc<ManualClock>,
}

pub fn harness(
    config:    EngineConfig,
    market:    Arc<InMemoryMarketData>,
    simulator: Arc<dyn Simulator>,
) -> Harness {
    init_logging();
    let store = Arc::new(MemoryCacheStore::new());
    let clock = Arc::new(ManualClock::new(t0()));
    let service = SustainabilityService::new(
        config,
        Arc::clone(&market) as _,
        Arc::clone(&store) as Arc<dyn CacheStore>,
        simulator,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .expect("service");
    Harness { service, market, store, clock }
}

pub fn regime(regime: Regime, mean: f64, vol: f64) -> RegimeDefinition {
    RegimeDefinition {
        regime,
        mean_monthly_return: mean,
        monthly_volatility: vol,
        observed_months: 6,
    }
}

/// Hand-built parameters with every transition row equal to `mix`, so
/// the stationary regime mix is `mix` itself.
pub fn synthetic_params(
    ticker:      &str,
    definitions: [RegimeDefinition; 4],
    mix:         [f64; 4],
) -> SimulationParameters {
    SimulationParameters {
        ticker:                   ticker.to_string(),
        annualized_premium_yield: 0.08,
        annualized_volatility:    0.05 * 12f64.sqrt(),
        strike_otm_pct:           0.10,
        expense_ratio_annual:     0.0065,
        roc_fraction:             0.30,
        regime_definitions:       definitions,
        regime_transition_matrix: TransitionMatrix::new([mix; 4]),
        history_window_months:    12,
        reduced_window:           false,
        derived_at:               t0(),
    }
}
