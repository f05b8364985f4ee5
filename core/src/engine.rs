//! The Monte Carlo engine: regime-switching NAV erosion simulation.
//!
//! STEP ORDER (fixed, per simulated month, for every path):
//!   1. Regime transition  (categorical draw on the current row)
//!   2. Underlying return  (normal draw from the active regime)
//!   3. Covered-call cap   (upside above strike_otm_pct / 12 forfeited)
//!   4. Premium income     (scaled by the active regime's volatility)
//!   5. NAV update         (capped return + premium − expense, then the
//!                          distribution leaves NAV as cash)
//!
//! RULES:
//!   - Paths are processed as struct-of-arrays chunks; each pass over a
//!     chunk is a tight loop over contiguous buffers.
//!   - Each chunk owns its RNG stream, so results do not depend on how
//!     rayon schedules chunks.
//!   - Parameters arrive fully formed; nothing here reads ambient config
//!     about a ticker.

use crate::{
    clock::Clock,
    collector::SimulationParameters,
    config::SimulationConfig,
    error::{NavError, NavResult},
    regime::{cumulative, REGIME_COUNT},
    rng::{self, PathRng},
    stats,
    types::{AnalysisType, Ticker},
};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const LOSS_5PCT: f64 = -0.05;
pub const LOSS_10PCT: f64 = -0.10;

/// Erosion percentiles at 5 / 25 / 50 / 75 / 95.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PercentileReturns {
    pub p5:  f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl PercentileReturns {
    pub const LEVELS: [f64; 5] = [0.05, 0.25, 0.50, 0.75, 0.95];

    fn from_sorted(sorted: &[f64]) -> Self {
        let [p5, p25, p50, p75, p95] = Self::LEVELS.map(|q| stats::quantile_sorted(sorted, q));
        Self { p5, p25, p50, p75, p95 }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.p5, self.p25, self.p50, self.p75, self.p95]
    }

    pub fn is_monotone(&self) -> bool {
        self.as_array().windows(2).all(|w| w[0] <= w[1])
    }
}

/// Output of one engine run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationResult {
    pub result_id:                 Uuid,
    pub ticker:                    Ticker,
    pub analysis_type:             AnalysisType,
    pub n_paths:                   usize,
    pub prob_loss_gt_5pct:         f64,
    pub prob_loss_gt_10pct:        f64,
    pub percentile_returns:        PercentileReturns,
    pub median_annualized_erosion: f64,
    pub mean_erosion:              f64,
    pub seed:                      u64,
    pub reduced_window:            bool,
    pub generated_at:              DateTime<Utc>,
}

/// The simulation seam. The service depends on this, not on the engine,
/// so runs can be counted, delayed or stubbed.
pub trait Simulator: Send + Sync {
    fn simulate(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        cancel:        &AtomicBool,
    ) -> NavResult<SimulationResult>;
}

pub struct MonteCarloEngine {
    config:   SimulationConfig,
    coupling: f64,
    clock:    Arc<dyn Clock>,
}

/// Per-regime lookup tables shared by every chunk of a run.
struct StepTables {
    initial:                 [f64; REGIME_COUNT],
    transition:              [[f64; REGIME_COUNT]; REGIME_COUNT],
    mean:                    [f64; REGIME_COUNT],
    vol:                     [f64; REGIME_COUNT],
    premium:                 [f64; REGIME_COUNT],
    cap:                     f64,
    expense:                 f64,
    distribution_multiplier: f64,
}

impl StepTables {
    fn build(params: &SimulationParameters, coupling: f64) -> Self {
        let defs = &params.regime_definitions;
        let mean = defs.map(|d| d.mean_monthly_return);
        let vol = defs.map(|d| d.monthly_volatility);

        let base_premium = (params.annualized_premium_yield / 12.0).exp_m1().max(0.0);
        let overall_vol = params.annualized_volatility / 12f64.sqrt();
        let premium = vol.map(|v| {
            if overall_vol > 0.0 {
                base_premium * (1.0 + coupling * (v / overall_vol - 1.0)).max(0.0)
            } else {
                base_premium
            }
        });

        Self {
            initial: cumulative(&params.regime_transition_matrix.stationary()),
            transition: params.regime_transition_matrix.cumulative(),
            mean,
            vol,
            premium,
            cap: params.strike_otm_pct / 12.0,
            expense: params.expense_ratio_annual / 12.0,
            distribution_multiplier: 1.0 / (1.0 - params.roc_fraction.clamp(0.0, 0.95)),
        }
    }

    /// All regimes identical and noiseless: every path is the same path.
    fn is_deterministic(&self) -> bool {
        let same = |xs: &[f64; REGIME_COUNT]| xs.iter().all(|x| (x - xs[0]).abs() < 1e-15);
        self.vol.iter().all(|v| *v == 0.0) && same(&self.mean) && same(&self.premium)
    }

    /// Advance one path by one month. Returns the distribution paid.
    #[inline]
    fn step(&self, nav: &mut f64, regime: usize, underlying: f64) -> f64 {
        let capped = underlying.min(self.cap).max(-1.0);
        let start = *nav;
        let grown = (start * (1.0 + capped + self.premium[regime]) - self.expense * start).max(0.0);
        let distribution = (self.premium[regime] * self.distribution_multiplier * start).min(grown);
        *nav = grown - distribution;
        distribution
    }
}

impl MonteCarloEngine {
    pub fn new(config: SimulationConfig, premium_vol_coupling: f64, clock: Arc<dyn Clock>) -> Self {
        Self { config, coupling: premium_vol_coupling, clock }
    }

    pub fn simulate(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
    ) -> NavResult<SimulationResult> {
        self.simulate_with_cancel(params, analysis_type, &AtomicBool::new(false))
    }

    pub fn simulate_with_cancel(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        cancel:        &AtomicBool,
    ) -> NavResult<SimulationResult> {
        validate(params)?;
        let started = Instant::now();
        let n_paths = self.config.paths_for(analysis_type);
        let horizon = self.config.horizon_months;
        let seed = rng::run_seed(self.config.master_seed, &params.ticker, analysis_type);
        let tables = StepTables::build(params, self.coupling);

        let mut erosion = if tables.is_deterministic() {
            let mut nav = 1.0;
            let mut paid = 0.0;
            for _ in 0..horizon {
                paid += tables.step(&mut nav, 0, tables.mean[0]);
            }
            vec![nav + paid - 1.0; n_paths]
        } else {
            let chunk = self.config.chunk_size.max(1);
            let n_chunks = n_paths.div_ceil(chunk);
            let chunks = (0..n_chunks)
                .into_par_iter()
                .map(|c| {
                    let len = chunk.min(n_paths - c * chunk);
                    run_chunk(&tables, seed, c as u64, len, horizon, cancel)
                })
                .collect::<NavResult<Vec<Vec<f64>>>>()?;
            chunks.concat()
        };

        erosion.sort_by(|a, b| a.total_cmp(b));
        let n = erosion.len().max(1) as f64;
        let prob_loss_gt_5pct = erosion.iter().filter(|e| **e < LOSS_5PCT).count() as f64 / n;
        let prob_loss_gt_10pct = erosion.iter().filter(|e| **e < LOSS_10PCT).count() as f64 / n;
        let percentile_returns = PercentileReturns::from_sorted(&erosion);
        let median_annualized_erosion =
            (1.0 + percentile_returns.p50).max(0.0).powf(12.0 / horizon as f64) - 1.0;

        log::debug!(
            "{} {analysis_type}: {n_paths} paths in {}ms p(<-5%)={prob_loss_gt_5pct:.3} p50={:+.4}",
            params.ticker,
            started.elapsed().as_millis(),
            percentile_returns.p50
        );

        Ok(SimulationResult {
            result_id: Uuid::new_v4(),
            ticker: params.ticker.clone(),
            analysis_type,
            n_paths,
            prob_loss_gt_5pct,
            prob_loss_gt_10pct,
            percentile_returns,
            median_annualized_erosion,
            mean_erosion: stats::mean(&erosion),
            seed,
            reduced_window: params.reduced_window,
            generated_at: self.clock.now(),
        })
    }
}

impl Simulator for MonteCarloEngine {
    fn simulate(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
        cancel:        &AtomicBool,
    ) -> NavResult<SimulationResult> {
        self.simulate_with_cancel(params, analysis_type, cancel)
    }
}

/// Simulate `len` paths with their own RNG stream. Returns each path's
/// total-return-adjusted erosion.
fn run_chunk(
    tables:      &StepTables,
    seed:        u64,
    chunk_index: u64,
    len:         usize,
    horizon:     usize,
    cancel:      &AtomicBool,
) -> NavResult<Vec<f64>> {
    let mut rng = PathRng::new(seed, chunk_index);
    let mut regime: Vec<u8> = (0..len).map(|_| rng.categorical(&tables.initial) as u8).collect();
    let mut nav = vec![1.0f64; len];
    let mut paid = vec![0.0f64; len];
    let mut underlying = vec![0.0f64; len];

    for _ in 0..horizon {
        if cancel.load(Ordering::Relaxed) {
            return Err(NavError::Cancelled);
        }
        for r in regime.iter_mut() {
            *r = rng.categorical(&tables.transition[*r as usize]) as u8;
        }
        for (u, r) in underlying.iter_mut().zip(regime.iter()) {
            let r = *r as usize;
            *u = tables.mean[r] + tables.vol[r] * rng.standard_normal();
        }
        for i in 0..len {
            paid[i] += tables.step(&mut nav[i], regime[i] as usize, underlying[i]);
        }
    }

    Ok(nav.iter().zip(paid.iter()).map(|(n, p)| n + p - 1.0).collect())
}

fn validate(params: &SimulationParameters) -> NavResult<()> {
    let fail = |reason: &str| {
        Err(NavError::InvalidParameters {
            ticker: params.ticker.clone(),
            reason: reason.to_string(),
        })
    };
    let scalars = [
        params.annualized_premium_yield,
        params.annualized_volatility,
        params.strike_otm_pct,
        params.expense_ratio_annual,
        params.roc_fraction,
    ];
    if scalars.iter().any(|x| !x.is_finite()) {
        return fail("non-finite scalar parameter");
    }
    if params.annualized_volatility < 0.0 {
        return fail("negative volatility");
    }
    for def in &params.regime_definitions {
        if !def.mean_monthly_return.is_finite()
            || !def.monthly_volatility.is_finite()
            || def.monthly_volatility < 0.0
        {
            return fail("invalid regime definition");
        }
    }
    Ok(())
}
