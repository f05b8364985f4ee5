//! Regime-switching Markov model: the four market regimes, their
//! return distributions, and the month-to-month transition matrix.
//!
//! Regimes are a fixed-size tagged enum indexed 0..4 so the simulation
//! loop works on plain lookup tables, never on trait objects.

use crate::{config::CalibrationConfig, stats};
use serde::{Deserialize, Serialize};

pub const REGIME_COUNT: usize = 4;

/// Stable regime slots. NEVER reorder: matrices are indexed by these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Regime {
    Bull     = 0,
    Bear     = 1,
    Sideways = 2,
    Volatile = 3,
}

impl Regime {
    pub const ALL: [Regime; REGIME_COUNT] =
        [Regime::Bull, Regime::Bear, Regime::Sideways, Regime::Volatile];

    pub fn index(self) -> usize {
        self as usize
    }

    /// (mean shift in σ units, volatility multiple) used when a regime
    /// was observed too rarely to estimate directly.
    fn fallback_shape(&self) -> (f64, f64) {
        match self {
            Self::Bull     => ( 0.5, 0.75),
            Self::Bear     => (-0.5, 1.25),
            Self::Sideways => ( 0.0, 0.50),
            Self::Volatile => ( 0.0, 2.00),
        }
    }
}

/// Return distribution of one regime, monthly units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegimeDefinition {
    pub regime:              Regime,
    pub mean_monthly_return: f64,
    pub monthly_volatility:  f64,
    pub observed_months:     u32,
}

// ── Transition matrix ──────────────────────────────────────────────

/// Row-stochastic 4×4 matrix. Row = current regime, column = next.
///
/// Every constructor sanitizes rows: a row that is all zero, negative
/// or non-finite is replaced with the uniform row, so sampling never
/// has to handle a degenerate row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[[f64; 4]; 4]", into = "[[f64; 4]; 4]")]
pub struct TransitionMatrix {
    rows: [[f64; REGIME_COUNT]; REGIME_COUNT],
}

const UNIFORM_ROW: [f64; REGIME_COUNT] = [1.0 / REGIME_COUNT as f64; REGIME_COUNT];

impl TransitionMatrix {
    pub fn new(rows: [[f64; REGIME_COUNT]; REGIME_COUNT]) -> Self {
        Self { rows: rows.map(normalize_row) }
    }

    pub fn uniform() -> Self {
        Self { rows: [UNIFORM_ROW; REGIME_COUNT] }
    }

    /// Empirical month-to-month transition frequencies of a label sequence.
    pub fn from_labels(labels: &[Regime]) -> Self {
        let mut counts = [[0.0; REGIME_COUNT]; REGIME_COUNT];
        for pair in labels.windows(2) {
            counts[pair[0].index()][pair[1].index()] += 1.0;
        }
        Self::new(counts)
    }

    /// Per-row cumulative sums, for categorical sampling.
    pub fn cumulative(&self) -> [[f64; REGIME_COUNT]; REGIME_COUNT] {
        self.rows.map(|row| cumulative(&row))
    }

    /// Stationary distribution π with π = πP.
    ///
    /// Power iteration on the lazy chain (P + I) / 2, which shares π with
    /// P but is aperiodic, so periodic chains still converge.
    pub fn stationary(&self) -> [f64; REGIME_COUNT] {
        let mut pi = UNIFORM_ROW;
        for _ in 0..10_000 {
            let mut next = [0.0; REGIME_COUNT];
            for (from, weight) in pi.iter().enumerate() {
                for (to, p) in self.rows[from].iter().enumerate() {
                    next[to] += 0.5 * weight * p;
                }
                next[from] += 0.5 * weight;
            }
            let delta: f64 = next.iter().zip(pi.iter()).map(|(a, b)| (a - b).abs()).sum();
            pi = next;
            if delta < 1e-13 {
                break;
            }
        }
        normalize_row(pi)
    }
}

impl From<[[f64; REGIME_COUNT]; REGIME_COUNT]> for TransitionMatrix {
    fn from(rows: [[f64; REGIME_COUNT]; REGIME_COUNT]) -> Self {
        Self::new(rows)
    }
}

impl From<TransitionMatrix> for [[f64; REGIME_COUNT]; REGIME_COUNT] {
    fn from(matrix: TransitionMatrix) -> Self {
        matrix.rows
    }
}

fn normalize_row(row: [f64; REGIME_COUNT]) -> [f64; REGIME_COUNT] {
    if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return UNIFORM_ROW;
    }
    let total: f64 = row.iter().sum();
    if total <= 0.0 {
        return UNIFORM_ROW;
    }
    row.map(|p| p / total)
}

pub fn cumulative(weights: &[f64; REGIME_COUNT]) -> [f64; REGIME_COUNT] {
    let mut out = [0.0; REGIME_COUNT];
    let mut running = 0.0;
    for (slot, w) in out.iter_mut().zip(weights.iter()) {
        running += w;
        *slot = running;
    }
    out
}

// ── Classification ─────────────────────────────────────────────────

/// Label each month from its return and its deviation from the window
/// mean. Thresholds are window quantiles, guarded by absolute floors so
/// a calm window is never forced to contain Volatile months and a
/// one-directional window is never forced to contain both Bull and Bear.
pub fn classify_months(returns: &[f64], config: &CalibrationConfig) -> Vec<Regime> {
    if returns.is_empty() {
        return Vec::new();
    }
    let m = stats::mean(returns);
    let deviations: Vec<f64> = returns.iter().map(|r| (r - m).abs()).collect();

    let volatile_cut = stats::quantile(&deviations, config.volatile_quantile)
        .max(config.volatile_floor);
    let bull_cut = stats::quantile(returns, config.bull_quantile)
        .max(config.directional_dead_band);
    let bear_cut = stats::quantile(returns, config.bear_quantile)
        .min(-config.directional_dead_band);

    returns
        .iter()
        .zip(deviations.iter())
        .map(|(&r, &dev)| {
            if dev > volatile_cut {
                Regime::Volatile
            } else if r >= bull_cut {
                Regime::Bull
            } else if r <= bear_cut {
                Regime::Bear
            } else {
                Regime::Sideways
            }
        })
        .collect()
}

/// Estimate each regime's return distribution from its labelled months.
/// Regimes seen in fewer than two months take the window statistics
/// reshaped by `Regime::fallback_shape`; a single observation still
/// pins the mean.
pub fn calibrate_regimes(returns: &[f64], labels: &[Regime]) -> [RegimeDefinition; REGIME_COUNT] {
    let overall_mean = stats::mean(returns);
    let overall_sd = stats::std_dev(returns);

    Regime::ALL.map(|regime| {
        let sample: Vec<f64> = returns
            .iter()
            .zip(labels.iter())
            .filter(|(_, label)| **label == regime)
            .map(|(r, _)| *r)
            .collect();
        let (shift, vol_multiple) = regime.fallback_shape();

        let (mean_monthly_return, monthly_volatility) = match sample.len() {
            0 => (overall_mean + shift * overall_sd, vol_multiple * overall_sd),
            1 => (sample[0], vol_multiple * overall_sd),
            _ => (stats::mean(&sample), stats::std_dev(&sample)),
        };

        RegimeDefinition {
            regime,
            mean_monthly_return,
            monthly_volatility,
            observed_months: sample.len() as u32,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_row_falls_back_to_uniform() {
        let m = TransitionMatrix::new([
            [0.5, 0.5, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0],
            [f64::NAN, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 2.0],
        ]);
        let rows: [[f64; REGIME_COUNT]; REGIME_COUNT] = m.into();
        assert_eq!(rows[Regime::Bear.index()], UNIFORM_ROW);
        assert_eq!(rows[Regime::Sideways.index()], UNIFORM_ROW);
        assert_eq!(rows[Regime::Volatile.index()], [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn stationary_of_two_cycle_converges() {
        let m = TransitionMatrix::new([
            [0.0, 1.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]);
        // Three closed classes; from the uniform start every state keeps 0.25.
        let pi = m.stationary();
        assert!((pi[0] - 0.25).abs() < 1e-9 && (pi[1] - 0.25).abs() < 1e-9, "{pi:?}");
        assert!((pi.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn stationary_satisfies_balance() {
        let m = TransitionMatrix::new([
            [0.7, 0.1, 0.1, 0.1],
            [0.2, 0.6, 0.1, 0.1],
            [0.3, 0.2, 0.4, 0.1],
            [0.1, 0.4, 0.1, 0.4],
        ]);
        let pi = m.stationary();
        let rows: [[f64; REGIME_COUNT]; REGIME_COUNT] = m.into();
        for to in 0..REGIME_COUNT {
            let flowed: f64 = (0..REGIME_COUNT).map(|from| pi[from] * rows[from][to]).sum();
            assert!((flowed - pi[to]).abs() < 1e-9);
        }
    }

    #[test]
    fn calm_flat_window_is_all_sideways() {
        let labels = classify_months(&[0.001; 12], &CalibrationConfig::default());
        assert!(labels.iter().all(|r| *r == Regime::Sideways));
    }

    #[test]
    fn outlier_month_is_volatile() {
        let mut returns = vec![0.002, -0.001, 0.001, 0.0, 0.003, -0.002, 0.001, 0.0];
        returns.push(-0.15);
        let labels = classify_months(&returns, &CalibrationConfig::default());
        assert_eq!(labels.last(), Some(&Regime::Volatile));
    }

    #[test]
    fn unseen_regime_uses_window_statistics() {
        let returns = [0.01, 0.012, 0.011, 0.009];
        let labels = [Regime::Bull; 4];
        let defs = calibrate_regimes(&returns, &labels);
        assert_eq!(defs[Regime::Bull.index()].observed_months, 4);
        let volatile = defs[Regime::Volatile.index()];
        assert_eq!(volatile.observed_months, 0);
        assert!((volatile.monthly_volatility - 2.0 * stats::std_dev(&returns)).abs() < 1e-12);
    }

    #[test]
    fn matrix_serde_sanitizes() {
        let json = "[[0,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]";
        let m: TransitionMatrix = serde_json::from_str(json).expect("matrix json");
        let rows: [[f64; REGIME_COUNT]; REGIME_COUNT] = m.into();
        assert_eq!(rows[Regime::Bull.index()], UNIFORM_ROW);
    }
}
