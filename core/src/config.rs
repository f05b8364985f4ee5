use crate::{
    error::{NavError, NavResult},
    types::{AnalysisType, RiskTier},
};
use serde::{Deserialize, Serialize};

// ── Collector ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub lookback_months: u32,
    /// Fallback window and the minimum number of usable months.
    pub min_months: u32,
    /// Completeness score (0–100) below which analysis is skipped.
    pub completeness_threshold: f64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            lookback_months:        12,
            min_months:             6,
            completeness_threshold: 60.0,
        }
    }
}

// ── Calibration ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Quantile of |return − mean| above which a month is Volatile.
    pub volatile_quantile: f64,
    /// Monthly deviation a month must exceed to count as Volatile at all.
    pub volatile_floor: f64,
    pub bull_quantile: f64,
    pub bear_quantile: f64,
    /// Returns within ±dead_band of zero are never Bull or Bear.
    pub directional_dead_band: f64,
    /// Elasticity of option premium to regime volatility.
    pub premium_vol_coupling: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            volatile_quantile:     0.75,
            volatile_floor:        0.02,
            bull_quantile:         0.60,
            bear_quantile:         0.40,
            directional_dead_band: 0.005,
            premium_vol_coupling:  0.5,
        }
    }
}

// ── Simulation ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub quick_paths:    usize,
    pub deep_paths:     usize,
    pub horizon_months: usize,
    /// Paths per RNG stream / rayon work unit.
    pub chunk_size:     usize,
    pub master_seed:    u64,
}

impl SimulationConfig {
    pub fn paths_for(&self, analysis_type: AnalysisType) -> usize {
        match analysis_type {
            AnalysisType::Quick => self.quick_paths,
            AnalysisType::Deep  => self.deep_paths,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            quick_paths:    10_000,
            deep_paths:     50_000,
            horizon_months: 12,
            chunk_size:     4_096,
            master_seed:    0x5EED,
        }
    }
}

// ── Penalty ────────────────────────────────────────────────────────

/// One band of the probability → penalty mapping. Points interpolate
/// linearly from `points_low` at `prob_low` to `points_high` at `prob_high`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyBand {
    pub tier:        RiskTier,
    pub prob_low:    f64,
    pub prob_high:   f64,
    pub points_low:  f64,
    pub points_high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub bands:      Vec<PenaltyBand>,
    pub max_points: f64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        let band = |tier, prob_low, prob_high, points_low, points_high| PenaltyBand {
            tier, prob_low, prob_high, points_low, points_high,
        };
        Self {
            bands: vec![
                band(RiskTier::Minimal,  0.00, 0.20,  0.0,  5.0),
                band(RiskTier::Low,      0.20, 0.40,  5.0, 15.0),
                band(RiskTier::Moderate, 0.40, 0.55, 15.0, 22.0),
                band(RiskTier::High,     0.55, 0.70, 22.0, 28.0),
                band(RiskTier::Severe,   0.70, 1.00, 28.0, 30.0),
            ],
            max_points: 30.0,
        }
    }
}

// ── Cache / runtime ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_days: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Peak concurrent simulations; each deep run is memory-heavy.
    pub max_concurrent_simulations: usize,
    pub deep_timeout_ms:            u64,
    pub quick_timeout_ms:           u64,
    pub max_batch:                  usize,
    pub batch_workers:              usize,
    /// Depth used by `analyze` and `analyze_batch`.
    pub default_analysis:           AnalysisType,
}

impl RuntimeConfig {
    pub fn timeout_ms_for(&self, analysis_type: AnalysisType) -> u64 {
        match analysis_type {
            AnalysisType::Quick => self.quick_timeout_ms,
            AnalysisType::Deep  => self.deep_timeout_ms,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrent_simulations: 4,
            deep_timeout_ms:            10_000,
            quick_timeout_ms:           5_000,
            max_batch:                  50,
            batch_workers:              4,
            default_analysis:           AnalysisType::Quick,
        }
    }
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub collector:   CollectorConfig,
    pub calibration: CalibrationConfig,
    pub simulation:  SimulationConfig,
    pub penalty:     PenaltyConfig,
    pub cache:       CacheConfig,
    pub runtime:     RuntimeConfig,
}

impl EngineConfig {
    /// Load from a JSON file. Missing sections take their defaults.
    /// In tests, use EngineConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: EngineConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Config with small path counts for use in tests.
    pub fn default_test() -> Self {
        let mut config = Self::default();
        config.simulation.quick_paths = 2_000;
        config.simulation.deep_paths = 4_000;
        config.simulation.chunk_size = 512;
        config.runtime.quick_timeout_ms = 30_000;
        config.runtime.deep_timeout_ms = 30_000;
        config
    }

    pub fn validate(&self) -> NavResult<()> {
        let invalid = |reason: String| Err(NavError::InvalidConfig { reason });

        if self.collector.min_months < 2 || self.collector.min_months > self.collector.lookback_months {
            return invalid(format!(
                "min_months {} must be in 2..={}",
                self.collector.min_months, self.collector.lookback_months
            ));
        }
        if !(0.0..=100.0).contains(&self.collector.completeness_threshold) {
            return invalid("completeness_threshold must be in [0, 100]".into());
        }

        let c = &self.calibration;
        for (name, q) in [
            ("volatile_quantile", c.volatile_quantile),
            ("bull_quantile", c.bull_quantile),
            ("bear_quantile", c.bear_quantile),
        ] {
            if !(q > 0.0 && q < 1.0) {
                return invalid(format!("{name} must be in (0, 1), got {q}"));
            }
        }
        if c.bear_quantile > c.bull_quantile {
            return invalid("bear_quantile must not exceed bull_quantile".into());
        }
        if c.premium_vol_coupling < 0.0 {
            return invalid("premium_vol_coupling must be non-negative".into());
        }

        let s = &self.simulation;
        if s.quick_paths == 0 || s.deep_paths == 0 || s.chunk_size == 0 || s.horizon_months == 0 {
            return invalid("path counts, chunk_size and horizon_months must be positive".into());
        }

        self.validate_bands()?;

        if self.cache.ttl_days <= 0 {
            return invalid("ttl_days must be positive".into());
        }
        let r = &self.runtime;
        if r.max_concurrent_simulations == 0 || r.max_batch == 0 || r.batch_workers == 0 {
            return invalid("runtime limits must be positive".into());
        }
        Ok(())
    }

    /// Bands must tile [0, 1] in order with non-decreasing points, so the
    /// mapping is continuous and monotone.
    fn validate_bands(&self) -> NavResult<()> {
        let bands = &self.penalty.bands;
        let fail = |reason: String| Err(NavError::InvalidConfig { reason });

        let (Some(first), Some(last)) = (bands.first(), bands.last()) else {
            return fail("penalty.bands is empty".into());
        };
        if first.prob_low != 0.0 || last.prob_high != 1.0 {
            return fail("penalty bands must span [0, 1]".into());
        }
        if first.points_low < 0.0 || last.points_high > self.penalty.max_points {
            return fail(format!("penalty points must stay in [0, {}]", self.penalty.max_points));
        }
        for band in bands {
            if band.prob_high <= band.prob_low || band.points_high < band.points_low {
                return fail(format!("band {} is not increasing", band.tier));
            }
        }
        for pair in bands.windows(2) {
            if pair[0].prob_high != pair[1].prob_low || pair[0].points_high != pair[1].points_low {
                return fail(format!(
                    "bands {} and {} are not contiguous",
                    pair[0].tier, pair[1].tier
                ));
            }
        }
        Ok(())
    }
}
