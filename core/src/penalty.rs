//! Sustainability penalty: erosion probability → bounded points and tier.
//!
//! The mapping is piecewise linear over contiguous bands, so it is
//! continuous and non-decreasing in `prob_loss_gt_5pct`. Band layout is
//! validated once in `EngineConfig::validate`.

use crate::{
    clock::Clock,
    config::PenaltyConfig,
    engine::SimulationResult,
    types::{AnalysisType, RiskTier, Ticker},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SustainabilityPenalty {
    pub ticker:            Ticker,
    pub analysis_type:     AnalysisType,
    pub penalty_points:    f64,
    pub risk_tier:         RiskTier,
    pub prob_loss_gt_5pct: f64,
    /// `result_id` of the SimulationResult this penalty was derived from.
    pub basis_result_ref:  Uuid,
    pub reduced_window:    bool,
    pub computed_at:       DateTime<Utc>,
    pub valid_until:       DateTime<Utc>,
}

impl SustainabilityPenalty {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

/// Points and tier for an erosion probability.
pub fn score(prob_loss_gt_5pct: f64, config: &PenaltyConfig) -> (f64, RiskTier) {
    let p = if prob_loss_gt_5pct.is_finite() {
        prob_loss_gt_5pct.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let Some(band) = config
        .bands
        .iter()
        .rev()
        .find(|b| b.prob_low <= p)
        .or_else(|| config.bands.first())
    else {
        return (0.0, RiskTier::Minimal);
    };

    let width = band.prob_high - band.prob_low;
    let t = if width > 0.0 { ((p - band.prob_low) / width).clamp(0.0, 1.0) } else { 1.0 };
    let points = band.points_low + t * (band.points_high - band.points_low);
    (points.clamp(0.0, config.max_points), band.tier)
}

pub struct PenaltyCalculator {
    config: PenaltyConfig,
    ttl:    Duration,
    clock:  Arc<dyn Clock>,
}

impl PenaltyCalculator {
    pub fn new(config: PenaltyConfig, ttl_days: i64, clock: Arc<dyn Clock>) -> Self {
        Self { config, ttl: Duration::days(ttl_days), clock }
    }

    pub fn penalty_for(&self, result: &SimulationResult) -> SustainabilityPenalty {
        let (penalty_points, risk_tier) = score(result.prob_loss_gt_5pct, &self.config);
        let computed_at = self.clock.now();
        log::debug!(
            "{}: p(<-5%)={:.3} -> {penalty_points:.2} pts ({risk_tier})",
            result.ticker, result.prob_loss_gt_5pct
        );
        SustainabilityPenalty {
            ticker: result.ticker.clone(),
            analysis_type: result.analysis_type,
            penalty_points,
            risk_tier,
            prob_loss_gt_5pct: result.prob_loss_gt_5pct,
            basis_result_ref: result.result_id,
            reduced_window: result.reduced_window,
            computed_at,
            valid_until: computed_at + self.ttl,
        }
    }
}
