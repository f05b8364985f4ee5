mod common;

use common::*;
use nav_erosion_core::{
    clock::ManualClock,
    config::EngineConfig,
    engine::MonteCarloEngine,
    error::NavError,
    penalty::PenaltyCalculator,
    regime::{Regime, TransitionMatrix},
    types::{AnalysisType, RiskTier},
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn drawdown_heavy() -> nav_erosion_core::collector::SimulationParameters {
    synthetic_params(
        "DRAW",
        [
            regime(Regime::Bull, 0.01, 0.02),
            regime(Regime::Bear, -0.03, 0.03),
            regime(Regime::Sideways, 0.0, 0.01),
            regime(Regime::Volatile, -0.01, 0.08),
        ],
        [0.15, 0.35, 0.15, 0.35],
    )
}

fn calm() -> nav_erosion_core::collector::SimulationParameters {
    synthetic_params(
        "CALM",
        [
            regime(Regime::Bull, 0.004, 0.01),
            regime(Regime::Bear, -0.002, 0.01),
            regime(Regime::Sideways, 0.0, 0.005),
            regime(Regime::Volatile, 0.0, 0.02),
        ],
        [0.3, 0.2, 0.4, 0.1],
    )
}

#[test]
fn probabilities_and_percentiles_are_well_formed() {
    let config = EngineConfig::default_test();
    let engine = engine(&config);

    for params in [drawdown_heavy(), calm()] {
        for analysis_type in [AnalysisType::Quick, AnalysisType::Deep] {
            let result = engine.simulate(&params, analysis_type).expect("simulate");
            assert_eq!(result.n_paths, config.simulation.paths_for(analysis_type));
            assert!((0.0..=1.0).contains(&result.prob_loss_gt_5pct));
            assert!((0.0..=1.0).contains(&result.prob_loss_gt_10pct));
            assert!(result.prob_loss_gt_10pct <= result.prob_loss_gt_5pct);
            assert!(result.percentile_returns.is_monotone(), "{:?}", result.percentile_returns);
            assert!(result.median_annualized_erosion.is_finite());
        }
    }
}

#[test]
fn drawdown_heavy_regime_mix_scores_high_or_severe() {
    let config = EngineConfig::default_test();
    let result = engine(&config).simulate(&drawdown_heavy(), AnalysisType::Deep).expect("simulate");
    let calculator = PenaltyCalculator::new(
        config.penalty.clone(),
        config.cache.ttl_days,
        Arc::new(ManualClock::new(t0())),
    );
    let penalty = calculator.penalty_for(&result);

    assert!(result.percentile_returns.p50 < 0.0);
    assert!(matches!(penalty.risk_tier, RiskTier::High | RiskTier::Severe), "{penalty:?}");
    assert!(penalty.penalty_points >= 22.0);
    assert_eq!(penalty.basis_result_ref, result.result_id);
}

#[test]
fn calm_regime_mix_rarely_loses_five_percent() {
    let config = EngineConfig::default_test();
    let result = engine(&config).simulate(&calm(), AnalysisType::Quick).expect("simulate");
    assert!(result.prob_loss_gt_5pct < 0.05, "p = {}", result.prob_loss_gt_5pct);
}

#[test]
fn zero_volatility_collapses_to_one_deterministic_path() {
    let config = EngineConfig::default_test();
    let mut params = synthetic_params(
        "FLAT",
        Regime::ALL.map(|r| regime(r, -0.01, 0.0)),
        [0.25; 4],
    );
    params.annualized_premium_yield = 0.0;
    params.annualized_volatility = 0.0;
    params.expense_ratio_annual = 0.0;

    let result = engine(&config).simulate(&params, AnalysisType::Quick).expect("simulate");
    let expected = 0.99f64.powi(12) - 1.0;
    let p = result.percentile_returns;

    assert!((p.p5 - expected).abs() < 1e-12);
    assert!((p.p95 - p.p5).abs() < 1e-15);
    assert_eq!(result.prob_loss_gt_5pct, 1.0);
    assert_eq!(result.prob_loss_gt_10pct, 1.0);
    assert!((result.median_annualized_erosion - expected).abs() < 1e-12);
}

#[test]
fn degenerate_transition_rows_are_simulated_not_rejected() {
    let config = EngineConfig::default_test();
    let mut params = calm();
    params.regime_transition_matrix = TransitionMatrix::new([
        [0.0, 0.0, 0.0, 0.0],
        [f64::NAN, 0.5, 0.5, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [-1.0, 1.0, 1.0, 1.0],
    ]);

    let result = engine(&config).simulate(&params, AnalysisType::Quick).expect("simulate");
    assert!((0.0..=1.0).contains(&result.prob_loss_gt_5pct));
    assert!(result.percentile_returns.is_monotone());
}

#[test]
fn same_seed_reproduces_identical_statistics() {
    let config = EngineConfig::default_test();
    let a = engine(&config).simulate(&drawdown_heavy(), AnalysisType::Quick).expect("a");
    let b = engine(&config).simulate(&drawdown_heavy(), AnalysisType::Quick).expect("b");

    assert_eq!(a.seed, b.seed);
    assert_eq!(a.prob_loss_gt_5pct, b.prob_loss_gt_5pct);
    assert_eq!(a.prob_loss_gt_10pct, b.prob_loss_gt_10pct);
    assert_eq!(a.percentile_returns, b.percentile_returns);
    assert_eq!(a.mean_erosion, b.mean_erosion);
    assert_ne!(a.result_id, b.result_id);
}

#[test]
fn tickers_and_depths_draw_from_distinct_streams() {
    let config = EngineConfig::default_test();
    let engine = engine(&config);
    let a = engine.simulate(&drawdown_heavy(), AnalysisType::Quick).expect("a");

    let mut renamed = drawdown_heavy();
    renamed.ticker = "OTHER".into();
    let b = engine.simulate(&renamed, AnalysisType::Quick).expect("b");
    let deep = engine.simulate(&drawdown_heavy(), AnalysisType::Deep).expect("deep");

    assert_ne!(a.seed, b.seed);
    assert_ne!(a.seed, deep.seed);
    assert_ne!(a.percentile_returns, b.percentile_returns);
}

#[test]
fn chunk_size_does_not_change_path_count() {
    let mut config = EngineConfig::default_test();
    config.simulation.quick_paths = 1_000;
    config.simulation.chunk_size = 333;
    let result = engine(&config).simulate(&calm(), AnalysisType::Quick).expect("simulate");
    assert_eq!(result.n_paths, 1_000);
}

#[test]
fn cancelled_run_stops_with_cancelled() {
    let config = EngineConfig::default_test();
    let engine = MonteCarloEngine::new(
        config.simulation.clone(),
        config.calibration.premium_vol_coupling,
        Arc::new(ManualClock::new(t0())),
    );
    let cancel = AtomicBool::new(true);
    let err = engine
        .simulate_with_cancel(&drawdown_heavy(), AnalysisType::Deep, &cancel)
        .unwrap_err();
    assert!(matches!(err, NavError::Cancelled));
}

#[test]
fn non_finite_parameters_are_rejected() {
    let config = EngineConfig::default_test();
    let mut params = calm();
    params.annualized_premium_yield = f64::NAN;
    assert!(matches!(
        engine(&config).simulate(&params, AnalysisType::Quick),
        Err(NavError::InvalidParameters { .. })
    ));
}

#[test]
fn reduced_window_flag_flows_into_the_result() {
    let config = EngineConfig::default_test();
    let mut params = calm();
    params.reduced_window = true;
    let result = engine(&config).simulate(&params, AnalysisType::Quick).expect("simulate");
    assert!(result.reduced_window);
}
