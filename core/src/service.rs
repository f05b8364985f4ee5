//! Sustainability Integration: the three operations the composite
//! scorer calls: `analyze`, `analyze_batch`, `invalidate`.
//!
//! PIPELINE on a cache miss, once per (ticker, analysis_type):
//!   1. Collector: metadata, window, quality gates  → skip or parameters
//!   2. Pool:      bounded, time-limited simulation  (quick retry on timeout)
//!   3. Penalty:   probability → points and tier
//!   4. Cache:     store with valid_until = now + TTL
//!
//! RULES:
//!   - A skip is an outcome, never a score. Missing data is not risk.
//!   - Batch items are independent: one ticker's error stays in its slot.
//!   - A batch above `runtime.max_batch` is rejected before any work.

use crate::{
    cache::{Analysis, CacheKey, CacheState, CacheStore, CachedPenalty, Computed, PenaltyCache},
    clock::Clock,
    collector::{CollectionVerdict, HistoricalDataCollector, SimulationParameters},
    config::EngineConfig,
    engine::{MonteCarloEngine, SimulationResult, Simulator},
    error::{NavError, NavResult},
    market_data::MarketDataSource,
    penalty::{PenaltyCalculator, SustainabilityPenalty},
    pool::SimulationPool,
    types::{AnalysisType, Ticker},
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct SustainabilityService {
    config:     EngineConfig,
    collector:  HistoricalDataCollector,
    pool:       SimulationPool,
    calculator: PenaltyCalculator,
    cache:      PenaltyCache,
}

impl SustainabilityService {
    pub fn new(
        config:      EngineConfig,
        source:      Arc<dyn MarketDataSource>,
        cache_store: Arc<dyn CacheStore>,
        simulator:   Arc<dyn Simulator>,
        clock:       Arc<dyn Clock>,
    ) -> NavResult<Self> {
        config.validate()?;
        let collector = HistoricalDataCollector::new(
            source,
            Arc::clone(&clock),
            config.collector.clone(),
            config.calibration.clone(),
        );
        let pool = SimulationPool::new(simulator, config.runtime.max_concurrent_simulations);
        let calculator =
            PenaltyCalculator::new(config.penalty.clone(), config.cache.ttl_days, Arc::clone(&clock));
        let cache = PenaltyCache::new(cache_store, clock);
        Ok(Self { config, collector, pool, calculator, cache })
    }

    /// Service backed by the Monte Carlo engine built from `config`.
    pub fn with_engine(
        config:      EngineConfig,
        source:      Arc<dyn MarketDataSource>,
        cache_store: Arc<dyn CacheStore>,
        clock:       Arc<dyn Clock>,
    ) -> NavResult<Self> {
        let engine = MonteCarloEngine::new(
            config.simulation.clone(),
            config.calibration.premium_vol_coupling,
            Arc::clone(&clock),
        );
        Self::new(config, source, cache_store, Arc::new(engine), clock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache_state(&self, ticker: &str, analysis_type: AnalysisType) -> CacheState {
        self.cache.state(&CacheKey::new(ticker, analysis_type))
    }

    /// Cached penalty, or compute it exactly once across concurrent
    /// callers. Skips surface as `NavError::Skipped`.
    pub fn get_or_compute(
        &self,
        ticker:        &str,
        analysis_type: AnalysisType,
    ) -> NavResult<SustainabilityPenalty> {
        match self.analyze_as(ticker, analysis_type)? {
            Analysis::Scored(penalty) => Ok(penalty),
            Analysis::Skipped { ticker, reason } => Err(NavError::Skipped { ticker, reason }),
        }
    }

    pub fn analyze(&self, ticker: &str) -> NavResult<Analysis> {
        self.analyze_as(ticker, self.config.runtime.default_analysis)
    }

    pub fn analyze_as(&self, ticker: &str, analysis_type: AnalysisType) -> NavResult<Analysis> {
        let key = CacheKey::new(ticker, analysis_type);
        self.cache.compute_if_absent(&key, || self.compute(ticker, analysis_type))
    }

    pub fn analyze_batch(&self, tickers: &[Ticker]) -> NavResult<Vec<NavResult<Analysis>>> {
        self.analyze_batch_as(tickers, self.config.runtime.default_analysis)
    }

    /// One outcome per input ticker, in input order.
    pub fn analyze_batch_as(
        &self,
        tickers:       &[Ticker],
        analysis_type: AnalysisType,
    ) -> NavResult<Vec<NavResult<Analysis>>> {
        let max = self.config.runtime.max_batch;
        if tickers.len() > max {
            return Err(NavError::BatchTooLarge { size: tickers.len(), max });
        }
        if tickers.is_empty() {
            return Ok(Vec::new());
        }

        let next = AtomicUsize::new(0);
        let workers = self.config.runtime.batch_workers.clamp(1, tickers.len());
        let mut slots: Vec<Option<NavResult<Analysis>>> = (0..tickers.len()).map(|_| None).collect();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(|| {
                        let mut done = Vec::new();
                        loop {
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(ticker) = tickers.get(i) else { break };
                            let outcome = self.analyze_as(ticker, analysis_type);
                            if let Err(e) = &outcome {
                                log::warn!("{ticker}: batch item failed: {e}");
                            }
                            done.push((i, outcome));
                        }
                        done
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (i, outcome) in done {
                            slots[i] = Some(outcome);
                        }
                    }
                    Err(_) => log::warn!("batch worker panicked"),
                }
            }
        });

        let scored = slots.iter().filter(|s| matches!(s, Some(Ok(Analysis::Scored(_))))).count();
        log::info!("batch of {}: {scored} scored", tickers.len());

        Ok(slots
            .into_iter()
            .zip(tickers)
            .map(|(slot, ticker)| {
                slot.unwrap_or_else(|| {
                    Err(NavError::ComputationFailed {
                        key:    format!("{ticker}:{analysis_type}"),
                        reason: "batch worker panicked".into(),
                    })
                })
            })
            .collect())
    }

    /// Drop every cached analysis for the ticker. Returns entries removed.
    pub fn invalidate(&self, ticker: &str) -> NavResult<usize> {
        self.cache.invalidate(ticker)
    }

    fn compute(&self, ticker: &str, analysis_type: AnalysisType) -> NavResult<Computed> {
        let (collection, metadata) = match self.collector.collect(ticker)? {
            CollectionVerdict::Skip(reason) => {
                log::warn!("{ticker}: skipped ({reason})");
                return Ok(Computed::Skipped(reason));
            }
            CollectionVerdict::Ready { collection, metadata, .. } => (collection, metadata),
        };

        let params = self.collector.parameters_for(&collection, &metadata)?;
        let (result, fell_back) = self.simulate_with_retry(&params, analysis_type)?;
        let penalty = self.calculator.penalty_for(&result);
        let entry = CachedPenalty { penalty, result };

        Ok(if fell_back { Computed::Uncached(entry) } else { Computed::Scored(entry) })
    }

    /// Run at the requested depth; on timeout retry once at quick. The
    /// flag is true when a deep request was answered by the quick retry.
    fn simulate_with_retry(
        &self,
        params:        &SimulationParameters,
        analysis_type: AnalysisType,
    ) -> NavResult<(SimulationResult, bool)> {
        let runtime = &self.config.runtime;
        let timeout = Duration::from_millis(runtime.timeout_ms_for(analysis_type));

        match self.pool.run(params, analysis_type, timeout) {
            Err(NavError::ComputationTimeout { .. }) => {
                log::warn!("{} {analysis_type}: timed out, retrying at quick", params.ticker);
                let retry = Duration::from_millis(runtime.timeout_ms_for(AnalysisType::Quick));
                let result = self.pool.run(params, AnalysisType::Quick, retry)?;
                Ok((result, analysis_type != AnalysisType::Quick))
            }
            other => other.map(|result| (result, false)),
        }
    }
}
