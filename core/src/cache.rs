//! Penalty cache: injected store plus atomic compute-if-absent.
//!
//! Entry life cycle per (ticker, analysis_type):
//!   Missing → Computing → Cached → Stale → Computing → …
//!
//! RULES:
//!   - The store only sees opaque JSON payloads; decoding happens here,
//!     and an undecodable payload is a miss, never an error. It is
//!     removed from the store when found.
//!   - Computing is the only state in which callers wait. They join the
//!     in-flight leader through SingleFlight.
//!   - `invalidate` bumps a per-ticker generation; a computation that
//!     started before the bump returns its value but does not store it.

use crate::{
    clock::Clock,
    collector::SkipReason,
    engine::SimulationResult,
    error::NavResult,
    penalty::SustainabilityPenalty,
    single_flight::SingleFlight,
    types::{AnalysisType, Ticker},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub ticker:        Ticker,
    pub analysis_type: AnalysisType,
}

impl CacheKey {
    pub fn new(ticker: &str, analysis_type: AnalysisType) -> Self {
        Self { ticker: ticker.to_string(), analysis_type }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ticker, self.analysis_type)
    }
}

/// What the store persists for a key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedPenalty {
    pub penalty: SustainabilityPenalty,
    pub result:  SimulationResult,
}

impl CachedPenalty {
    pub fn encode(&self) -> NavResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> NavResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// External-facing outcome for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Analysis {
    Scored(SustainabilityPenalty),
    Skipped { ticker: Ticker, reason: SkipReason },
}

impl Analysis {
    pub fn penalty(&self) -> Option<&SustainabilityPenalty> {
        match self {
            Self::Scored(p) => Some(p),
            Self::Skipped { .. } => None,
        }
    }

    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Scored(_) => None,
            Self::Skipped { reason, .. } => Some(*reason),
        }
    }
}

/// What a cache-miss computation produced.
#[derive(Debug, Clone)]
pub enum Computed {
    Scored(CachedPenalty),
    /// Returned to callers but not stored, e.g. a quick-path fallback
    /// standing in for a deep run.
    Uncached(CachedPenalty),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Computing,
    Cached,
    Stale,
}

/// Key-value persistence for cache entries.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> NavResult<Option<String>>;

    /// Insert or overwrite.
    fn put(&self, key: &CacheKey, payload: &str, valid_until: DateTime<Utc>) -> NavResult<()>;

    fn delete(&self, key: &CacheKey) -> NavResult<bool>;

    /// Remove every analysis type for the ticker. Returns entries removed.
    fn delete_ticker(&self, ticker: &str) -> NavResult<usize>;
}

/// In-process store, for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, (String, DateTime<Utc>)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> NavResult<Option<String>> {
        Ok(self.entries.get(key).map(|entry| entry.value().0.clone()))
    }

    fn put(&self, key: &CacheKey, payload: &str, valid_until: DateTime<Utc>) -> NavResult<()> {
        self.entries.insert(key.clone(), (payload.to_string(), valid_until));
        Ok(())
    }

    fn delete(&self, key: &CacheKey) -> NavResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn delete_ticker(&self, ticker: &str) -> NavResult<usize> {
        let removed = AnalysisType::ALL
            .iter()
            .filter(|t| self.entries.remove(&CacheKey::new(ticker, **t)).is_some())
            .count();
        Ok(removed)
    }
}

pub struct PenaltyCache {
    store:       Arc<dyn CacheStore>,
    clock:       Arc<dyn Clock>,
    flights:     SingleFlight<CacheKey, Analysis>,
    generations: DashMap<Ticker, u64>,
}

impl PenaltyCache {
    pub fn new(store: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            flights:     SingleFlight::new(),
            generations: DashMap::new(),
        }
    }

    /// Fresh entry for the key, if any. Store failures and undecodable
    /// payloads read as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CachedPenalty> {
        self.read(key).filter(|entry| entry.penalty.is_fresh(self.clock.now()))
    }

    pub fn put(&self, key: &CacheKey, entry: &CachedPenalty) -> NavResult<()> {
        let payload = entry.encode()?;
        self.store.put(key, &payload, entry.penalty.valid_until)
    }

    /// Drop every entry for the ticker and orphan in-flight computations.
    pub fn invalidate(&self, ticker: &str) -> NavResult<usize> {
        self.bump_generation(ticker);
        for analysis_type in AnalysisType::ALL {
            self.flights.forget(&CacheKey::new(ticker, analysis_type));
        }
        let removed = self.store.delete_ticker(ticker)?;
        log::info!("{ticker}: invalidated {removed} cache entries");
        Ok(removed)
    }

    pub fn state(&self, key: &CacheKey) -> CacheState {
        if self.flights.is_in_flight(key) {
            return CacheState::Computing;
        }
        match self.read(key) {
            Some(entry) if entry.penalty.is_fresh(self.clock.now()) => CacheState::Cached,
            Some(_) => CacheState::Stale,
            None => CacheState::Missing,
        }
    }

    /// Return the fresh entry, or run `compute` exactly once across all
    /// concurrent callers for the key and store a scored outcome.
    pub fn compute_if_absent<F>(&self, key: &CacheKey, compute: F) -> NavResult<Analysis>
    where
        F: FnOnce() -> NavResult<Computed>,
    {
        if let Some(hit) = self.get(key) {
            log::debug!("{key}: cache hit");
            return Ok(Analysis::Scored(hit.penalty));
        }

        self.flights.run(key, || {
            // A previous leader may have stored between our miss and now.
            if let Some(hit) = self.get(key) {
                return Ok(Analysis::Scored(hit.penalty));
            }

            let generation = self.generation(&key.ticker);
            log::info!("{key}: cache miss, computing");

            match compute()? {
                Computed::Skipped(reason) => Ok(Analysis::Skipped {
                    ticker: key.ticker.clone(),
                    reason,
                }),
                Computed::Uncached(entry) => Ok(Analysis::Scored(entry.penalty)),
                Computed::Scored(entry) => {
                    if self.generation(&key.ticker) != generation {
                        log::info!("{key}: invalidated during computation, not caching");
                    } else if let Err(e) = self.put(key, &entry) {
                        log::warn!("{key}: cache write failed: {e}");
                    }
                    Ok(Analysis::Scored(entry.penalty))
                }
            }
        })
    }

    fn read(&self, key: &CacheKey) -> Option<CachedPenalty> {
        let payload = match self.store.get(key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("{key}: cache read failed, treating as miss: {e}");
                return None;
            }
        };
        match CachedPenalty::decode(&payload) {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("{key}: undecodable cache entry, treating as miss: {e}");
                if let Err(e) = self.store.delete(key) {
                    log::warn!("{key}: failed to remove undecodable entry: {e}");
                }
                None
            }
        }
    }

    fn generation(&self, ticker: &str) -> u64 {
        self.generations.get(ticker).map(|g| *g).unwrap_or(0)
    }

    fn bump_generation(&self, ticker: &str) {
        *self.generations.entry(ticker.to_string()).or_insert(0) += 1;
    }
}
