//! Deterministic random number generation.
//!
//! RULE: Nothing in the engine may call any platform RNG.
//! All randomness flows through PathRng instances derived from a
//! run seed, which is itself derived from the configured master seed,
//! the ticker, and the analysis type.
//!
//! Each chunk of simulated paths gets its own RNG stream, seeded
//! deterministically from (run_seed XOR chunk_index). This means:
//!   - Results are bit-identical no matter how rayon schedules chunks.
//!   - Each chunk's stream is fully reproducible in isolation.

use crate::types::AnalysisType;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::StandardNormal;
use rand_pcg::Pcg64Mcg;

const GOLDEN_GAMMA: u64 = 0x9e37_79b9_7f4a_7c15;

/// A deterministic RNG for one chunk of paths.
pub struct PathRng {
    inner: Pcg64Mcg,
}

impl PathRng {
    /// Create a chunk RNG from the run seed and a stable chunk index.
    pub fn new(run_seed: u64, chunk_index: u64) -> Self {
        let derived_seed = run_seed ^ (chunk_index.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA));
        Self { inner: Pcg64Mcg::seed_from_u64(derived_seed) }
    }

    /// Roll a float in (0.0, 1.0). Never returns exactly zero.
    pub fn next_f64(&mut self) -> f64 {
        let bits = self.inner.next_u64() >> 11;
        (bits as f64 + 0.5) * (1.0 / (1u64 << 53) as f64)
    }

    pub fn standard_normal(&mut self) -> f64 {
        self.inner.sample(StandardNormal)
    }

    /// Index of the first cumulative weight exceeding a uniform roll.
    /// `cumulative` must be non-decreasing and end at ~1.0; rounding
    /// shortfall lands on the last bucket.
    pub fn categorical(&mut self, cumulative: &[f64]) -> usize {
        let roll = self.next_f64();
        cumulative
            .iter()
            .position(|&c| roll < c)
            .unwrap_or(cumulative.len().saturating_sub(1))
    }
}

/// Seed for one (ticker, analysis type) run.
pub fn run_seed(master_seed: u64, ticker: &str, analysis_type: AnalysisType) -> u64 {
    master_seed ^ ticker_hash(ticker) ^ analysis_type.slot().wrapping_mul(GOLDEN_GAMMA)
}

/// FNV-1a over the ticker bytes. Stable across platforms and releases,
/// unlike `DefaultHasher`.
fn ticker_hash(ticker: &str) -> u64 {
    ticker.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}
