//! NAV erosion risk engine.
//!
//! Historical Data Collector → Monte Carlo Engine → Sustainability
//! Integration. `service::SustainabilityService` is the entry point.

pub mod cache;
pub mod clock;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod penalty;
pub mod pool;
pub mod regime;
pub mod rng;
pub mod service;
pub mod single_flight;
pub mod stats;
pub mod store;
pub mod types;
