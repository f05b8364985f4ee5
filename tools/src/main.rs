//! erosion-runner: headless NAV erosion analysis runner.
//!
//! Usage:
//!   erosion-runner --db nav.db --import history.json
//!   erosion-runner --db nav.db --tickers JEPI,QYLD --analysis deep
//!   erosion-runner --db nav.db --invalidate QYLD
//!   erosion-runner --db nav.db --config data/engine_config.json --json

use anyhow::Result;
use nav_erosion_core::{
    cache::Analysis,
    clock::SystemClock,
    config::EngineConfig,
    error::NavResult,
    service::SustainabilityService,
    store::NavStore,
    types::{AnalysisType, HistoricalRecord, TickerMetadata},
};
use std::env;
use std::sync::Arc;
use std::time::Instant;

/// JSON import file: static metadata plus monthly history.
#[derive(serde::Deserialize)]
struct ImportFile {
    #[serde(default)]
    metadata: Vec<TickerMetadata>,
    #[serde(default)]
    records:  Vec<HistoricalRecord>,
}

#[derive(serde::Serialize)]
struct TickerReport<'a> {
    ticker:  &'a str,
    outcome: Option<&'a Analysis>,
    error:   Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = string_arg(&args, "--db").unwrap_or(":memory:");
    let import = string_arg(&args, "--import");
    let config_path = string_arg(&args, "--config");
    let invalidate = string_arg(&args, "--invalidate");
    let json = args.iter().any(|a| a == "--json");

    let config = match config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let store = Arc::new(NavStore::open(db)?);
    store.migrate()?;

    if let Some(path) = import {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: ImportFile = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        for m in &file.metadata {
            store.upsert_metadata(m)?;
        }
        let n = store.import_records(&file.records)?;
        log::info!("imported {} tickers, {n} monthly records from {path}", file.metadata.len());
    }

    let service = SustainabilityService::with_engine(
        config,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::new(SystemClock),
    )?;

    if let Some(ticker) = invalidate {
        let removed = service.invalidate(ticker)?;
        println!("invalidated {removed} cache entries for {ticker}");
    }

    let tickers: Vec<String> = match string_arg(&args, "--tickers") {
        Some(list) => list
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        None => store.list_tickers()?,
    };
    if tickers.is_empty() {
        println!("no tickers to analyze");
        return Ok(());
    }

    let analysis_type = match string_arg(&args, "--analysis") {
        Some(raw) => AnalysisType::parse(raw)
            .ok_or_else(|| anyhow::anyhow!("--analysis must be quick or deep, got {raw}"))?,
        None => service.config().runtime.default_analysis,
    };
    let started = Instant::now();
    let mut outcomes: Vec<NavResult<Analysis>> = Vec::with_capacity(tickers.len());
    for batch in tickers.chunks(service.config().runtime.max_batch) {
        outcomes.extend(service.analyze_batch_as(batch, analysis_type)?);
    }

    if json {
        let reports: Vec<TickerReport> = tickers
            .iter()
            .zip(&outcomes)
            .map(|(ticker, outcome)| TickerReport {
                ticker,
                outcome: outcome.as_ref().ok(),
                error: outcome.as_ref().err().map(|e| e.to_string()),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        print_summary(&tickers, &outcomes, analysis_type, started.elapsed().as_millis());
    }

    Ok(())
}

fn print_summary(
    tickers:       &[String],
    outcomes:      &[NavResult<Analysis>],
    analysis_type: AnalysisType,
    elapsed_ms:    u128,
) {
    println!("NAV erosion risk: {analysis_type} analysis");
    println!("{:<10} {:<10} {:>7} {:>9}  note", "ticker", "tier", "points", "p(<-5%)");

    let (mut scored, mut skipped, mut failed) = (0, 0, 0);
    for (ticker, outcome) in tickers.iter().zip(outcomes) {
        match outcome {
            Ok(Analysis::Scored(p)) => {
                scored += 1;
                let note = if p.reduced_window { "reduced window" } else { "" };
                println!(
                    "{:<10} {:<10} {:>7.2} {:>9.3}  {note}",
                    ticker, p.risk_tier, p.penalty_points, p.prob_loss_gt_5pct
                );
            }
            Ok(Analysis::Skipped { reason, .. }) => {
                skipped += 1;
                println!("{:<10} {:<10} {:>7} {:>9}  skipped: {reason}", ticker, "-", "-", "-");
            }
            Err(e) => {
                failed += 1;
                println!("{:<10} {:<10} {:>7} {:>9}  error: {e}", ticker, "-", "-", "-");
            }
        }
    }

    println!();
    println!("=== Summary ===");
    println!("  tickers:  {}", tickers.len());
    println!("  scored:   {scored}");
    println!("  skipped:  {skipped}");
    println!("  failed:   {failed}");
    println!("  elapsed:  {elapsed_ms}ms");
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}
