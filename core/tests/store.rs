mod common;

use chrono::Duration;
use common::*;
use nav_erosion_core::{
    cache::{Analysis, CacheKey, CacheStore},
    clock::ManualClock,
    collector::{CollectionOutcome, DataCollectionLog},
    config::EngineConfig,
    market_data::MarketDataSource,
    service::SustainabilityService,
    store::NavStore,
    types::AnalysisType,
};
use std::sync::Arc;

fn store() -> NavStore {
    let store = NavStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

#[test]
fn migrations_are_idempotent() {
    let store = store();
    store.migrate().expect("second migration");
}

#[test]
fn records_round_trip_in_month_order() {
    let store = store();
    let mut records = stable_history("JEPI", 12);
    records.reverse();
    assert_eq!(store.import_records(&records).expect("import"), 12);

    let loaded = store.records("JEPI").expect("records");
    records.reverse();
    assert_eq!(loaded, records);
    assert!(store.records("OTHER").expect("records").is_empty());
}

#[test]
fn reimporting_a_month_replaces_it() {
    let store = store();
    let mut record = stable_history("JEPI", 1).remove(0);
    store.upsert_record(&record).expect("insert");
    record.nav_close = Some(19.5);
    record.roc_fraction = None;
    store.upsert_record(&record).expect("replace");

    assert_eq!(store.records("JEPI").expect("records"), vec![record]);
}

#[test]
fn metadata_round_trips_and_unknown_ticker_errors() {
    let store = store();
    store.upsert_metadata(&covered_call("JEPI")).expect("insert");
    store.upsert_metadata(&plain_equity("AAPL")).expect("insert");

    assert_eq!(store.metadata("JEPI").expect("metadata"), covered_call("JEPI"));
    assert_eq!(store.metadata("AAPL").expect("metadata"), plain_equity("AAPL"));
    assert!(store.metadata("NOPE").is_err());
    assert_eq!(store.list_tickers().expect("tickers"), vec!["AAPL", "JEPI"]);
}

#[test]
fn collection_log_is_append_only() {
    let store = store();
    let entry = |outcome, score| DataCollectionLog {
        ticker:             "JEPI".into(),
        attempted_at:       t0(),
        completeness_score: score,
        missing_months:     2,
        outcome,
    };
    store.log_collection(&entry(CollectionOutcome::LowCompleteness, 40.0)).expect("log");
    store.log_collection(&entry(CollectionOutcome::Collected, 95.0)).expect("log");

    let logs = store.collection_logs("JEPI").expect("logs");
    assert_eq!(
        logs,
        vec![
            entry(CollectionOutcome::LowCompleteness, 40.0),
            entry(CollectionOutcome::Collected, 95.0),
        ]
    );
}

#[test]
fn cache_rows_upsert_and_delete_per_ticker() {
    let store = store();
    let quick = CacheKey::new("JEPI", AnalysisType::Quick);
    let deep = CacheKey::new("JEPI", AnalysisType::Deep);
    let other = CacheKey::new("QYLD", AnalysisType::Quick);
    let until = t0() + Duration::days(30);

    assert_eq!(store.get(&quick).expect("get"), None);
    store.put(&quick, "a", until).expect("put");
    store.put(&quick, "b", until).expect("overwrite");
    store.put(&deep, "c", until).expect("put");
    store.put(&other, "d", until).expect("put");
    assert_eq!(store.get(&quick).expect("get").as_deref(), Some("b"));

    assert!(store.delete(&deep).expect("delete"));
    assert!(!store.delete(&deep).expect("delete again"));
    store.put(&deep, "c", until).expect("put");

    assert_eq!(store.delete_ticker("JEPI").expect("delete ticker"), 2);
    assert_eq!(store.get(&quick).expect("get"), None);
    assert_eq!(store.get(&other).expect("get").as_deref(), Some("d"));
}

#[test]
fn service_runs_end_to_end_on_sqlite() {
    init_logging();
    let store = Arc::new(store());
    store.upsert_metadata(&covered_call("JEPI")).expect("metadata");
    store.upsert_metadata(&covered_call("NEW")).expect("metadata");
    store.import_records(&stable_history("JEPI", 24)).expect("import");
    store.import_records(&stable_history("NEW", 3)).expect("import");

    let service = SustainabilityService::with_engine(
        EngineConfig::default_test(),
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::new(ManualClock::new(t0())) as _,
    )
    .expect("service");

    let first = service.get_or_compute("JEPI", AnalysisType::Quick).expect("penalty");
    let cached = service.get_or_compute("JEPI", AnalysisType::Quick).expect("cached");
    assert_eq!(first, cached);
    assert!(store.get(&CacheKey::new("JEPI", AnalysisType::Quick)).expect("row").is_some());

    assert!(matches!(service.analyze("NEW").expect("analyze"), Analysis::Skipped { .. }));
    assert_eq!(
        store.collection_logs("NEW").expect("logs")[0].outcome,
        CollectionOutcome::InsufficientHistory
    );

    assert_eq!(service.invalidate("JEPI").expect("invalidate"), 1);
    assert!(store.get(&CacheKey::new("JEPI", AnalysisType::Quick)).expect("row").is_none());
}
