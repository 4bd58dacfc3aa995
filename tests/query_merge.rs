//! Multi-metric merge and window listing integration tests
//!
//! Covers the cross-metric query contract end to end:
//! - Outer-union merge over differing per-metric dimension support
//! - The absent-result vs. zero-rows distinction on every read path
//! - Aggregation vocabulary closure at the token entry point
//! - Window listing/pruning against a directory with junk files

use std::collections::BTreeSet;

use tempfile::TempDir;
use thermograph::{
    Aggregation, CounterReporter, DimensionSchema, MetricQuery, QueryEngine, StorageConfig,
    StoreError, WindowRegistry, WindowStore,
};

fn committed_window(config: &StorageConfig, window_start: u64) -> WindowStore {
    let reporter = CounterReporter::shared();
    let store = WindowStore::open(config, reporter.clone(), window_start).unwrap();

    let schema = DimensionSchema::new(["shard_id"]).unwrap();
    store.create_metric_table("cpu_utilization", &schema).unwrap();
    store.create_metric_table("paging_rss", &schema).unwrap();

    store
        .put_aggregated_row("cpu_utilization", &[Some("1")], 10.0, 10.0, 10.0, 10.0)
        .unwrap();
    store
        .put_aggregated_row("paging_rss", &[Some("1")], 20.0, 20.0, 20.0, 20.0)
        .unwrap();
    store
        .put_aggregated_row("paging_rss", &[Some("2")], 5.0, 5.0, 5.0, 5.0)
        .unwrap();

    store.commit().unwrap();
    store.close().unwrap();
    WindowStore::open_existing(config, reporter, window_start).unwrap()
}

/// The documented merge example: A={(x=1):10}, B={(x=1):20,(x=2):5}
/// grouped by x yields {(1):{A:10,B:20}, (2):{A:absent,B:5}}
#[test]
fn merge_spans_the_union_of_dimension_support() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::with_prefix(temp_dir.path().join("metrics_"));
    let reader = committed_window(&config, 100);

    let engine = QueryEngine::new(&reader);
    let result = engine
        .query_merged(
            &[
                MetricQuery::new("cpu_utilization", Aggregation::Sum),
                MetricQuery::new("paging_rss", Aggregation::Sum),
            ],
            &["shard_id".to_string()],
        )
        .unwrap()
        .unwrap();

    assert_eq!(result.dimensions, ["shard_id"]);
    assert_eq!(result.metrics, ["cpu_utilization", "paging_rss"]);
    assert_eq!(result.len(), 2);

    assert_eq!(result.value(&[Some("1")], "cpu_utilization"), Some(10.0));
    assert_eq!(result.value(&[Some("1")], "paging_rss"), Some(20.0));
    assert_eq!(result.value(&[Some("2")], "cpu_utilization"), None);
    assert_eq!(result.value(&[Some("2")], "paging_rss"), Some(5.0));
    reader.close().unwrap();
}

/// Absent results and zero-row results never compare equal, on the merged
/// path and on both single-metric scan paths
#[test]
fn absent_and_empty_stay_distinguishable() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::with_prefix(temp_dir.path().join("metrics_"));
    let reporter = CounterReporter::shared();

    let store = WindowStore::open(&config, reporter.clone(), 200).unwrap();
    let schema = DimensionSchema::new(["shard_id"]).unwrap();
    store.create_metric_table("created_but_empty", &schema).unwrap();
    store.commit().unwrap();
    store.close().unwrap();

    let reader = WindowStore::open_existing(&config, reporter, 200).unwrap();
    let engine = QueryEngine::new(&reader);

    // Merged path: all tables missing -> absent; empty table -> zero rows
    assert!(engine
        .query_merged_named(&["never_created"], &["sum"], &["shard_id"])
        .unwrap()
        .is_none());
    let empty = engine
        .query_merged_named(&["created_but_empty"], &["sum"], &["shard_id"])
        .unwrap()
        .unwrap();
    assert!(empty.is_empty());

    // Scan paths agree
    assert!(engine.query_metric_all("never_created").unwrap().is_none());
    assert!(engine
        .query_metric_all("created_but_empty")
        .unwrap()
        .unwrap()
        .is_empty());
    assert!(engine
        .query_metric("never_created", &["shard_id"], 10)
        .unwrap()
        .is_none());
    assert!(engine
        .query_metric("created_but_empty", &["shard_id"], 10)
        .unwrap()
        .unwrap()
        .is_empty());
    reader.close().unwrap();
}

/// Every query entry point rejects tokens outside {sum, avg, min, max}
/// before touching storage
#[test]
fn vocabulary_closure_on_the_token_entry_point() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::with_prefix(temp_dir.path().join("metrics_"));
    let reader = committed_window(&config, 300);
    let engine = QueryEngine::new(&reader);

    for token in ["count", "p50", "MAX", ""] {
        let err = engine
            .query_merged_named(&["cpu_utilization"], &[token], &["shard_id"])
            .unwrap_err();
        assert!(
            matches!(err, StoreError::UnsupportedAggregation(_)),
            "token {:?} must be rejected",
            token
        );
    }

    // Parsing is the same closure the typed API relies on
    assert!("avg".parse::<Aggregation>().is_ok());
    assert!("median".parse::<Aggregation>().is_err());
    reader.close().unwrap();
}

/// Listing recovers only well-formed windows from a directory that also
/// contains malformed and unrelated entries, and pruning is best-effort
#[test]
fn registry_recovers_and_prunes_windows() {
    let temp_dir = TempDir::new().unwrap();
    let config = StorageConfig::with_prefix(temp_dir.path().join("metrics_"));

    // Two real committed windows
    for window_start in [100, 200] {
        let store =
            WindowStore::open(&config, CounterReporter::shared(), window_start).unwrap();
        store.commit().unwrap();
        store.close().unwrap();
    }
    // Junk alongside them
    std::fs::write(temp_dir.path().join("metrics_ABC"), b"junk").unwrap();
    std::fs::write(temp_dir.path().join("notes.txt"), b"junk").unwrap();

    let registry = WindowRegistry::new(config.clone(), CounterReporter::shared());
    assert_eq!(registry.list_on_disk_windows(), BTreeSet::from([100, 200]));
    assert_eq!(registry.latest_window(), Some(200));

    // Prune the older window; the newer one still opens
    assert_eq!(registry.prune_older_than(200), 1);
    assert_eq!(registry.list_on_disk_windows(), BTreeSet::from([200]));

    let survivor = registry.open_latest().unwrap();
    assert_eq!(survivor.window_start(), 200);
    survivor.close().unwrap();

    // Deleting a window that is already gone is swallowed, not raised
    registry.delete_window(100);
}
