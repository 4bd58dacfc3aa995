//! Cross-metric aggregation queries over one window
//!
//! Builds a per-metric aggregated sub-view (group by the requested
//! dimensions, aggregate the matching fixed column), then merges the
//! sub-views into one dimension-keyed result:
//!
//! ```text
//! per-metric sub-views               union                 re-group
//! | shard | cpu |                | shard | cpu | rss |  | shard | cpu | rss |
//! | 0     | 10  |                | 0     | 10  | -   |  | 0     | 10  | 54  |
//! | 1     | 20  |        ->      | 1     | 20  | -   |  | 1     | 20  | -   |
//! | shard | rss |                | 0     | -   | 54  |  | 2     | -   | 47  |
//! | 0     | 54  |                | 2     | -   | 47  |
//! | 2     | 47  |
//! ```
//!
//! A dimension tuple present for one metric but absent for another keeps the
//! explicit no-value marker, never a fabricated zero. A metric whose table
//! does not exist in the window contributes a *missing* sub-view, which is
//! distinguishable from a table that exists but has no rows; if every
//! sub-view is missing the overall result is absent (`None`).

use rusqlite::Statement;

use crate::error::StoreError;
use crate::types::{
    quoted, validate_identifier, AggregatedRow, Aggregation, MergedResult, MergedRow,
    MetricQuery, MetricResult, AGGREGATE_COLUMNS,
};

use super::window::WindowStore;

/// Aggregation query engine borrowing one window's store
pub struct QueryEngine<'a> {
    store: &'a WindowStore,
}

impl<'a> QueryEngine<'a> {
    /// Create an engine over the given window
    pub fn new(store: &'a WindowStore) -> Self {
        Self { store }
    }

    /// Merge several metrics into one result keyed by dimension tuple
    ///
    /// Applies each metric's aggregation over its matching fixed column,
    /// grouped by the shared `dimensions` (which may be empty for a global
    /// aggregate), and outer-unions the per-metric sub-views as described in
    /// the module docs.
    ///
    /// Returns `None` when every requested metric table is missing from the
    /// window, distinct from `Some` with zero rows.
    pub fn query_merged(
        &self,
        queries: &[MetricQuery],
        dimensions: &[String],
    ) -> Result<Option<MergedResult>, StoreError> {
        if queries.is_empty() {
            return Err(StoreError::InvalidArgument(
                "at least one metric is required".into(),
            ));
        }
        for query in queries {
            validate_identifier(&query.metric)?;
        }
        for dimension in dimensions {
            validate_identifier(dimension)?;
        }

        let dimension_list: Vec<String> = dimensions.iter().map(|d| quoted(d)).collect();
        let group_clause = if dimension_list.is_empty() {
            String::new()
        } else {
            format!(" GROUP BY {}", dimension_list.join(", "))
        };

        // One aggregated sub-view per metric whose table exists; missing
        // tables are skipped so their columns stay NULL in the union.
        let mut sub_views = Vec::new();
        for (i, query) in queries.iter().enumerate() {
            if !self.store.metric_exists(&query.metric) {
                tracing::debug!(metric = %query.metric, "metric table missing; treating as absent");
                continue;
            }

            let mut columns = dimension_list.clone();
            for (j, other) in queries.iter().enumerate() {
                if i == j {
                    columns.push(format!(
                        "{}({}) AS {}",
                        query.aggregation.sql_function(),
                        quoted(query.aggregation.column()),
                        quoted(&query.metric)
                    ));
                } else {
                    columns.push(format!("NULL AS {}", quoted(&other.metric)));
                }
            }
            sub_views.push(format!(
                "SELECT {} FROM {}{}",
                columns.join(", "),
                quoted(&query.metric),
                group_clause
            ));
        }

        if sub_views.is_empty() {
            return Ok(None);
        }

        // Re-group the union by the shared dimensions; the non-null maximum
        // per metric column collapses rows from different sub-views that
        // share one dimension tuple.
        let mut outer_columns = dimension_list.clone();
        for query in queries {
            let name = quoted(&query.metric);
            outer_columns.push(format!("MAX({}) AS {}", name, name));
        }
        let sql = format!(
            "SELECT {} FROM ({}){}",
            outer_columns.join(", "),
            sub_views.join(" UNION "),
            group_clause
        );

        let mut stmt = self.store.track(self.store.connection().prepare(&sql))?;
        let rows =
            self.store
                .track(Self::read_merged_rows(&mut stmt, dimensions.len(), queries.len()))?;

        Ok(Some(MergedResult {
            dimensions: dimensions.to_vec(),
            metrics: queries.iter().map(|q| q.metric.clone()).collect(),
            rows,
        }))
    }

    /// Token-level entry point for [`Self::query_merged`]
    ///
    /// Parses every aggregation token up front, so an unsupported token
    /// fails before any table is touched.
    pub fn query_merged_named(
        &self,
        metrics: &[&str],
        aggregations: &[&str],
        dimensions: &[&str],
    ) -> Result<Option<MergedResult>, StoreError> {
        if metrics.len() != aggregations.len() {
            return Err(StoreError::InvalidArgument(format!(
                "{} metrics but {} aggregations",
                metrics.len(),
                aggregations.len()
            )));
        }

        let queries: Vec<MetricQuery> = metrics
            .iter()
            .zip(aggregations)
            .map(|(metric, token)| Ok(MetricQuery::new(*metric, token.parse::<Aggregation>()?)))
            .collect::<Result<_, StoreError>>()?;
        let dimensions: Vec<String> = dimensions.iter().map(|d| d.to_string()).collect();

        self.query_merged(&queries, &dimensions)
    }

    /// Scan every row of one metric's table, no grouping
    ///
    /// Returns `None` when the table does not exist in this window.
    pub fn query_metric_all(&self, metric: &str) -> Result<Option<MetricResult>, StoreError> {
        validate_identifier(metric)?;
        if !self.store.metric_exists(metric) {
            return Ok(None);
        }

        let sql = format!("SELECT * FROM {}", quoted(metric));
        let mut stmt = self.store.track(self.store.connection().prepare(&sql))?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let dimension_count = columns.len() - AGGREGATE_COLUMNS.len();
        let rows = self
            .store
            .track(Self::read_aggregated_rows(&mut stmt, dimension_count, &[]))?;

        Ok(Some(MetricResult { columns, rows }))
    }

    /// Scan one metric, selecting the given dimensions plus all four
    /// aggregate columns, bounded by `limit`
    ///
    /// A `limit` of zero returns zero rows. Returns `None` when the table
    /// does not exist: "no data yet" rather than "zero rows matched".
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `limit` is negative.
    pub fn query_metric(
        &self,
        metric: &str,
        dimensions: &[&str],
        limit: i64,
    ) -> Result<Option<MetricResult>, StoreError> {
        validate_identifier(metric)?;
        for dimension in dimensions {
            validate_identifier(dimension)?;
        }
        if !self.store.metric_exists(metric) {
            return Ok(None);
        }
        if limit < 0 {
            return Err(StoreError::InvalidArgument(
                "limit must be non-negative".into(),
            ));
        }

        let mut columns: Vec<String> = dimensions.iter().map(|d| quoted(d)).collect();
        for agg in AGGREGATE_COLUMNS {
            columns.push(quoted(agg));
        }
        let sql = format!(
            "SELECT {} FROM {} LIMIT ?1",
            columns.join(", "),
            quoted(metric)
        );

        let mut stmt = self.store.track(self.store.connection().prepare(&sql))?;
        let names: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let rows = self
            .store
            .track(Self::read_aggregated_rows(&mut stmt, dimensions.len(), &[limit]))?;

        Ok(Some(MetricResult {
            columns: names,
            rows,
        }))
    }

    /// Total one fixed column over rows not attributable to any entity
    ///
    /// Sums the chosen aggregate column across rows where `filter_dimension`
    /// is explicitly the no-value marker: shared/background consumption that
    /// must still count toward an aggregate total even though it cannot be
    /// attributed to a specific sub-entity. Reassigning entities cannot
    /// reduce this portion, and some of it may belong to entities that are
    /// not yet attributed; this misattribution is accepted.
    ///
    /// Returns `None` when the table does not exist; a window with no
    /// unattributed rows totals to `Some(0.0)`.
    pub fn query_unattributed(
        &self,
        metric: &str,
        column: Aggregation,
        filter_dimension: &str,
    ) -> Result<Option<f64>, StoreError> {
        validate_identifier(metric)?;
        validate_identifier(filter_dimension)?;
        if !self.store.metric_exists(metric) {
            return Ok(None);
        }

        let sql = format!(
            "SELECT SUM({}) FROM {} WHERE {} IS NULL",
            quoted(column.column()),
            quoted(metric),
            quoted(filter_dimension)
        );
        let total: Option<f64> = self
            .store
            .track(self.store.connection().query_row(&sql, [], |row| row.get(0)))?;
        Ok(Some(total.unwrap_or(0.0)))
    }

    fn read_merged_rows(
        stmt: &mut Statement<'_>,
        dimension_count: usize,
        metric_count: usize,
    ) -> Result<Vec<MergedRow>, rusqlite::Error> {
        let rows = stmt.query_map([], |row| {
            let mut dimensions = Vec::with_capacity(dimension_count);
            for i in 0..dimension_count {
                dimensions.push(row.get::<_, Option<String>>(i)?);
            }
            let mut values = Vec::with_capacity(metric_count);
            for i in 0..metric_count {
                values.push(row.get::<_, Option<f64>>(dimension_count + i)?);
            }
            Ok(MergedRow { dimensions, values })
        })?;
        rows.collect()
    }

    fn read_aggregated_rows(
        stmt: &mut Statement<'_>,
        dimension_count: usize,
        params: &[i64],
    ) -> Result<Vec<AggregatedRow>, rusqlite::Error> {
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            let mut dimensions = Vec::with_capacity(dimension_count);
            for i in 0..dimension_count {
                dimensions.push(row.get::<_, Option<String>>(i)?);
            }
            Ok(AggregatedRow {
                dimensions,
                sum: row.get(dimension_count)?,
                avg: row.get(dimension_count + 1)?,
                min: row.get(dimension_count + 2)?,
                max: row.get(dimension_count + 3)?,
            })
        })?;
        rows.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::stats::CounterReporter;
    use crate::types::DimensionSchema;
    use tempfile::TempDir;

    fn store_with_data(dir: &TempDir) -> WindowStore {
        let config = StorageConfig::with_prefix(dir.path().join("metrics_"));
        let store = WindowStore::open(&config, CounterReporter::shared(), 100).unwrap();

        let schema = DimensionSchema::new(["shard_id"]).unwrap();
        store.create_metric_table("cpu_utilization", &schema).unwrap();
        store.create_metric_table("paging_rss", &schema).unwrap();
        store.create_metric_table("empty_metric", &schema).unwrap();

        store
            .put_aggregated_row("cpu_utilization", &[Some("1")], 10.0, 10.0, 10.0, 10.0)
            .unwrap();
        store
            .put_aggregated_row("paging_rss", &[Some("1")], 20.0, 20.0, 20.0, 20.0)
            .unwrap();
        store
            .put_aggregated_row("paging_rss", &[Some("2")], 5.0, 5.0, 5.0, 5.0)
            .unwrap();
        store
    }

    #[test]
    fn merges_metrics_over_union_of_dimension_support() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let result = engine
            .query_merged_named(
                &["cpu_utilization", "paging_rss"],
                &["sum", "sum"],
                &["shard_id"],
            )
            .unwrap()
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result.value(&[Some("1")], "cpu_utilization"), Some(10.0));
        assert_eq!(result.value(&[Some("1")], "paging_rss"), Some(20.0));
        // Metric A has no row for shard 2: explicit no-value, not zero.
        assert_eq!(result.value(&[Some("2")], "cpu_utilization"), None);
        assert_eq!(result.value(&[Some("2")], "paging_rss"), Some(5.0));
        store.close().unwrap();
    }

    #[test]
    fn second_order_aggregation_reads_the_matching_column() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::with_prefix(dir.path().join("metrics_"));
        let store = WindowStore::open(&config, CounterReporter::shared(), 101).unwrap();
        let schema = DimensionSchema::new(["index_name"]).unwrap();
        store.create_metric_table("latency", &schema).unwrap();
        // Two buckets for the same index: avg-of-avgs, not a weighted mean.
        store
            .put_aggregated_row("latency", &[Some("nyc_taxis")], 30.0, 15.0, 10.0, 20.0)
            .unwrap();
        store
            .put_aggregated_row("latency", &[Some("nyc_taxis")], 5.0, 5.0, 5.0, 5.0)
            .unwrap();

        let engine = QueryEngine::new(&store);
        let result = engine
            .query_merged_named(&["latency"], &["avg"], &["index_name"])
            .unwrap()
            .unwrap();
        assert_eq!(result.value(&[Some("nyc_taxis")], "latency"), Some(10.0));

        let result = engine
            .query_merged_named(&["latency"], &["max"], &["index_name"])
            .unwrap()
            .unwrap();
        assert_eq!(result.value(&[Some("nyc_taxis")], "latency"), Some(20.0));
        store.close().unwrap();
    }

    #[test]
    fn unsupported_aggregation_fails_before_io() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let err = engine
            .query_merged_named(
                &["no_such_metric", "cpu_utilization"],
                &["sum", "median"],
                &["shard_id"],
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedAggregation(token) if token == "median"));
        store.close().unwrap();
    }

    #[test]
    fn missing_tables_yield_absent_result_only_when_all_missing() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        // All requested tables missing: absent overall.
        let absent = engine
            .query_merged_named(&["heap_used", "gc_time"], &["avg", "avg"], &["shard_id"])
            .unwrap();
        assert!(absent.is_none());

        // One missing, one present: the present metric drives the rows.
        let partial = engine
            .query_merged_named(
                &["heap_used", "cpu_utilization"],
                &["avg", "sum"],
                &["shard_id"],
            )
            .unwrap()
            .unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial.value(&[Some("1")], "heap_used"), None);
        assert_eq!(partial.value(&[Some("1")], "cpu_utilization"), Some(10.0));
        store.close().unwrap();
    }

    #[test]
    fn missing_table_and_empty_table_are_distinct() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let missing = engine.query_metric_all("never_created").unwrap();
        let empty = engine.query_metric_all("empty_metric").unwrap();

        assert!(missing.is_none());
        let empty = empty.unwrap();
        assert!(empty.is_empty());
        assert_ne!(missing, Some(empty));
        store.close().unwrap();
    }

    #[test]
    fn full_scan_returns_all_columns_in_order() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let result = engine.query_metric_all("paging_rss").unwrap().unwrap();
        assert_eq!(result.columns, ["shard_id", "sum", "avg", "min", "max"]);
        assert_eq!(result.len(), 2);
        store.close().unwrap();
    }

    #[test]
    fn limited_scan_bounds_and_validates() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let zero = engine
            .query_metric("paging_rss", &["shard_id"], 0)
            .unwrap()
            .unwrap();
        assert!(zero.is_empty());

        let one = engine
            .query_metric("paging_rss", &["shard_id"], 1)
            .unwrap()
            .unwrap();
        assert_eq!(one.len(), 1);

        let err = engine
            .query_metric("paging_rss", &["shard_id"], -1)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        // Missing table: absent result, not an error.
        assert!(engine
            .query_metric("never_created", &["shard_id"], 10)
            .unwrap()
            .is_none());
        store.close().unwrap();
    }

    #[test]
    fn global_aggregate_with_no_dimensions() {
        let dir = TempDir::new().unwrap();
        let store = store_with_data(&dir);
        let engine = QueryEngine::new(&store);

        let result = engine
            .query_merged_named(&["paging_rss"], &["sum"], &[])
            .unwrap()
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.value(&[], "paging_rss"), Some(25.0));
        store.close().unwrap();
    }

    #[test]
    fn unattributed_total_filters_on_null_dimension() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::with_prefix(dir.path().join("metrics_"));
        let store = WindowStore::open(&config, CounterReporter::shared(), 102).unwrap();
        let schema = DimensionSchema::new(["shard_id", "operation"]).unwrap();
        store.create_metric_table("cpu_utilization", &schema).unwrap();

        // Attributed row plus two shard-independent rows (GC, generic).
        store
            .put_aggregated_row(
                "cpu_utilization",
                &[Some("1"), Some("bulk")],
                4.0,
                4.0,
                4.0,
                4.0,
            )
            .unwrap();
        store
            .put_aggregated_row("cpu_utilization", &[None, Some("GC")], 0.2, 0.2, 0.2, 0.2)
            .unwrap();
        store
            .put_aggregated_row(
                "cpu_utilization",
                &[None, Some("generic")],
                0.3,
                0.3,
                0.3,
                0.3,
            )
            .unwrap();

        let engine = QueryEngine::new(&store);
        let total = engine
            .query_unattributed("cpu_utilization", Aggregation::Max, "shard_id")
            .unwrap()
            .unwrap();
        assert!((total - 0.5).abs() < 1e-9);

        // Missing table stays distinguishable.
        assert!(engine
            .query_unattributed("heap_used", Aggregation::Max, "shard_id")
            .unwrap()
            .is_none());
        store.close().unwrap();
    }
}
