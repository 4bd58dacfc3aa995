//! Core data types used throughout the metrics store
//!
//! # Key Types
//!
//! - **`WindowStart`**: start timestamp identifying one metrics window
//! - **`DimensionSchema`**: ordered grouping columns for one metric table
//! - **`Aggregation`**: the fixed aggregation vocabulary (sum/avg/min/max)
//! - **`AggregatedRow`**: one pre-aggregated row per dimension combination
//! - **`MetricResult`** / **`MergedResult`**: query result sets
//!
//! # Example
//!
//! ```rust
//! use thermograph::types::{Aggregation, DimensionSchema, MetricQuery};
//!
//! let schema = DimensionSchema::new(["shard_id", "index_name"]).unwrap();
//! assert_eq!(schema.len(), 2);
//!
//! let agg: Aggregation = "avg".parse().unwrap();
//! let query = MetricQuery::new("cpu_utilization", agg);
//! assert_eq!(query.aggregation.column(), "avg");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Start timestamp of a metrics window
///
/// A monotonically increasing epoch timestamp (seconds or milliseconds,
/// caller-defined unit, used consistently). The decimal rendering of this
/// value is appended to the configured file prefix to name the window's
/// on-disk store.
pub type WindowStart = u64;

/// The four fixed aggregate columns every metric table carries, in order
pub const AGGREGATE_COLUMNS: [&str; 4] = ["sum", "avg", "min", "max"];

/// Validate a metric or dimension name before it is used as an identifier
///
/// Names are interpolated into SQL (quoted), so only a conservative
/// character set is accepted: a leading ASCII letter or underscore followed
/// by ASCII alphanumerics, `_`, `-` or `.`.
pub(crate) fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid_head = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));

    if valid_head && valid_tail {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "invalid identifier: {:?}",
            name
        )))
    }
}

/// Double-quote a validated identifier for interpolation into SQL
pub(crate) fn quoted(name: &str) -> String {
    format!("\"{}\"", name)
}

// ============================================================================
// Dimension Schema
// ============================================================================

/// Ordered, named set of grouping columns for one metric table
///
/// The dimension set is fixed for the lifetime of the window once the
/// metric's table has been created; there is no schema migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSchema {
    columns: Vec<String>,
}

impl DimensionSchema {
    /// Create a schema from an ordered list of dimension names
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the list is empty or any name is not a
    /// valid identifier.
    pub fn new<I, S>(columns: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err(StoreError::InvalidArgument(
                "dimension schema requires at least one column".into(),
            ));
        }
        for column in &columns {
            validate_identifier(column)?;
        }
        Ok(Self { columns })
    }

    /// Ordered dimension column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of dimension columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the schema has no columns (never true for a constructed schema)
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

// ============================================================================
// Aggregation Vocabulary
// ============================================================================

/// The closed aggregation vocabulary
///
/// Each variant reads the fixed table column of the same name, so requesting
/// e.g. `Avg` applies `AVG` over the stored `avg` column. This second-order
/// aggregation of a pre-aggregated column loses precision when re-averaging
/// averages; that behavior is intentional and must not be "fixed", because
/// downstream consumers calibrate against the values it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Sum of the `sum` column
    Sum,
    /// Average of the `avg` column
    Avg,
    /// Minimum of the `min` column
    Min,
    /// Maximum of the `max` column
    Max,
}

impl Aggregation {
    /// All vocabulary members, in canonical column order
    pub const ALL: [Aggregation; 4] = [
        Aggregation::Sum,
        Aggregation::Avg,
        Aggregation::Min,
        Aggregation::Max,
    ];

    /// The canonical lowercase token
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    /// The fixed table column this aggregation reads
    pub fn column(&self) -> &'static str {
        self.as_str()
    }

    /// The SQL aggregate function applied over [`Self::column`]
    pub(crate) fn sql_function(&self) -> &'static str {
        match self {
            Aggregation::Sum => "SUM",
            Aggregation::Avg => "AVG",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(Aggregation::Sum),
            "avg" => Ok(Aggregation::Avg),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(StoreError::UnsupportedAggregation(other.to_string())),
        }
    }
}

// ============================================================================
// Rows and Result Sets
// ============================================================================

/// One pre-aggregated row for a unique dimension-value combination
///
/// The store never retains raw samples; every row carries the four rollup
/// statistics for one flush window. A `None` dimension value maps to SQL
/// NULL, the explicit "no value" marker (e.g. consumption not attributable
/// to any shard).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedRow {
    /// Dimension values in schema order; `None` is the explicit no-value marker
    pub dimensions: Vec<Option<String>>,
    /// Sum over the bucket
    pub sum: f64,
    /// Average over the bucket
    pub avg: f64,
    /// Minimum over the bucket
    pub min: f64,
    /// Maximum over the bucket
    pub max: f64,
}

impl AggregatedRow {
    /// Create a row from dimension values and the four rollup statistics
    pub fn new(dimensions: Vec<Option<String>>, sum: f64, avg: f64, min: f64, max: f64) -> Self {
        Self {
            dimensions,
            sum,
            avg,
            min,
            max,
        }
    }
}

/// Result of a single-metric scan
///
/// Query paths return `Option<MetricResult>`: `None` means the metric's
/// table does not exist in this window, which is distinct from a result with
/// zero rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Column names in select order (dimensions, then the aggregate columns)
    pub columns: Vec<String>,
    /// Returned rows
    pub rows: Vec<AggregatedRow>,
}

impl MetricResult {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result contains no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One requested metric with its chosen aggregation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricQuery {
    /// Metric table name
    pub metric: String,
    /// Aggregation applied over the metric's matching fixed column
    pub aggregation: Aggregation,
}

impl MetricQuery {
    /// Create a metric/aggregation pair
    pub fn new(metric: impl Into<String>, aggregation: Aggregation) -> Self {
        Self {
            metric: metric.into(),
            aggregation,
        }
    }
}

/// One row of a merged multi-metric result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    /// Grouping dimension values, in requested order
    pub dimensions: Vec<Option<String>>,
    /// One value per requested metric; `None` when the metric has no row
    /// for this dimension tuple (never a fabricated zero)
    pub values: Vec<Option<f64>>,
}

/// Unified result of a multi-metric query, keyed by dimension tuple
///
/// Produced by merging per-metric aggregated sub-views over the union of
/// their dimension support. Returned as `Option<MergedResult>`: `None`
/// means every requested metric table was missing from the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedResult {
    /// Grouping dimension column names
    pub dimensions: Vec<String>,
    /// Metric column names, in requested order
    pub metrics: Vec<String>,
    /// Merged rows, one per dimension tuple present in any metric
    pub rows: Vec<MergedRow>,
}

impl MergedResult {
    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the result contains no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up the value of `metric` for an exact dimension tuple
    ///
    /// Returns `None` when the tuple is absent or the metric has no value
    /// for it.
    pub fn value(&self, dimensions: &[Option<&str>], metric: &str) -> Option<f64> {
        let metric_idx = self.metrics.iter().position(|m| m == metric)?;
        let row = self.rows.iter().find(|row| {
            row.dimensions.len() == dimensions.len()
                && row
                    .dimensions
                    .iter()
                    .zip(dimensions)
                    .all(|(have, want)| have.as_deref() == *want)
        })?;
        row.values.get(metric_idx).copied().flatten()
    }
}
