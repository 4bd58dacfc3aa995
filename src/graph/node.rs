//! Analysis nodes
//!
//! A node is a pure function from the current window to a derived result.
//! Variants are data-tagged rather than subclassed: the temperature-style
//! calculator is the plain metrics node plus an unattributed-cost filter
//! configuration.

use std::time::Duration;

use crate::error::StoreError;
use crate::store::{QueryEngine, WindowStore};
use crate::types::{Aggregation, MergedResult, MetricQuery};

/// Derived result of one node evaluation
///
/// `Absent` means no underlying data existed for the node's inputs in the
/// evaluated window; deliberately distinct from a result with zero rows.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutcome {
    /// No input metric table existed in the window
    Absent,
    /// Dimension-keyed values, one column per input metric
    Rows(MergedResult),
    /// A single derived value
    Scalar(f64),
}

impl NodeOutcome {
    /// Whether the outcome carries no data
    pub fn is_absent(&self) -> bool {
        matches!(self, NodeOutcome::Absent)
    }
}

/// A unit of the analysis graph
///
/// Implementations hold no window handle across ticks: the store reference
/// is valid only for the duration of one evaluation call, since windows
/// rotate and old ones are deleted independently.
pub trait AnalysisNode: Send + Sync {
    /// Node name, unique within a graph
    fn name(&self) -> &str;

    /// Declared evaluation interval
    fn interval(&self) -> Duration;

    /// Evaluate against the given window
    fn evaluate(&self, window: &WindowStore) -> Result<NodeOutcome, StoreError>;
}

/// Node that merges its input metrics into a dimension-keyed result
#[derive(Debug, Clone)]
pub struct MetricsNode {
    name: String,
    interval: Duration,
    queries: Vec<MetricQuery>,
    dimensions: Vec<String>,
}

impl MetricsNode {
    /// Create a node over the given metric/aggregation pairs, grouped by
    /// the shared dimensions
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        queries: Vec<MetricQuery>,
        dimensions: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            queries,
            dimensions,
        }
    }

    /// The node's input metrics
    pub fn queries(&self) -> &[MetricQuery] {
        &self.queries
    }
}

impl AnalysisNode for MetricsNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn evaluate(&self, window: &WindowStore) -> Result<NodeOutcome, StoreError> {
        let engine = QueryEngine::new(window);
        match engine.query_merged(&self.queries, &self.dimensions)? {
            Some(result) => Ok(NodeOutcome::Rows(result)),
            None => Ok(NodeOutcome::Absent),
        }
    }
}

/// Temperature-style calculator over unattributed consumption
///
/// Totals one fixed column of a metric across rows where the filter
/// dimension is explicitly the no-value marker: consumption that belongs
/// to no finer-grained entity (e.g. GC, connection handling) yet still
/// heats the resource. Reassigning entities cannot reduce this portion;
/// counting it toward the resource total is the accepted approximation.
#[derive(Debug, Clone)]
pub struct TemperatureNode {
    name: String,
    interval: Duration,
    metric: String,
    column: Aggregation,
    filter_dimension: String,
}

impl TemperatureNode {
    /// Create a calculator over `metric`, totalling `column` across rows
    /// whose `filter_dimension` is the no-value marker
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        metric: impl Into<String>,
        column: Aggregation,
        filter_dimension: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            metric: metric.into(),
            column,
            filter_dimension: filter_dimension.into(),
        }
    }
}

impl AnalysisNode for TemperatureNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn evaluate(&self, window: &WindowStore) -> Result<NodeOutcome, StoreError> {
        let engine = QueryEngine::new(window);
        match engine.query_unattributed(&self.metric, self.column, &self.filter_dimension)? {
            Some(total) => {
                tracing::debug!(node = %self.name, total, "unattributed consumption");
                Ok(NodeOutcome::Scalar(total))
            }
            None => Ok(NodeOutcome::Absent),
        }
    }
}
