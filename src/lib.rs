//! Thermograph - windowed metrics store and analysis graph
//!
//! The analytical core of a cluster performance-diagnosis agent:
//! - A per-window, per-metric tabular store: one single-file database per
//!   time window, one table per metric, batched ingestion behind an
//!   explicit commit boundary
//! - A cross-metric aggregation engine that joins heterogeneous per-metric
//!   tables on shared dimensions into one unified result
//! - A window lifecycle registry that recovers and prunes on-disk windows
//! - An analysis graph of scheduled nodes deriving higher-order signals
//!   (per-resource temperature) from the current window

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

/// One-way statistics sink for access failures
pub mod stats;

/// Per-window metric store, query engine, and window registry
pub mod store;

/// Analysis graph evaluated on a recurring schedule
pub mod graph;

// Re-export main types
pub use config::{AnalysisConfig, Config, StorageConfig};
pub use error::{Error, GraphError, Result, StoreError};
pub use graph::{
    AnalysisGraph, AnalysisNode, GraphScheduler, MetricsNode, NodeOutcome, SchedulerConfig,
    TemperatureNode, WindowSource,
};
pub use stats::{CounterReporter, ErrorKind, SharedReporter, StatsReporter};
pub use store::{MetricBatch, QueryEngine, WindowRegistry, WindowStore};
pub use types::{
    AggregatedRow, Aggregation, DimensionSchema, MergedResult, MergedRow, MetricQuery,
    MetricResult, WindowStart, AGGREGATE_COLUMNS,
};
