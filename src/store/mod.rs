//! Per-window metric table store
//!
//! One single-file store per time window, one table per metric. The window
//! layer handles table creation, batched ingestion, and the explicit commit
//! boundary; the query layer merges heterogeneous per-metric tables into
//! unified dimension-keyed results; the registry enumerates and prunes
//! window files on disk.

pub mod query;
pub mod registry;
pub mod window;

pub use query::QueryEngine;
pub use registry::WindowRegistry;
pub use window::{MetricBatch, WindowStore};
