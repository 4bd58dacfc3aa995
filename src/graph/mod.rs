//! Analysis graph over the windowed metrics store
//!
//! A directed graph of analysis nodes evaluated on a recurring interval.
//! Each node pulls its declared metrics from the current window through the
//! query engine; independent connected components have no cross-component
//! ordering constraints, while nodes inside a component evaluate in
//! dependency order.

pub mod node;
pub mod scheduler;

pub use node::{AnalysisNode, MetricsNode, NodeOutcome, TemperatureNode};
pub use scheduler::{
    AnalysisGraph, GraphScheduler, NodeReport, RegistrySource, SchedulerConfig, WindowSource,
};
