//! Error types for the windowed metrics store and analysis graph

use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Analysis graph error
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised by the per-window metric store and its query paths
///
/// A missing metric table is deliberately *not* represented here: query
/// entry points return `Option::None` for an absent table so callers can
/// tell "no data yet" apart from a real failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying storage could not be opened, read, or written.
    /// Fatal to the affected window only.
    #[error("Storage access error: {0}")]
    Access(#[from] rusqlite::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The window file does not exist on disk
    #[error("Window file not found: {0}")]
    NotFound(String),

    /// Malformed input (negative limit, bad dimension count, invalid name)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An aggregation token outside {sum, avg, min, max}
    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),
}

/// Errors raised while building or evaluating the analysis graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// A referenced node is not registered in the graph
    #[error("Node not found: {0}")]
    UnknownNode(String),

    /// A node with the same name is already registered
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),

    /// The declared dependency edges contain a cycle
    #[error("Circular dependency detected at '{0}'")]
    Cycle(String),

    /// A node's evaluation against the current window failed
    #[error("Evaluation of '{node}' failed: {source}")]
    Evaluation {
        /// Name of the failing node
        node: String,
        /// The underlying store failure
        source: StoreError,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
