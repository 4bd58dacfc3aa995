//! One-way statistics sink for access failures
//!
//! Every storage access failure (open, commit, close, query, delete) is
//! reported here with a stable error-kind code before being surfaced to the
//! caller or swallowed. The crate only ever writes to the sink; reading and
//! shipping the counts belongs to the embedding process.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Stable error-kind codes reported to the statistics sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Window store open/read/write/commit/close failure
    StoreAccess,
    /// Best-effort window file deletion failure
    WindowPrune,
    /// Analysis node evaluation failure
    GraphEvaluation,
}

impl ErrorKind {
    /// The stable wire code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::StoreAccess => "store_access_error",
            ErrorKind::WindowPrune => "window_prune_error",
            ErrorKind::GraphEvaluation => "graph_evaluation_error",
        }
    }
}

/// One-way sink for error statistics
///
/// Implementations must be cheap and infallible; reporting never blocks or
/// fails the operation being reported.
pub trait StatsReporter: Send + Sync {
    /// Record one occurrence of the given error kind
    fn record_error(&self, kind: ErrorKind);
}

/// Shared reporter handle
pub type SharedReporter = Arc<dyn StatsReporter>;

/// In-memory counting reporter
///
/// The default sink for embedding and tests: counts occurrences per kind
/// and exposes a snapshot keyed by the stable codes.
#[derive(Debug, Default)]
pub struct CounterReporter {
    counts: RwLock<HashMap<ErrorKind, u64>>,
}

impl CounterReporter {
    /// Create an empty counting reporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared handle to a fresh reporter
    pub fn shared() -> SharedReporter {
        Arc::new(Self::new())
    }

    /// Occurrences recorded for one kind
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counts.read().get(&kind).copied().unwrap_or(0)
    }

    /// Snapshot of all counts keyed by stable code
    pub fn snapshot(&self) -> HashMap<&'static str, u64> {
        self.counts
            .read()
            .iter()
            .map(|(kind, count)| (kind.code(), *count))
            .collect()
    }
}

impl StatsReporter for CounterReporter {
    fn record_error(&self, kind: ErrorKind) {
        *self.counts.write().entry(kind).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate_per_kind() {
        let reporter = CounterReporter::new();
        reporter.record_error(ErrorKind::StoreAccess);
        reporter.record_error(ErrorKind::StoreAccess);
        reporter.record_error(ErrorKind::WindowPrune);

        assert_eq!(reporter.count(ErrorKind::StoreAccess), 2);
        assert_eq!(reporter.count(ErrorKind::WindowPrune), 1);
        assert_eq!(reporter.count(ErrorKind::GraphEvaluation), 0);
    }

    #[test]
    fn snapshot_uses_stable_codes() {
        let reporter = CounterReporter::new();
        reporter.record_error(ErrorKind::GraphEvaluation);

        let snapshot = reporter.snapshot();
        assert_eq!(snapshot.get("graph_evaluation_error"), Some(&1));
    }
}
