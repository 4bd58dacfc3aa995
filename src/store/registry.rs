//! Enumeration and pruning of on-disk window stores
//!
//! Window files are named `<prefix><window_start>`; the registry recovers
//! the set of valid windows from a directory scan and reclaims expired ones.
//! All deletion here is best-effort: correctness of the live system never
//! depends on successful cleanup of old windows, so failures are logged and
//! counted, never raised.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::stats::{ErrorKind, SharedReporter};
use crate::types::WindowStart;

use super::window::WindowStore;

/// Registry over the on-disk window files for one configured prefix
pub struct WindowRegistry {
    config: StorageConfig,
    reporter: SharedReporter,
}

impl WindowRegistry {
    /// Create a registry for the given storage configuration
    pub fn new(config: StorageConfig, reporter: SharedReporter) -> Self {
        Self { config, reporter }
    }

    /// The storage configuration this registry scans
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Resolve the on-disk path of one window's store file
    pub fn file_path(&self, window_start: WindowStart) -> PathBuf {
        self.config.file_path(window_start)
    }

    /// Delete one window's file, best-effort
    ///
    /// Failure is logged and counted but never surfaced: window pruning
    /// must not abort the broader process. Deleting a window currently
    /// being read is the caller's sequencing responsibility.
    pub fn delete_window(&self, window_start: WindowStart) {
        self.remove_window_file(window_start);
    }

    fn remove_window_file(&self, window_start: WindowStart) -> bool {
        let path = self.file_path(window_start);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(window = window_start, "deleted window file");
                true
            }
            Err(e) => {
                tracing::error!(
                    path = %path.display(),
                    code = ErrorKind::WindowPrune.code(),
                    error = %e,
                    "failed to delete window file"
                );
                self.reporter.record_error(ErrorKind::WindowPrune);
                false
            }
        }
    }

    /// The set of window timestamps recovered from disk
    ///
    /// Scans the prefix directory and parses the trailing decimal timestamp
    /// of every file matching the naming convention. Files that carry the
    /// prefix but no parseable timestamp are logged and skipped; unrelated
    /// files are ignored. A directory access failure is logged and counted
    /// and yields the empty set; listing is best-effort.
    pub fn list_on_disk_windows(&self) -> BTreeSet<WindowStart> {
        let mut found = BTreeSet::new();
        let (parent, name_prefix) = match self.split_prefix() {
            Ok(parts) => parts,
            Err(e) => {
                tracing::error!(
                    prefix = %self.config.file_prefix.display(),
                    code = ErrorKind::StoreAccess.code(),
                    error = %e,
                    "invalid window file prefix"
                );
                self.reporter.record_error(ErrorKind::StoreAccess);
                return found;
            }
        };

        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(
                    directory = %parent.display(),
                    code = ErrorKind::StoreAccess.code(),
                    error = %e,
                    "failed to scan window directory"
                );
                self.reporter.record_error(ErrorKind::StoreAccess);
                return found;
            }
        };

        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(&name_prefix) else {
                continue;
            };
            match suffix.parse::<WindowStart>() {
                Ok(window_start) => {
                    found.insert(window_start);
                }
                Err(_) => {
                    tracing::warn!(file = name, "unexpected file in window directory");
                }
            }
        }
        found
    }

    /// The most recent window found on disk, if any
    pub fn latest_window(&self) -> Option<WindowStart> {
        self.list_on_disk_windows().into_iter().next_back()
    }

    /// Attach read-only to the most recent committed window
    ///
    /// Returns `None` when no window is on disk or it cannot be opened
    /// (already logged and counted by the open path).
    pub fn open_latest(&self) -> Option<WindowStore> {
        let window_start = self.latest_window()?;
        match WindowStore::open_existing(&self.config, self.reporter.clone(), window_start) {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(window = window_start, error = %e, "failed to open latest window");
                None
            }
        }
    }

    /// Delete every on-disk window older than `cutoff`, best-effort
    ///
    /// Returns the number of windows actually removed; per-file failures
    /// are logged and counted but do not stop the sweep.
    pub fn prune_older_than(&self, cutoff: WindowStart) -> usize {
        let expired: Vec<WindowStart> = self
            .list_on_disk_windows()
            .into_iter()
            .take_while(|start| *start < cutoff)
            .collect();

        let mut removed = 0;
        for window_start in expired {
            if self.remove_window_file(window_start) {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, cutoff, "pruned expired windows");
        }
        removed
    }

    /// Keep only the configured number of most-recent windows
    ///
    /// Convenience sweep over [`Self::prune_older_than`] using
    /// `retention_windows` from the configuration.
    pub fn prune_to_retention(&self) -> usize {
        let windows = self.list_on_disk_windows();
        let keep = self.config.retention_windows;
        if windows.len() <= keep {
            return 0;
        }
        let cutoff = match windows.iter().rev().nth(keep - 1) {
            Some(cutoff) => *cutoff,
            None => return 0,
        };
        self.prune_older_than(cutoff)
    }

    fn split_prefix(&self) -> Result<(&Path, String), StoreError> {
        let prefix = &self.config.file_prefix;
        let parent = prefix
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                StoreError::InvalidArgument("file prefix has no parent directory".into())
            })?;
        let name_prefix: OsString = prefix
            .file_name()
            .ok_or_else(|| {
                StoreError::InvalidArgument("file prefix has no file-name component".into())
            })?
            .to_os_string();
        let name_prefix = name_prefix
            .into_string()
            .map_err(|_| StoreError::InvalidArgument("file prefix is not valid UTF-8".into()))?;
        Ok((parent, name_prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::CounterReporter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry_at(dir: &TempDir) -> (WindowRegistry, Arc<CounterReporter>) {
        let reporter = Arc::new(CounterReporter::new());
        let config = StorageConfig::with_prefix(dir.path().join("metrics_"));
        (WindowRegistry::new(config, reporter.clone()), reporter)
    }

    fn touch(dir: &TempDir, name: &str) {
        std::fs::write(dir.path().join(name), b"").unwrap();
    }

    #[test]
    fn listing_recovers_only_well_formed_windows() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry_at(&dir);

        touch(&dir, "metrics_123");
        touch(&dir, "metrics_456");
        touch(&dir, "metrics_ABC"); // prefix but malformed timestamp: skipped
        touch(&dir, "unrelated.log"); // no prefix: ignored

        let windows = registry.list_on_disk_windows();
        assert_eq!(windows, BTreeSet::from([123, 456]));
    }

    #[test]
    fn listing_survives_missing_directory() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(CounterReporter::new());
        let config = StorageConfig::with_prefix(dir.path().join("absent").join("metrics_"));
        let registry = WindowRegistry::new(config, reporter.clone());

        assert!(registry.list_on_disk_windows().is_empty());
        assert_eq!(reporter.count(ErrorKind::StoreAccess), 1);
    }

    #[test]
    fn delete_window_is_best_effort() {
        let dir = TempDir::new().unwrap();
        let (registry, reporter) = registry_at(&dir);

        touch(&dir, "metrics_10");
        registry.delete_window(10);
        assert!(!dir.path().join("metrics_10").exists());
        assert_eq!(reporter.count(ErrorKind::WindowPrune), 0);

        // Deleting an absent window is counted, never raised.
        registry.delete_window(10);
        assert_eq!(reporter.count(ErrorKind::WindowPrune), 1);
    }

    #[test]
    fn latest_window_is_max_timestamp() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry_at(&dir);

        assert!(registry.latest_window().is_none());
        touch(&dir, "metrics_5");
        touch(&dir, "metrics_90");
        touch(&dir, "metrics_12");
        assert_eq!(registry.latest_window(), Some(90));
    }

    #[test]
    fn prune_removes_exactly_the_expired_windows() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry_at(&dir);

        for ts in [10, 20, 30, 40] {
            touch(&dir, &format!("metrics_{}", ts));
        }

        assert_eq!(registry.prune_older_than(30), 2);
        assert_eq!(registry.list_on_disk_windows(), BTreeSet::from([30, 40]));

        // Nothing expired: no-op.
        assert_eq!(registry.prune_older_than(30), 0);
    }

    #[test]
    fn prune_to_retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let reporter = Arc::new(CounterReporter::new());
        let mut config = StorageConfig::with_prefix(dir.path().join("metrics_"));
        config.retention_windows = 2;
        let registry = WindowRegistry::new(config, reporter);

        for ts in [100, 200, 300, 400, 500] {
            touch(&dir, &format!("metrics_{}", ts));
        }

        assert_eq!(registry.prune_to_retention(), 3);
        assert_eq!(registry.list_on_disk_windows(), BTreeSet::from([400, 500]));
    }

    #[test]
    fn open_latest_attaches_to_newest_committed_window() {
        let dir = TempDir::new().unwrap();
        let (registry, _) = registry_at(&dir);
        assert!(registry.open_latest().is_none());

        let store =
            WindowStore::open(registry.config(), CounterReporter::shared(), 777).unwrap();
        store.commit().unwrap();
        store.close().unwrap();

        let latest = registry.open_latest().unwrap();
        assert_eq!(latest.window_start(), 777);
        latest.close().unwrap();
    }
}
