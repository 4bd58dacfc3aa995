//! On-disk store holding one snapshot window of all metrics
//!
//! Each window owns a single SQLite file named `<prefix><window_start>` and
//! creates one table per metric. Every row carries the metric's dimension
//! values plus the four fixed rollup columns.
//!
//! ```text
//! cpu_utilization                         paging_rss
//! | shard_id | index_name | sum | avg | min | max |
//! +----------+------------+-----+-----+-----+-----+
//! | 1        | sonested   | 5.0 | 2.5 | 2.0 | 3.0 |
//! | NULL     | NULL       | 0.4 | 0.4 | 0.4 | 0.4 |
//! ```
//!
//! Writes are staged in an explicit transaction from the moment the window
//! is opened; nothing is durable until [`WindowStore::commit`]. A crash
//! before commit loses only that window's uncommitted rows and never
//! corrupts previously committed windows.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OpenFlags, Statement};

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::stats::{ErrorKind, SharedReporter};
use crate::types::{
    quoted, validate_identifier, DimensionSchema, WindowStart, AGGREGATE_COLUMNS,
};

/// How long a connection waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One window's on-disk metric store
///
/// A window has a single writer for its lifetime (the ingestion pipeline);
/// concurrent readers each attach their own read-only handle via
/// [`WindowStore::open_existing`] once the window is committed.
pub struct WindowStore {
    conn: Connection,
    window_start: WindowStart,
    path: PathBuf,
    read_only: bool,
    reporter: SharedReporter,
}

impl std::fmt::Debug for WindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowStore")
            .field("window_start", &self.window_start)
            .field("path", &self.path)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl WindowStore {
    /// Create and open the store for a new window
    ///
    /// Creates the prefix directory if needed and opens the window file at
    /// its deterministic path, with writes staged until an explicit commit.
    ///
    /// # Errors
    ///
    /// Returns `Access` if the file cannot be created or opened (reported
    /// to the statistics sink first).
    pub fn open(
        config: &StorageConfig,
        reporter: SharedReporter,
        window_start: WindowStart,
    ) -> Result<Self, StoreError> {
        let path = config.file_path(window_start);

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                reporter.record_error(ErrorKind::StoreAccess);
                return Err(StoreError::Io(e));
            }
        }

        let conn = match Connection::open(&path) {
            Ok(conn) => conn,
            Err(e) => {
                reporter.record_error(ErrorKind::StoreAccess);
                return Err(StoreError::Access(e));
            }
        };

        // Stage all writes until commit(); mirrors a connection opened with
        // auto-commit disabled.
        let store = Self {
            conn,
            window_start,
            path,
            read_only: false,
            reporter,
        };
        if let Err(e) = store.init_write_session() {
            store.reporter.record_error(ErrorKind::StoreAccess);
            return Err(e);
        }
        Ok(store)
    }

    /// Attach to a previously written window's file for read-only querying
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is absent (a missing window is never
    /// silently created), or `Access` if it cannot be opened.
    pub fn open_existing(
        config: &StorageConfig,
        reporter: SharedReporter,
        window_start: WindowStart,
    ) -> Result<Self, StoreError> {
        let path = config.file_path(window_start);
        if !path.exists() {
            reporter.record_error(ErrorKind::StoreAccess);
            return Err(StoreError::NotFound(path.display().to_string()));
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let opened = Connection::open_with_flags(&path, flags)
            .and_then(|conn| conn.busy_timeout(BUSY_TIMEOUT).map(|()| conn));
        let conn = match opened {
            Ok(conn) => conn,
            Err(e) => {
                reporter.record_error(ErrorKind::StoreAccess);
                return Err(StoreError::Access(e));
            }
        };

        Ok(Self {
            conn,
            window_start,
            path,
            read_only: true,
            reporter,
        })
    }

    fn init_write_session(&self) -> Result<(), StoreError> {
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// The window's start timestamp
    pub fn window_start(&self) -> WindowStart {
        self.window_start
    }

    /// The on-disk path of this window's store file
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Whether this handle was attached read-only via [`Self::open_existing`]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Map a storage-layer failure to `Access`, counting it in the sink
    pub(crate) fn track<T>(&self, result: Result<T, rusqlite::Error>) -> Result<T, StoreError> {
        result.map_err(|e| {
            self.reporter.record_error(ErrorKind::StoreAccess);
            StoreError::Access(e)
        })
    }

    /// Whether a table exists for the given metric
    pub fn metric_exists(&self, metric: &str) -> bool {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [metric],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .unwrap_or(false)
    }

    /// Create the table for a metric
    ///
    /// Columns are the schema's dimension columns (TEXT) followed by the
    /// four fixed aggregate columns (REAL), in that exact order. A no-op if
    /// the table already exists; the dimension set is then fixed for the
    /// lifetime of the window. Creation must precede the first write; the
    /// store does not auto-create on write.
    pub fn create_metric_table(
        &self,
        metric: &str,
        schema: &DimensionSchema,
    ) -> Result<(), StoreError> {
        validate_identifier(metric)?;
        if self.metric_exists(metric) {
            tracing::debug!(metric, "metric table already exists");
            return Ok(());
        }

        let mut columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|dim| format!("{} TEXT", quoted(dim)))
            .collect();
        for agg in AGGREGATE_COLUMNS {
            columns.push(format!("{} REAL", quoted(agg)));
        }

        let sql = format!("CREATE TABLE {} ({})", quoted(metric), columns.join(", "));
        self.conn.execute_batch(&sql)?;
        tracing::debug!(metric, dimensions = schema.len(), "created metric table");
        Ok(())
    }

    /// Begin a batched bulk insert into a metric's table
    ///
    /// Rows are bound positionally as dimension values followed by the four
    /// aggregates and land in the window's staged transaction when
    /// [`MetricBatch::execute`] runs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `dimension_count < 1` or the table does
    /// not exist.
    pub fn begin_batch_insert(
        &self,
        metric: &str,
        dimension_count: usize,
    ) -> Result<MetricBatch<'_>, StoreError> {
        if dimension_count < 1 || !self.metric_exists(metric) {
            return Err(StoreError::InvalidArgument(format!(
                "incorrect batch arguments {}, {}",
                metric, dimension_count
            )));
        }

        let placeholders = vec!["?"; dimension_count + AGGREGATE_COLUMNS.len()].join(", ");
        let sql = format!("INSERT INTO {} VALUES ({})", quoted(metric), placeholders);
        let stmt = self.conn.prepare(&sql)?;

        Ok(MetricBatch {
            stmt,
            dimension_count,
            rows: Vec::new(),
        })
    }

    /// Insert a single aggregated row, equivalent to a one-row batch
    pub fn put_aggregated_row(
        &self,
        metric: &str,
        dimensions: &[Option<&str>],
        sum: f64,
        avg: f64,
        min: f64,
        max: f64,
    ) -> Result<(), StoreError> {
        let mut batch = self.begin_batch_insert(metric, dimensions.len())?;
        batch.bind(dimensions, sum, avg, min, max)?;
        batch.execute()?;
        Ok(())
    }

    /// Make all staged writes durable atomically
    ///
    /// Re-opens the staging transaction afterwards so the window can keep
    /// accepting writes. A commit failure is fatal for the window: it is
    /// reported, the staging transaction is not re-opened, and the window
    /// should not be queried until successfully recreated.
    pub fn commit(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            // Read-only handle or failed earlier commit: nothing staged.
            return Ok(());
        }
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            self.reporter.record_error(ErrorKind::StoreAccess);
            tracing::error!(window = self.window_start, error = %e, "window commit failed");
            return Err(StoreError::Access(e));
        }
        self.track(self.conn.execute_batch("BEGIN"))?;
        Ok(())
    }

    /// Release the underlying resource
    ///
    /// A single-use terminal operation: the handle is consumed and any
    /// uncommitted rows are discarded.
    pub fn close(self) -> Result<(), StoreError> {
        let Self {
            conn,
            window_start,
            reporter,
            ..
        } = self;
        conn.close().map_err(|(_, e)| {
            reporter.record_error(ErrorKind::StoreAccess);
            tracing::error!(window = window_start, error = %e, "window close failed");
            StoreError::Access(e)
        })
    }

    /// Drop a metric's table if present
    ///
    /// A maintenance/test-only operation, not part of steady-state
    /// ingestion.
    pub fn delete_metric(&self, metric: &str) -> Result<(), StoreError> {
        validate_identifier(metric)?;
        if self.metric_exists(metric) {
            self.conn
                .execute_batch(&format!("DROP TABLE {}", quoted(metric)))?;
        }
        Ok(())
    }
}

/// Accumulates rows for a single bulk insert into one metric table
///
/// Bound rows are validated against the declared dimension count; the
/// prepared statement runs once per row inside [`MetricBatch::execute`],
/// all within the window's staged transaction.
#[derive(Debug)]
pub struct MetricBatch<'conn> {
    stmt: Statement<'conn>,
    dimension_count: usize,
    rows: Vec<Vec<Value>>,
}

impl MetricBatch<'_> {
    /// Bind one row: dimension values followed by the four aggregates
    ///
    /// A `None` dimension value is stored as SQL NULL, the explicit
    /// no-value marker.
    pub fn bind(
        &mut self,
        dimensions: &[Option<&str>],
        sum: f64,
        avg: f64,
        min: f64,
        max: f64,
    ) -> Result<(), StoreError> {
        if dimensions.len() != self.dimension_count {
            return Err(StoreError::InvalidArgument(format!(
                "expected {} dimension values, got {}",
                self.dimension_count,
                dimensions.len()
            )));
        }

        let mut row: Vec<Value> = Vec::with_capacity(dimensions.len() + AGGREGATE_COLUMNS.len());
        for dim in dimensions {
            row.push(match dim {
                Some(value) => Value::Text((*value).to_string()),
                None => Value::Null,
            });
        }
        for stat in [sum, avg, min, max] {
            row.push(Value::Real(stat));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Number of rows bound so far
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows have been bound
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Run the bulk insert, returning the number of rows inserted
    pub fn execute(mut self) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for row in self.rows.drain(..) {
            self.stmt.execute(params_from_iter(row))?;
            inserted += 1;
        }
        Ok(inserted)
    }
}
