//! Chunked viewer over a kernel-resident table.
//!
//! Cell data is fetched lazily in fixed-size row chunks on first access;
//! a fetch in flight is shared so concurrent accesses to one chunk issue
//! a single kernel call. Sorting and filtering never mutate a viewer in
//! place: the kernel materializes a new reference and a new viewer is
//! returned, leaving the old one valid until dropped.

mod export;

pub use export::export_delimited;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::OnceCell;

use crate::channel::CallError;
use crate::protocol::method::{FilterOp, FilterPredicate, SortKey};
use crate::protocol::{ColumnKind, TableInfo};
use crate::session::{PersistentRef, RemoteRef, Session};

/// Rows fetched and cached as one unit.
pub const CHUNK_SIZE: usize = 256;

/// Upper bound on simultaneous sort keys.
pub const MAX_SORT_KEYS: usize = 3;

/// Error type for table viewer operations.
#[derive(thiserror::Error, Debug)]
pub enum TableError {
    #[error("At most {MAX_SORT_KEYS} sort keys are supported, got {got}")]
    TooManySortKeys { got: usize },
    #[error("Column {column} is out of range")]
    ColumnOutOfRange { column: usize },
    #[error("Column {column} is not sortable")]
    NotSortable { column: usize },
    #[error("Row {row} is out of range")]
    RowOutOfRange { row: usize },
    #[error("Invalid filter pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("Export failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Call(#[from] CallError),
}

/// Result of a non-blocking cell read.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Loaded(serde_json::Value),
    /// The chunk has not been fetched yet (or a fetch is in flight).
    Pending,
    Error(String),
}

/// Column-major cell storage for one chunk.
pub(crate) struct Chunk {
    columns: Vec<Vec<serde_json::Value>>,
}

impl Chunk {
    pub(crate) fn value(&self, column: usize, row_in_chunk: usize) -> Option<&serde_json::Value> {
        self.columns.get(column).and_then(|col| col.get(row_in_chunk))
    }
}

#[derive(Default)]
struct ChunkSlot {
    cell: OnceCell<Arc<Chunk>>,
    last_error: Mutex<Option<String>>,
}

/// Viewer over one kernel-resident table reference.
pub struct TableViewer {
    session: Session,
    table: PersistentRef,
    info: RwLock<TableInfo>,
    chunks: Mutex<HashMap<usize, Arc<ChunkSlot>>>,
    sort_keys: Vec<SortKey>,
    filter: Option<FilterPredicate>,
    visible_range: Mutex<Option<Range<usize>>>,
}

impl TableViewer {
    /// Register `table` with the kernel and pull its metadata.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` if the session is terminated or the value
    /// is not a table.
    pub async fn open(table: &RemoteRef) -> Result<Self, TableError> {
        let session = table.session().clone();
        let index = session.table_register(table.spec().clone()).await?;
        Self::from_index(session, index, Vec::new(), None).await
    }

    async fn from_index(
        session: Session,
        index: i32,
        sort_keys: Vec<SortKey>,
        filter: Option<FilterPredicate>,
    ) -> Result<Self, TableError> {
        let info = session.table_get_info(index).await?;
        Ok(Self {
            table: PersistentRef::new(index, session.clone()),
            session,
            info: RwLock::new(info),
            chunks: Mutex::new(HashMap::new()),
            sort_keys,
            filter,
            visible_range: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Kernel-side index of the backing reference.
    #[must_use]
    pub fn table_index(&self) -> i32 {
        self.table.index()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.info.read().expect("table info lock poisoned").row_count
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.info
            .read()
            .expect("table info lock poisoned")
            .columns
            .len()
    }

    /// Column name, or `None` out of range.
    #[must_use]
    pub fn column_name(&self, column: usize) -> Option<String> {
        self.info
            .read()
            .expect("table info lock poisoned")
            .columns
            .get(column)
            .map(|c| c.name.clone())
    }

    /// Column cell type, or `None` out of range.
    #[must_use]
    pub fn column_kind(&self, column: usize) -> Option<ColumnKind> {
        self.info
            .read()
            .expect("table info lock poisoned")
            .columns
            .get(column)
            .map(|c| c.kind)
    }

    #[must_use]
    pub fn is_sortable(&self, column: usize) -> bool {
        self.info
            .read()
            .expect("table info lock poisoned")
            .columns
            .get(column)
            .is_some_and(|c| c.sortable)
    }

    /// All column names, in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.info
            .read()
            .expect("table info lock poisoned")
            .columns
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    /// Sort keys this viewer was created with.
    #[must_use]
    pub fn sort_keys(&self) -> &[SortKey] {
        &self.sort_keys
    }

    /// Filter predicate this viewer was created with.
    #[must_use]
    pub fn filter_predicate(&self) -> Option<&FilterPredicate> {
        self.filter.as_ref()
    }

    /// Narrow or widen the visible row window (pagination). Does not
    /// invalidate any cached chunk.
    pub fn set_visible_range(&self, range: Option<Range<usize>>) {
        *self
            .visible_range
            .lock()
            .expect("visible range lock poisoned") = range;
    }

    #[must_use]
    pub fn visible_range(&self) -> Option<Range<usize>> {
        self.visible_range
            .lock()
            .expect("visible range lock poisoned")
            .clone()
    }

    /// Non-blocking cell read from the cache.
    #[must_use]
    pub fn get_value(&self, row: usize, column: usize) -> CellValue {
        if row >= self.row_count() {
            return CellValue::Error(format!("row {row} out of range"));
        }
        if column >= self.column_count() {
            return CellValue::Error(format!("column {column} out of range"));
        }

        let slot = {
            let chunks = self.chunks.lock().expect("chunk cache lock poisoned");
            chunks.get(&(row / CHUNK_SIZE)).map(Arc::clone)
        };
        let Some(slot) = slot else {
            return CellValue::Pending;
        };
        match slot.cell.get() {
            Some(chunk) => match chunk.value(column, row % CHUNK_SIZE) {
                Some(value) => CellValue::Loaded(value.clone()),
                None => CellValue::Error(format!("cell ({row}, {column}) missing from chunk")),
            },
            None => {
                let error = slot
                    .last_error
                    .lock()
                    .expect("chunk error lock poisoned")
                    .clone();
                error.map_or(CellValue::Pending, CellValue::Error)
            }
        }
    }

    /// Fetch the chunk containing `(row, column)` if not already cached.
    ///
    /// Concurrent calls for cells of the same chunk share one kernel
    /// fetch.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` for out-of-range cells, a terminated
    /// session, or a kernel-side fetch failure.
    pub async fn ensure_loaded(&self, row: usize, column: usize) -> Result<(), TableError> {
        if row >= self.row_count() {
            return Err(TableError::RowOutOfRange { row });
        }
        if column >= self.column_count() {
            return Err(TableError::ColumnOutOfRange { column });
        }
        self.chunk_for_row(row).await?;
        Ok(())
    }

    pub(crate) async fn chunk_for_row(&self, row: usize) -> Result<Arc<Chunk>, TableError> {
        let chunk_index = row / CHUNK_SIZE;
        let slot = {
            let mut chunks = self.chunks.lock().expect("chunk cache lock poisoned");
            Arc::clone(chunks.entry(chunk_index).or_default())
        };

        let result = slot
            .cell
            .get_or_try_init(|| self.fetch_chunk(chunk_index))
            .await;
        match result {
            Ok(chunk) => {
                slot.last_error
                    .lock()
                    .expect("chunk error lock poisoned")
                    .take();
                Ok(Arc::clone(chunk))
            }
            Err(err) => {
                *slot
                    .last_error
                    .lock()
                    .expect("chunk error lock poisoned") = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn fetch_chunk(&self, chunk_index: usize) -> Result<Arc<Chunk>, TableError> {
        let start = chunk_index * CHUNK_SIZE;
        let end = usize::min(start + CHUNK_SIZE, self.row_count());
        tracing::debug!(index = self.table.index(), start, end, "Fetching table chunk");
        let response = self
            .session
            .table_get_data(self.table.index(), start, end)?
            .recv()
            .await?;
        Ok(Arc::new(Chunk {
            columns: response.columns,
        }))
    }

    /// Build a new viewer over a kernel-sorted copy of this table.
    ///
    /// An empty key list restores the backing table's own row order.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` for too many or invalid keys, or a failed
    /// kernel call.
    pub async fn sort_by(&self, keys: Vec<SortKey>) -> Result<TableViewer, TableError> {
        if keys.len() > MAX_SORT_KEYS {
            return Err(TableError::TooManySortKeys { got: keys.len() });
        }
        for key in &keys {
            if key.column >= self.column_count() {
                return Err(TableError::ColumnOutOfRange { column: key.column });
            }
            if !self.is_sortable(key.column) {
                return Err(TableError::NotSortable { column: key.column });
            }
        }
        let new_index = self.session.table_sort(self.table.index(), &keys).await?;
        Self::from_index(self.session.clone(), new_index, keys, self.filter.clone()).await
    }

    /// Build a new viewer over a kernel-filtered copy of this table.
    ///
    /// The predicate is validated locally (column bounds, regex syntax)
    /// before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` for an invalid predicate or a failed kernel
    /// call.
    pub async fn filter(&self, predicate: FilterPredicate) -> Result<TableViewer, TableError> {
        validate_predicate(&predicate, self.column_count())?;
        let new_index = self
            .session
            .table_filter(self.table.index(), &predicate)
            .await?;
        Self::from_index(
            self.session.clone(),
            new_index,
            self.sort_keys.clone(),
            Some(predicate),
        )
        .await
    }

    /// Re-resolve the underlying source table.
    ///
    /// When the kernel reports a change, metadata is re-pulled and every
    /// cached chunk is invalidated; callers holding column indices should
    /// remap them with [`TableViewer::map_columns`]. The visible row
    /// window is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a `TableError` if the kernel call fails.
    pub async fn refresh(&self) -> Result<bool, TableError> {
        if !self
            .info
            .read()
            .expect("table info lock poisoned")
            .can_refresh
        {
            return Ok(false);
        }
        let changed = self.session.table_refresh(self.table.index()).await?;
        if changed {
            let info = self.session.table_get_info(self.table.index()).await?;
            *self.info.write().expect("table info lock poisoned") = info;
            self.chunks
                .lock()
                .expect("chunk cache lock poisoned")
                .clear();
        }
        Ok(changed)
    }

    /// Best-effort name-based mapping from old column indices to new ones
    /// after a refresh changed the column set.
    ///
    /// `result[i]` is the new index of old column `i`. An old column whose
    /// name disappeared keeps its original index only if that index is
    /// not taken by a name match, minimizing visible reshuffling.
    #[must_use]
    pub fn map_columns(old: &[String], new: &[String]) -> Vec<Option<usize>> {
        let mut result = vec![None; old.len()];
        let mut used = vec![false; new.len()];

        for (i, name) in old.iter().enumerate() {
            if let Some(j) = new.iter().position(|n| n == name) {
                result[i] = Some(j);
                used[j] = true;
            }
        }
        for (i, slot) in result.iter_mut().enumerate() {
            if slot.is_none() && i < new.len() && !used[i] {
                *slot = Some(i);
                used[i] = true;
            }
        }
        result
    }
}

impl std::fmt::Debug for TableViewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableViewer")
            .field("index", &self.table.index())
            .field("rows", &self.row_count())
            .field("columns", &self.column_count())
            .finish()
    }
}

/// Validate a filter predicate against the column set without issuing
/// any kernel call.
///
/// # Errors
///
/// Returns a `TableError` for out-of-range columns or malformed regex
/// patterns.
pub fn validate_predicate(
    predicate: &FilterPredicate,
    column_count: usize,
) -> Result<(), TableError> {
    for condition in &predicate.conditions {
        if condition.column >= column_count {
            return Err(TableError::ColumnOutOfRange {
                column: condition.column,
            });
        }
        if let FilterOp::Matches { pattern } = &condition.op {
            regex::Regex::new(pattern).map_err(|e| TableError::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}
