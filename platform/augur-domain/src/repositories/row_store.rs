use crate::errors::StoreError;
use crate::value_objects::bar::Bar;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Half-open `[start, end)` range of bar timestamps, UTC epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BarQuery {
    pub start: i64,
    pub end: i64,
}

/// First and last bar timestamps the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownRange {
    pub first: i64,
    pub last: i64,
}

/// Shared cancellation flag; cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tabular output of a raw query artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Read-only access to the dataset's base-timeframe bars.
///
/// Implementations must never write. Bars come back sorted by timestamp with
/// duplicates removed. The artifact methods take a single read-only statement
/// that already passed the safety stage of the artifact validator.
pub trait RowStore: Send + Sync {
    fn known_range(&self) -> Result<Option<KnownRange>, StoreError>;

    fn load_bars(&self, query: &BarQuery, cancel: &CancelToken) -> Result<Vec<Bar>, StoreError>;

    /// Compile `artifact` without returning rows.
    fn dry_run(&self, _artifact: &str) -> Result<(), StoreError> {
        Err(StoreError::Unsupported("query dry run"))
    }

    fn count_rows(&self, _artifact: &str) -> Result<u64, StoreError> {
        Err(StoreError::Unsupported("row counting"))
    }

    fn fetch(
        &self,
        _artifact: &str,
        _limit: usize,
        _cancel: &CancelToken,
    ) -> Result<ArtifactRows, StoreError> {
        Err(StoreError::Unsupported("raw query execution"))
    }
}
