//! Backend contract.

use relmap_codec::{Conditions, Record, Value};

use crate::error::BackendResult;
use crate::model::{JunctionConfig, ModelConfig};

/// Backend-specific config blob attached to a model or junction.
///
/// The backend alone interprets it; the in-memory backend expects
/// `{"table": "<name>"}`.
pub type BackendConfig = Value;

/// A raw-record store serving one or more models.
///
/// Backends know nothing about instances, relations or identity. The
/// repository hands them flat [`Record`]s keyed by column and expects flat
/// records back.
///
/// # Invariants
///
/// - `get` fails with [`BackendError::NotFound`] when no row matches
/// - `add` returns the row as persisted, including generated columns
/// - `all` and `related` are lazy: no query runs until [`RowSource::fetch`]
/// - Backends must be `Send + Sync`
///
/// [`BackendError::NotFound`]: crate::BackendError::NotFound
pub trait Backend: Send + Sync {
    /// Name the models of this backend refer to in [`ModelConfig::backend`].
    fn identifier(&self) -> &str;

    /// Model descriptors served by this backend.
    fn configs(&self) -> Vec<ModelConfig>;

    /// Junction descriptors served by this backend.
    fn junctions(&self) -> Vec<JunctionConfig>;

    /// Fetches the single row whose id columns equal `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no row matches or the config is invalid.
    fn get(&self, id: &Record, config: &BackendConfig) -> BackendResult<Record>;

    /// A lazy source over every row.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    fn all(&self, config: &BackendConfig) -> BackendResult<Box<dyn RowSource>>;

    /// A lazy source over the rows whose `reference` column equals `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid.
    fn related(
        &self,
        config: &BackendConfig,
        reference: &str,
        id: &Value,
    ) -> BackendResult<Box<dyn RowSource>>;

    /// Inserts a row and returns it as persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the key already exists or the config is invalid.
    fn add(&self, data: &Record, config: &BackendConfig) -> BackendResult<Record>;

    /// Replaces the row identified by `old` with `new`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row no longer exists.
    fn update(&self, new: &Record, old: &Record, config: &BackendConfig) -> BackendResult<Record>;

    /// Removes the row identified by `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row does not exist.
    fn delete(&self, data: &Record, config: &BackendConfig) -> BackendResult<()>;
}

/// A lazy, re-runnable query over backend rows.
///
/// Every call to [`fetch`](RowSource::fetch) is one backend round-trip.
pub trait RowSource: Send + Sync {
    /// Runs the query.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    fn fetch(&self) -> BackendResult<Vec<Record>>;

    /// Returns a narrower source that only yields rows matching
    /// `conditions`, or `None` when the backend cannot filter on them.
    ///
    /// Condition paths name columns.
    fn push_down(&self, _conditions: &Conditions) -> Option<Box<dyn RowSource>> {
        None
    }

    /// Returns a source yielding only `columns`, or `None` when the backend
    /// cannot project.
    fn project(&self, _columns: &[String]) -> Option<Box<dyn RowSource>> {
        None
    }
}

/// A [`RowSource`] over rows that are already in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRows {
    rows: Vec<Record>,
}

impl StaticRows {
    /// Wraps `rows`.
    #[must_use]
    pub fn new(rows: Vec<Record>) -> Self {
        Self { rows }
    }
}

impl RowSource for StaticRows {
    fn fetch(&self) -> BackendResult<Vec<Record>> {
        Ok(self.rows.clone())
    }
}
