//! Lazy sequences over backend rows.
//!
//! A [`Collection`] wraps a backend [`RowSource`]. Nothing is fetched until
//! the rows are needed; the first fetch is cached on the collection object,
//! so reading the same collection twice costs one query. Every
//! `Repository::all` call starts a fresh collection and thus a fresh query.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use relmap_backend::{RowSource, StaticRows};
use relmap_codec::{Conditions, Record};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::repository::Repository;

/// A lazy, filterable sequence of raw rows.
#[derive(Clone)]
pub struct Collection {
    source: Arc<dyn RowSource>,
    filter: Conditions,
    columns: Option<Vec<String>>,
    rows: Arc<Mutex<Option<Vec<Record>>>>,
}

impl Collection {
    /// Wraps a backend source.
    pub fn new(source: Box<dyn RowSource>) -> Self {
        Self {
            source: Arc::from(source),
            filter: Conditions::new(),
            columns: None,
            rows: Arc::new(Mutex::new(None)),
        }
    }

    /// A collection over rows already in memory.
    pub fn from_rows(rows: Vec<Record>) -> Self {
        Self::new(Box::new(StaticRows::new(rows)))
    }

    fn derive(&self, source: Arc<dyn RowSource>, filter: Conditions, columns: Option<Vec<String>>) -> Self {
        Self {
            source,
            filter,
            columns,
            rows: Arc::new(Mutex::new(None)),
        }
    }

    /// Rows matching `conditions`, whose paths name columns.
    ///
    /// The filter is pushed down to the backend when it accepts it, and
    /// applied to the fetched rows otherwise.
    #[must_use]
    pub fn filter(&self, conditions: &Conditions) -> Collection {
        if self.filter.is_empty() && self.columns.is_none() {
            if let Some(narrowed) = self.source.push_down(conditions) {
                return self.derive(Arc::from(narrowed), Conditions::new(), None);
            }
        }
        trace!(conditions = %conditions, "filtering rows client-side");
        self.derive(
            Arc::clone(&self.source),
            self.filter.clone().merge(conditions),
            self.columns.clone(),
        )
    }

    /// Rows reduced to `columns`.
    #[must_use]
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Collection {
        let columns: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
        if self.filter.is_empty() {
            if let Some(projected) = self.source.project(&columns) {
                return self.derive(Arc::from(projected), Conditions::new(), None);
            }
        }
        self.derive(Arc::clone(&self.source), self.filter.clone(), Some(columns))
    }

    /// The rows, fetching them on first use.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the fetch.
    pub fn rows(&self) -> CoreResult<Vec<Record>> {
        let mut cache = self.rows.lock();
        if let Some(rows) = cache.as_ref() {
            return Ok(rows.clone());
        }
        let mut rows = Vec::new();
        for row in self.source.fetch()? {
            let keep = match self.filter.matches(&row) {
                Ok(keep) => keep,
                Err(never) => match never {},
            };
            if !keep {
                continue;
            }
            rows.push(match &self.columns {
                Some(columns) => row.project(columns),
                None => row,
            });
        }
        *cache = Some(rows.clone());
        Ok(rows)
    }

    /// Forgets the cached rows; the next read queries again.
    pub fn refresh(&self) {
        *self.rows.lock() = None;
    }

    /// Number of rows.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the fetch.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.rows()?.len())
    }

    /// Returns true when there are no rows.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the fetch.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.rows()?.is_empty())
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("filter", &self.filter)
            .field("columns", &self.columns)
            .field("fetched", &self.rows.lock().is_some())
            .finish_non_exhaustive()
    }
}

/// A [`Collection`] whose rows are bound to instances of one model.
#[derive(Clone)]
pub struct RepositoryCollection {
    repository: Repository,
    model: String,
    rows: Collection,
    instance_filter: Conditions,
}

impl RepositoryCollection {
    pub(crate) fn new(repository: Repository, model: impl Into<String>, rows: Collection) -> Self {
        Self {
            repository,
            model: model.into(),
            rows,
            instance_filter: Conditions::new(),
        }
    }

    /// The model the rows are bound to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The underlying raw rows.
    pub fn raw(&self) -> &Collection {
        &self.rows
    }

    /// Instances matching `conditions`, whose paths are property paths.
    ///
    /// Conditions on mapped properties become column filters (pushed down
    /// when the backend accepts them); anything else is evaluated on the
    /// instances.
    ///
    /// # Errors
    ///
    /// Returns an error for an unregistered model.
    pub fn filter(&self, conditions: &Conditions) -> CoreResult<RepositoryCollection> {
        let config = self.repository.config(&self.model)?;
        let mut next = self.clone();
        let columns = if self.instance_filter.is_empty() {
            conditions.map_paths(|path| {
                crate::repository::column_of(&config, path).map(relmap_codec::PropertyPath::field)
            })
        } else {
            None
        };
        match columns {
            Some(columns) => next.rows = self.rows.filter(&columns),
            None => next.instance_filter = self.instance_filter.clone().merge(conditions),
        }
        Ok(next)
    }

    /// Raw values of `properties`, keyed by property, without building
    /// instances.
    ///
    /// # Errors
    ///
    /// Returns an error for properties that are not mapped to a column.
    pub fn select<S: AsRef<str>>(&self, properties: &[S]) -> CoreResult<Vec<Record>> {
        let config = self.repository.config(&self.model)?;
        if !self.instance_filter.is_empty() {
            return self
                .to_vec()?
                .iter()
                .map(|instance| {
                    properties
                        .iter()
                        .map(|p| Ok((p.as_ref().to_string(), instance.get_path(p.as_ref())?)))
                        .collect::<CoreResult<Record>>()
                })
                .collect();
        }
        let mut columns = Vec::with_capacity(properties.len());
        for property in properties {
            let property = property.as_ref();
            let path = relmap_codec::PropertyPath::parse(property)?;
            let column = crate::repository::column_of(&config, &path)
                .ok_or_else(|| CoreError::unknown_property(&self.model, property))?;
            columns.push((column, property.to_string()));
        }
        let names: Vec<&str> = columns.iter().map(|(c, _)| c.as_str()).collect();
        let rows = self.rows.select(&names).rows()?;
        Ok(rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|(column, property)| (property.clone(), row.value(column)))
                    .collect()
            })
            .collect())
    }

    /// The instances, converting rows through the identity map.
    ///
    /// # Errors
    ///
    /// Returns the backend error of the fetch or a conversion error.
    pub fn to_vec(&self) -> CoreResult<Vec<Instance>> {
        let mut instances = Vec::new();
        for row in self.rows.rows()? {
            let instance = self.repository.convert(&self.model, row)?;
            if self.instance_filter.is_empty() || self.instance_filter.matches(&instance)? {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// Number of instances.
    ///
    /// # Errors
    ///
    /// See [`to_vec`](Self::to_vec).
    pub fn len(&self) -> CoreResult<usize> {
        if self.instance_filter.is_empty() {
            return self.rows.len();
        }
        Ok(self.to_vec()?.len())
    }

    /// Returns true when there are no instances.
    ///
    /// # Errors
    ///
    /// See [`to_vec`](Self::to_vec).
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The first instance, if any.
    ///
    /// # Errors
    ///
    /// See [`to_vec`](Self::to_vec).
    pub fn first(&self) -> CoreResult<Option<Instance>> {
        Ok(self.to_vec()?.into_iter().next())
    }
}

impl fmt::Debug for RepositoryCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryCollection")
            .field("model", &self.model)
            .field("rows", &self.rows)
            .field("instance_filter", &self.instance_filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_backend::{table_config, Backend, InMemoryBackend, TableSchema};
    use relmap_codec::Value;

    fn backend() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.create_table(TableSchema::new("customers")).unwrap();
        backend
            .seed(
                "customers",
                [
                    Record::new().with("id", 1).with("name", "Bob Fanger"),
                    Record::new().with("id", 2).with("name", "James Bond"),
                ],
            )
            .unwrap();
        backend
    }

    #[test]
    fn fetch_once_per_collection() {
        let backend = backend();
        let rows = Collection::new(backend.all(&table_config("customers")).unwrap());
        assert!(backend.log().is_empty());
        assert_eq!(rows.len().unwrap(), 2);
        assert_eq!(rows.rows().unwrap().len(), 2);
        assert_eq!(backend.log().len(), 1);
        rows.refresh();
        rows.rows().unwrap();
        assert_eq!(backend.log().len(), 2);
    }

    #[test]
    fn filter_is_pushed_down() {
        let backend = backend();
        let rows = Collection::new(backend.all(&table_config("customers")).unwrap())
            .filter(&Conditions::field_eq("name", "James Bond"));
        assert_eq!(rows.rows().unwrap()[0].value("id"), Value::Integer(2));
        assert_eq!(
            backend.log().statements(),
            vec!["SELECT * FROM customers WHERE name = 'James Bond'"]
        );
    }

    #[test]
    fn static_rows_filter_client_side() {
        let rows = Collection::from_rows(vec![
            Record::new().with("id", 1).with("name", "Bob"),
            Record::new().with("id", 2).with("name", "James"),
        ]);
        let filtered = rows
            .filter(&Conditions::from_pairs([("id >", 1)]).unwrap())
            .select(&["name"]);
        assert_eq!(filtered.rows().unwrap(), vec![Record::new().with("name", "James")]);
        assert_eq!(rows.len().unwrap(), 2);
        assert!(!filtered.is_empty().unwrap());
    }
}
