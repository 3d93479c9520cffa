//! In-memory backend for testing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relmap_codec::{loose_eq, Conditions, Record, Value};
use tracing::trace;

use crate::backend::{Backend, BackendConfig, RowSource};
use crate::error::{BackendError, BackendResult};
use crate::log::{Operation, OperationLog};
use crate::model::{JunctionConfig, ModelConfig};

/// Identifier of an [`InMemoryBackend`] created with [`InMemoryBackend::new`].
pub const DEFAULT_IDENTIFIER: &str = "memory";

/// Builds the backend config selecting `table`.
pub fn table_config(table: &str) -> BackendConfig {
    Value::map(vec![(Value::from("table"), Value::from(table))])
}

/// Shape of one in-memory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns identifying a row.
    pub primary_key: Vec<String>,
    /// Column filled with the next integer when inserted empty.
    pub auto_increment: Option<String>,
}

impl TableSchema {
    /// A table keyed on `id`, without auto-increment.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: vec!["id".to_string()],
            auto_increment: None,
        }
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the auto-increment column.
    #[must_use]
    pub fn auto_increment(mut self, column: impl Into<String>) -> Self {
        self.auto_increment = Some(column.into());
        self
    }
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    rows: Vec<Record>,
    next_id: i64,
}

impl Table {
    fn key(&self, record: &Record) -> Record {
        record.project(&self.schema.primary_key)
    }

    fn position(&self, key: &Record) -> Option<usize> {
        self.rows.iter().position(|row| {
            key.iter()
                .all(|(column, value)| loose_eq(&row.value(column), value))
        })
    }

    fn store(&mut self, mut row: Record) -> BackendResult<Record> {
        if let Some(column) = self.schema.auto_increment.clone() {
            match row.get(&column).and_then(Value::as_number) {
                Some(n) => self.next_id = self.next_id.max(n + 1),
                None => {
                    row.insert(column, self.next_id);
                    self.next_id += 1;
                }
            }
        }
        let key = self.key(&row);
        if self.position(&key).is_some() {
            return Err(BackendError::duplicate(&self.schema.name, key.to_string()));
        }
        self.rows.push(row.clone());
        Ok(row)
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<HashMap<String, Table>>,
    log: OperationLog,
}

impl Shared {
    fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&Table) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let tables = self.tables.read();
        let table = tables
            .get(name)
            .ok_or_else(|| BackendError::UnknownTable(name.to_string()))?;
        f(table)
    }

    fn with_table_mut<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Table) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(name)
            .ok_or_else(|| BackendError::UnknownTable(name.to_string()))?;
        f(table)
    }
}

/// A thread-safe table store.
///
/// Tables are declared with [`create_table`](Self::create_table) and filled
/// with [`seed`](Self::seed); models and junctions are declared with
/// [`register_model`](Self::register_model) and
/// [`register_junction`](Self::register_junction). Every operation issued
/// through the [`Backend`] contract is recorded in the [`OperationLog`].
///
/// # Example
///
/// ```rust
/// use relmap_backend::{table_config, Backend, InMemoryBackend, TableSchema};
/// use relmap_codec::Record;
///
/// let backend = InMemoryBackend::new();
/// backend.create_table(TableSchema::new("customers").auto_increment("id")).unwrap();
///
/// let config = table_config("customers");
/// let row = backend.add(&Record::new().with("name", "Bob"), &config).unwrap();
/// assert_eq!(row.get("id").and_then(|v| v.as_integer()), Some(1));
/// assert_eq!(backend.log().statements(), vec!["INSERT INTO customers (id, name) VALUES (1, 'Bob')"]);
/// ```
#[derive(Debug)]
pub struct InMemoryBackend {
    identifier: String,
    shared: Arc<Shared>,
    models: RwLock<Vec<ModelConfig>>,
    junctions: RwLock<Vec<JunctionConfig>>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::with_identifier(DEFAULT_IDENTIFIER)
    }
}

impl InMemoryBackend {
    /// Creates an empty backend named [`DEFAULT_IDENTIFIER`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty backend named `identifier`.
    #[must_use]
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            shared: Arc::new(Shared::default()),
            models: RwLock::new(Vec::new()),
            junctions: RwLock::new(Vec::new()),
        }
    }

    /// Declares a table.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Rejected`] if the table already exists.
    pub fn create_table(&self, schema: TableSchema) -> BackendResult<()> {
        let mut tables = self.shared.tables.write();
        if tables.contains_key(&schema.name) {
            return Err(BackendError::Rejected(format!(
                "table \"{}\" already exists",
                schema.name
            )));
        }
        tables.insert(
            schema.name.clone(),
            Table {
                schema,
                rows: Vec::new(),
                next_id: 1,
            },
        );
        Ok(())
    }

    /// Inserts rows without recording operations.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown table or a duplicate key.
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Record>) -> BackendResult<()> {
        self.shared.with_table_mut(table, |t| {
            for row in rows {
                t.store(row)?;
            }
            Ok(())
        })
    }

    /// A copy of the rows of `table`, without recording an operation.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown table.
    pub fn rows(&self, table: &str) -> BackendResult<Vec<Record>> {
        self.shared.with_table(table, |t| Ok(t.rows.clone()))
    }

    /// Declares a model served by this backend.
    ///
    /// An empty [`ModelConfig::backend`] is set to this backend's identifier.
    pub fn register_model(&self, mut config: ModelConfig) {
        if config.backend.is_empty() {
            config.backend = self.identifier.clone();
        }
        self.models.write().push(config);
    }

    /// Declares a junction served by this backend.
    pub fn register_junction(&self, mut config: JunctionConfig) {
        if config.backend.is_empty() {
            config.backend = self.identifier.clone();
        }
        self.junctions.write().push(config);
    }

    /// The log of operations issued through the [`Backend`] contract.
    pub fn log(&self) -> &OperationLog {
        &self.shared.log
    }

    fn table_name(config: &BackendConfig) -> BackendResult<String> {
        config
            .get("table")
            .and_then(Value::as_text)
            .map(str::to_string)
            .ok_or_else(|| BackendError::invalid_config(config.to_string(), "expected a \"table\""))
    }
}

impl Backend for InMemoryBackend {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn configs(&self) -> Vec<ModelConfig> {
        self.models.read().clone()
    }

    fn junctions(&self) -> Vec<JunctionConfig> {
        self.junctions.read().clone()
    }

    fn get(&self, id: &Record, config: &BackendConfig) -> BackendResult<Record> {
        let table = Self::table_name(config)?;
        self.shared.log.push(Operation::Get {
            table: table.clone(),
            id: id.clone(),
        });
        self.shared.with_table(&table, |t| {
            t.position(id)
                .map(|pos| t.rows[pos].clone())
                .ok_or_else(|| BackendError::not_found(&table, id.to_string()))
        })
    }

    fn all(&self, config: &BackendConfig) -> BackendResult<Box<dyn RowSource>> {
        let table = Self::table_name(config)?;
        Ok(Box::new(MemoryRows {
            shared: Arc::clone(&self.shared),
            table,
            reference: None,
            conditions: Conditions::new(),
            columns: None,
        }))
    }

    fn related(
        &self,
        config: &BackendConfig,
        reference: &str,
        id: &Value,
    ) -> BackendResult<Box<dyn RowSource>> {
        let table = Self::table_name(config)?;
        Ok(Box::new(MemoryRows {
            shared: Arc::clone(&self.shared),
            table,
            reference: Some((reference.to_string(), id.clone())),
            conditions: Conditions::new(),
            columns: None,
        }))
    }

    fn add(&self, data: &Record, config: &BackendConfig) -> BackendResult<Record> {
        let table = Self::table_name(config)?;
        let row = self.shared.with_table_mut(&table, |t| t.store(data.clone()))?;
        trace!(table = %table, row = %row, "inserted row");
        self.shared.log.push(Operation::Insert {
            table,
            row: row.clone(),
        });
        Ok(row)
    }

    fn update(&self, new: &Record, old: &Record, config: &BackendConfig) -> BackendResult<Record> {
        let table = Self::table_name(config)?;
        let (id, changes, row) = self.shared.with_table_mut(&table, |t| {
            let id = t.key(old);
            let pos = t
                .position(&id)
                .ok_or_else(|| BackendError::not_found(&table, id.to_string()))?;
            let changes: Record = new
                .iter()
                .filter(|(column, value)| old.get(column) != Some(*value))
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            let new_id = t.key(new);
            if new_id != id {
                if let Some(other) = t.position(&new_id) {
                    if other != pos {
                        return Err(BackendError::duplicate(&table, new_id.to_string()));
                    }
                }
            }
            let row = &mut t.rows[pos];
            for (column, value) in new {
                row.insert(column.clone(), value.clone());
            }
            Ok((id, changes, row.clone()))
        })?;
        self.shared.log.push(Operation::Update { table, id, changes });
        Ok(row)
    }

    fn delete(&self, data: &Record, config: &BackendConfig) -> BackendResult<()> {
        let table = Self::table_name(config)?;
        let id = self.shared.with_table_mut(&table, |t| {
            let id = t.key(data);
            let pos = t
                .position(&id)
                .ok_or_else(|| BackendError::not_found(&table, id.to_string()))?;
            t.rows.remove(pos);
            Ok(id)
        })?;
        self.shared.log.push(Operation::Delete { table, id });
        Ok(())
    }
}

/// Lazy query over one in-memory table.
struct MemoryRows {
    shared: Arc<Shared>,
    table: String,
    reference: Option<(String, Value)>,
    conditions: Conditions,
    columns: Option<Vec<String>>,
}

impl MemoryRows {
    fn narrowed(&self, conditions: Conditions, columns: Option<Vec<String>>) -> Box<dyn RowSource> {
        Box::new(MemoryRows {
            shared: Arc::clone(&self.shared),
            table: self.table.clone(),
            reference: self.reference.clone(),
            conditions,
            columns,
        })
    }

    fn operation(&self) -> Operation {
        match &self.reference {
            Some((reference, id)) => Operation::Related {
                table: self.table.clone(),
                reference: reference.clone(),
                id: id.clone(),
                conditions: self.conditions.clone(),
            },
            None => Operation::Select {
                table: self.table.clone(),
                conditions: self.conditions.clone(),
                columns: self.columns.clone(),
            },
        }
    }
}

impl RowSource for MemoryRows {
    fn fetch(&self) -> BackendResult<Vec<Record>> {
        self.shared.log.push(self.operation());
        self.shared.with_table(&self.table, |t| {
            let rows = t
                .rows
                .iter()
                .filter(|row| match &self.reference {
                    Some((column, id)) => loose_eq(&row.value(column), id),
                    None => true,
                })
                .filter(|row| matches!(self.conditions.matches(*row), Ok(true)))
                .map(|row| match &self.columns {
                    Some(columns) => row.project(columns),
                    None => row.clone(),
                })
                .collect();
            Ok(rows)
        })
    }

    fn push_down(&self, conditions: &Conditions) -> Option<Box<dyn RowSource>> {
        Some(self.narrowed(
            self.conditions.clone().merge(conditions),
            self.columns.clone(),
        ))
    }

    fn project(&self, columns: &[String]) -> Option<Box<dyn RowSource>> {
        Some(self.narrowed(self.conditions.clone(), Some(columns.to_vec())))
    }
}
