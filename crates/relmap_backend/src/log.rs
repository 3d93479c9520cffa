//! Record of executed backend operations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use relmap_codec::{Conditions, Record, Value};

/// One executed backend operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Single-row fetch by id.
    Get {
        /// Table queried.
        table: String,
        /// Requested id columns.
        id: Record,
    },
    /// Multi-row query.
    Select {
        /// Table queried.
        table: String,
        /// Pushed-down filter.
        conditions: Conditions,
        /// Projected columns, `None` for all.
        columns: Option<Vec<String>>,
    },
    /// Rows referring to a parent id.
    Related {
        /// Table queried.
        table: String,
        /// Referring column.
        reference: String,
        /// Parent id.
        id: Value,
        /// Additional pushed-down filter.
        conditions: Conditions,
    },
    /// Row insert.
    Insert {
        /// Table written.
        table: String,
        /// The row as stored.
        row: Record,
    },
    /// Row update.
    Update {
        /// Table written.
        table: String,
        /// Key of the updated row.
        id: Record,
        /// Changed columns only.
        changes: Record,
    },
    /// Row delete.
    Delete {
        /// Table written.
        table: String,
        /// Key of the deleted row.
        id: Record,
    },
}

impl Operation {
    /// Returns true for inserts, updates and deletes.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Operation::Insert { .. } | Operation::Update { .. } | Operation::Delete { .. }
        )
    }

    /// The table the operation touched.
    pub fn table(&self) -> &str {
        match self {
            Operation::Get { table, .. }
            | Operation::Select { table, .. }
            | Operation::Related { table, .. }
            | Operation::Insert { table, .. }
            | Operation::Update { table, .. }
            | Operation::Delete { table, .. } => table,
        }
    }
}

fn write_where(f: &mut fmt::Formatter<'_>, id: &Record) -> fmt::Result {
    for (i, (column, value)) in id.iter().enumerate() {
        let glue = if i == 0 { " WHERE" } else { " AND" };
        write!(f, "{glue} {column} = {value}")?;
    }
    Ok(())
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Get { table, id } => {
                write!(f, "SELECT * FROM {table}")?;
                write_where(f, id)
            }
            Operation::Select {
                table,
                conditions,
                columns,
            } => {
                let columns = columns.as_ref().map_or_else(|| "*".to_string(), |c| c.join(", "));
                write!(f, "SELECT {columns} FROM {table}")?;
                if !conditions.is_empty() {
                    write!(f, " WHERE {conditions}")?;
                }
                Ok(())
            }
            Operation::Related {
                table,
                reference,
                id,
                conditions,
            } => {
                write!(f, "SELECT * FROM {table} WHERE {reference} = {id}")?;
                if !conditions.is_empty() {
                    write!(f, " AND {conditions}")?;
                }
                Ok(())
            }
            Operation::Insert { table, row } => {
                let columns: Vec<&str> = row.columns().collect();
                let values: Vec<String> = row.iter().map(|(_, v)| v.to_string()).collect();
                write!(
                    f,
                    "INSERT INTO {table} ({}) VALUES ({})",
                    columns.join(", "),
                    values.join(", ")
                )
            }
            Operation::Update { table, id, changes } => {
                let sets: Vec<String> = changes.iter().map(|(c, v)| format!("{c} = {v}")).collect();
                write!(f, "UPDATE {table} SET {}", sets.join(", "))?;
                write_where(f, id)
            }
            Operation::Delete { table, id } => {
                write!(f, "DELETE FROM {table}")?;
                write_where(f, id)
            }
        }
    }
}

/// A shared, append-only list of [`Operation`]s.
///
/// Clones share the same list.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    operations: Arc<Mutex<Vec<Operation>>>,
}

impl OperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, operation: Operation) {
        self.operations.lock().push(operation);
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.operations.lock().is_empty()
    }

    /// A copy of every recorded operation.
    pub fn operations(&self) -> Vec<Operation> {
        self.operations.lock().clone()
    }

    /// Operations recorded after position `mark` (a previous [`len`](Self::len)).
    pub fn since(&self, mark: usize) -> Vec<Operation> {
        self.operations
            .lock()
            .iter()
            .skip(mark)
            .cloned()
            .collect()
    }

    /// Number of inserts, updates and deletes recorded.
    pub fn writes(&self) -> usize {
        self.operations.lock().iter().filter(|op| op.is_write()).count()
    }

    /// The recorded operations rendered as statements.
    pub fn statements(&self) -> Vec<String> {
        self.operations.lock().iter().map(ToString::to_string).collect()
    }

    /// Forgets every recorded operation.
    pub fn clear(&self) {
        self.operations.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_statements() {
        let get = Operation::Get {
            table: "customers".into(),
            id: Record::new().with("id", 1),
        };
        assert_eq!(get.to_string(), "SELECT * FROM customers WHERE id = 1");

        let update = Operation::Update {
            table: "customers".into(),
            id: Record::new().with("id", 1),
            changes: Record::new().with("occupation", "Rocket scientist"),
        };
        assert_eq!(
            update.to_string(),
            "UPDATE customers SET occupation = 'Rocket scientist' WHERE id = 1"
        );
        assert!(update.is_write());

        let insert = Operation::Insert {
            table: "orders".into(),
            row: Record::new().with("id", 4).with("product", "Tea"),
        };
        assert_eq!(
            insert.to_string(),
            "INSERT INTO orders (id, product) VALUES (4, 'Tea')"
        );

        let related = Operation::Related {
            table: "orders".into(),
            reference: "customer_id".into(),
            id: Value::Integer(2),
            conditions: Conditions::new(),
        };
        assert_eq!(related.to_string(), "SELECT * FROM orders WHERE customer_id = 2");
        assert!(!related.is_write());
    }

    #[test]
    fn select_with_projection() {
        let select = Operation::Select {
            table: "customers".into(),
            conditions: Conditions::field_eq("id", 1),
            columns: Some(vec!["name".into()]),
        };
        assert_eq!(select.to_string(), "SELECT name FROM customers WHERE id = 1");
    }

    #[test]
    fn clones_share_the_log() {
        let log = OperationLog::new();
        let other = log.clone();
        other.push(Operation::Delete {
            table: "orders".into(),
            id: Record::new().with("id", 3),
        });
        assert_eq!(log.len(), 1);
        assert_eq!(log.writes(), 1);
        assert_eq!(log.statements(), vec!["DELETE FROM orders WHERE id = 3"]);
        assert!(log.since(1).is_empty());
        log.clear();
        assert!(other.is_empty());
    }
}
