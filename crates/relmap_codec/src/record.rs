//! Raw backend rows.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use crate::value::Value;

/// One raw backend row: column name to value.
///
/// Columns are kept in key order, so two records with the same columns and
/// values always compare (and print) identically.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    columns: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of `column`, if present.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Returns the value of `column`, or `Null` when absent.
    pub fn value(&self, column: &str) -> Value {
        self.columns.get(column).cloned().unwrap_or_default()
    }

    /// Returns true when the record has `column`.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Sets `column`, returning the previous value.
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.columns.insert(column.into(), value.into())
    }

    /// Removes `column`, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Returns a record holding only `fields` (missing ones become `Null`).
    #[must_use]
    pub fn project<S: AsRef<str>>(&self, fields: &[S]) -> Self {
        fields
            .iter()
            .map(|field| (field.as_ref().to_string(), self.value(field.as_ref())))
            .collect()
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the record has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates columns in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.columns.iter()
    }

    /// Column names in key order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Converts the record into a map value.
    pub fn to_value(&self) -> Value {
        Value::map(
            self.columns
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Builds a record from a map value with text keys.
    ///
    /// Returns `None` when `value` is not a map.
    pub fn from_value(value: &Value) -> Option<Self> {
        let pairs = value.as_map()?;
        Some(
            pairs
                .iter()
                .filter_map(|(k, v)| k.as_text().map(|key| (key.to_string(), v.clone())))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            columns: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Record {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<'a> IntoIterator for &'a Record {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.iter()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (column, value)) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{column}: {value}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_array() {
        let record = Record::from([("id", Value::Integer(1)), ("name", Value::from("Bob"))]);
        assert_eq!(record.len(), 2);
        assert_eq!(record.get("name"), Some(&Value::from("Bob")));
        assert_eq!(record.value("missing"), Value::Null);
    }

    #[test]
    fn project_keeps_requested_fields() {
        let record = Record::new()
            .with("id", 1)
            .with("name", "Bob")
            .with("occupation", "Developer");
        let projected = record.project(&["name", "unknown"]);
        assert_eq!(projected.len(), 2);
        assert_eq!(projected.value("name"), Value::from("Bob"));
        assert!(projected.value("unknown").is_null());
    }

    #[test]
    fn value_conversion() {
        let record = Record::new().with("id", 1).with("name", "Bob");
        let value = record.to_value();
        assert_eq!(value.get("id"), Some(&Value::Integer(1)));
        assert_eq!(Record::from_value(&value), Some(record));
        assert_eq!(Record::from_value(&Value::Integer(1)), None);
    }

    #[test]
    fn display_in_column_order() {
        let record = Record::new().with("b", 2).with("a", "x");
        assert_eq!(record.to_string(), "{a: 'x', b: 2}");
    }
}
