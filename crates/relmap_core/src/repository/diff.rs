//! Unsaved changes of an instance.

use std::collections::BTreeMap;

use relmap_codec::Value;

use super::Repository;
use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::types::EntryState;

/// One changed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// The stored value; `None` for an instance that was never saved.
    pub previous: Option<Value>,
    /// The value the next save writes.
    pub next: Value,
}

/// Changed columns, keyed by column name.
pub type Changes = BTreeMap<String, Change>;

impl Repository {
    /// The columns whose current value differs from the stored data.
    ///
    /// A new instance is compared against the model's defaults. Columns are
    /// compared as they would be written, so belongsTo relations show up as
    /// changes of their reference column.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotBound`] for instances this repository does
    /// not track.
    pub fn diff(&self, model: &str, instance: &Instance) -> CoreResult<Changes> {
        let config = self.config(model)?;
        let (state, stored) = self.with_entry(instance.id(), |entry| match entry {
            Some(entry) if entry.model == model => Ok((entry.state, entry.data.clone())),
            _ => Err(CoreError::not_bound(model)),
        })?;
        let data = self.to_data(&config, instance)?;

        let mut changes = Changes::new();
        match stored {
            Some(stored) if state != EntryState::New => {
                for (column, next) in data {
                    let previous = stored.value(&column);
                    if previous != next {
                        changes.insert(
                            column,
                            Change {
                                previous: Some(previous),
                                next,
                            },
                        );
                    }
                }
            }
            _ => {
                for (column, next) in data {
                    let default = match config.property_for_column(&column) {
                        Some(property) => config.defaults.value(property),
                        None => config
                            .belongs_to
                            .iter()
                            .find(|(_, r)| r.reference.as_deref() == Some(column.as_str()))
                            .and_then(|(_, r)| r.default.clone())
                            .unwrap_or_default(),
                    };
                    if default != next {
                        changes.insert(column, Change { previous: None, next });
                    }
                }
            }
        }
        Ok(changes)
    }
}
