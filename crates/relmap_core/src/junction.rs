//! Many-to-many bridge rows.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use relmap_codec::{Record, Value};

use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;

struct JunctionInner {
    instance: Instance,
    fields: RwLock<Record>,
    dynamic: bool,
}

/// A related instance plus the extra columns of the junction row that links
/// it.
///
/// Field access tries the wrapped instance first, then the junction fields.
/// A strict junction only knows the fields it was created with; a dynamic
/// one absorbs unknown fields as new junction columns. Clones share state.
#[derive(Clone)]
pub struct Junction {
    inner: Arc<JunctionInner>,
}

impl Junction {
    /// A strict junction: unknown fields are errors.
    pub fn new(instance: Instance, fields: Record) -> Self {
        Self::build(instance, fields, false)
    }

    /// A dynamic junction: unknown fields become junction fields.
    pub fn dynamic(instance: Instance, fields: Record) -> Self {
        Self::build(instance, fields, true)
    }

    fn build(instance: Instance, fields: Record, dynamic: bool) -> Self {
        Self {
            inner: Arc::new(JunctionInner {
                instance,
                fields: RwLock::new(fields),
                dynamic,
            }),
        }
    }

    /// The wrapped instance.
    pub fn instance(&self) -> &Instance {
        &self.inner.instance
    }

    /// Returns true for dynamic junctions.
    pub fn is_dynamic(&self) -> bool {
        self.inner.dynamic
    }

    /// A copy of the junction fields.
    pub fn fields(&self) -> Record {
        self.inner.fields.read().clone()
    }

    /// Returns true when both handles share state.
    pub fn ptr_eq(a: &Junction, b: &Junction) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Reads `name` from the instance, else from the junction fields.
    ///
    /// A dynamic junction answers unknown fields with `Null` and records
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] for unknown fields of a strict
    /// junction.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        if self.inner.instance.has_field(name) {
            return self.inner.instance.get(name);
        }
        if let Some(value) = self.inner.fields.read().get(name) {
            return Ok(value.clone());
        }
        if self.inner.dynamic {
            self.inner.fields.write().insert(name, Value::Null);
            return Ok(Value::Null);
        }
        Err(self.unknown(name))
    }

    /// Writes `name` on the instance, else in the junction fields.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] for unknown fields of a strict
    /// junction.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        if self.inner.instance.has_field(name) {
            return self.inner.instance.set(name, value);
        }
        let mut fields = self.inner.fields.write();
        if fields.contains(name) || self.inner.dynamic {
            fields.insert(name, value);
            return Ok(());
        }
        Err(self.unknown(name))
    }

    /// Writes a junction field, bypassing the wrapped instance.
    pub(crate) fn set_field(&self, name: &str, value: Value) {
        self.inner.fields.write().insert(name, value);
    }

    fn unknown(&self, name: &str) -> CoreError {
        CoreError::unknown_property(format!("{} junction", self.inner.instance.model()), name)
    }
}

impl fmt::Debug for Junction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Junction")
            .field("instance", &self.inner.instance)
            .field("fields", &*self.inner.fields.read())
            .field("dynamic", &self.inner.dynamic)
            .finish()
    }
}
