//! Lazy stand-ins for unloaded relations.
//!
//! A placeholder is installed in a relation field when an instance is built
//! from backend data. It holds just enough to load the relation once:
//! the repository, the container it belongs to and, for belongsTo, the
//! referenced id. Resolving writes the loaded value into the container,
//! after which the placeholder is dead: writes through an old reference
//! fail with [`CoreError::PlaceholderReplaced`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use relmap_codec::{Record, Value};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::instance::{Field, Instance, Related, WeakInstance};
use crate::repository::Repository;

struct BelongsToShared {
    repository: Repository,
    model: String,
    property: String,
    target: String,
    id: Value,
    known: Record,
    container: WeakInstance,
    replacement: Mutex<Option<Option<Instance>>>,
}

/// Stand-in for an unloaded many-to-one relation.
///
/// Clones share state, so every copy sees the substitution.
#[derive(Clone)]
pub struct BelongsToPlaceholder {
    shared: Arc<BelongsToShared>,
}

impl BelongsToPlaceholder {
    pub(crate) fn new(
        repository: Repository,
        container: &Instance,
        property: impl Into<String>,
        target: impl Into<String>,
        id: Value,
        known: Record,
    ) -> Self {
        Self {
            shared: Arc::new(BelongsToShared {
                repository,
                model: container.model().to_string(),
                property: property.into(),
                target: target.into(),
                id,
                known,
                container: container.downgrade(),
                replacement: Mutex::new(None),
            }),
        }
    }

    /// Model of the related instance.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    /// The relation property on the container.
    pub fn property(&self) -> &str {
        &self.shared.property
    }

    /// The foreign key this placeholder resolves.
    pub fn id(&self) -> &Value {
        &self.shared.id
    }

    /// A field of the related instance known without loading it.
    pub fn known(&self, property: &str) -> Option<Value> {
        self.shared.known.get(property).cloned()
    }

    /// Returns true once the placeholder was substituted.
    pub fn is_replaced(&self) -> bool {
        self.shared.replacement.lock().is_some()
    }

    /// Returns true when `instance` is the container that owns this
    /// placeholder.
    pub fn is_owned_by(&self, instance: &Instance) -> bool {
        self.shared.container.is(instance)
    }

    pub(crate) fn ptr_eq(&self, other: &BelongsToPlaceholder) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn mark_replaced(&self, replacement: Option<Instance>) {
        *self.shared.replacement.lock() = Some(replacement);
    }

    /// Loads the related instance and substitutes it into the container.
    ///
    /// `via` is the container the placeholder was read from.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StalePlaceholder`] when `via` is not the owning
    /// container, [`CoreError::PlaceholderReplaced`] when the relation was
    /// cleared since, or the loading error.
    pub fn resolve(&self, via: &Instance) -> CoreResult<Instance> {
        if !self.is_owned_by(via) {
            return Err(CoreError::StalePlaceholder {
                property: self.shared.property.clone(),
            });
        }
        if let Some(replacement) = self.shared.replacement.lock().clone() {
            return replacement.ok_or_else(|| CoreError::PlaceholderReplaced {
                property: self.shared.property.clone(),
            });
        }

        let shared = &self.shared;
        trace!(
            model = %shared.model,
            property = %shared.property,
            target = %shared.target,
            id = %shared.id,
            "resolving belongsTo placeholder"
        );
        let instance = shared
            .repository
            .find_belongs_to(&shared.model, &shared.property, &shared.id)?;

        let current = via.field(&shared.property)?;
        if matches!(&current, Field::BelongsToPlaceholder(p) if p.ptr_eq(self)) {
            via.replace_field(&shared.property, Field::BelongsTo(Some(instance.clone())))?;
        } else {
            self.mark_replaced(Some(instance.clone()));
        }
        Ok(instance)
    }
}

impl fmt::Debug for BelongsToPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BelongsToPlaceholder")
            .field("target", &self.shared.target)
            .field("id", &self.shared.id)
            .field("property", &self.shared.property)
            .field("replaced", &self.is_replaced())
            .finish()
    }
}

struct HasManyShared {
    repository: Repository,
    model: String,
    property: String,
    container: WeakInstance,
    replaced: AtomicBool,
}

/// Stand-in for an unloaded one-to-many or many-to-many relation.
#[derive(Clone)]
pub struct HasManyPlaceholder {
    shared: Arc<HasManyShared>,
}

impl HasManyPlaceholder {
    pub(crate) fn new(repository: Repository, container: &Instance, property: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(HasManyShared {
                repository,
                model: container.model().to_string(),
                property: property.into(),
                container: container.downgrade(),
                replaced: AtomicBool::new(false),
            }),
        }
    }

    /// The relation property on the container.
    pub fn property(&self) -> &str {
        &self.shared.property
    }

    /// Returns true once the placeholder was substituted.
    pub fn is_replaced(&self) -> bool {
        self.shared.replaced.load(Ordering::Acquire)
    }

    /// Returns true when `instance` is the container that owns this
    /// placeholder.
    pub fn is_owned_by(&self, instance: &Instance) -> bool {
        self.shared.container.is(instance)
    }

    pub(crate) fn mark_replaced(&self) {
        self.shared.replaced.store(true, Ordering::Release);
    }

    /// Loads the collection and substitutes it into the container.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StalePlaceholder`] when `via` is not the owning
    /// container, or the loading error.
    pub fn resolve(&self, via: &Instance) -> CoreResult<Vec<Related>> {
        if !self.is_owned_by(via) {
            return Err(CoreError::StalePlaceholder {
                property: self.shared.property.clone(),
            });
        }
        if self.is_replaced() {
            return via.has_many(&self.shared.property);
        }
        trace!(
            model = %self.shared.model,
            property = %self.shared.property,
            "resolving hasMany placeholder"
        );
        self.shared
            .repository
            .load_has_many(&self.shared.model, via, &self.shared.property)
    }
}

impl fmt::Debug for HasManyPlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HasManyPlaceholder")
            .field("model", &self.shared.model)
            .field("property", &self.shared.property)
            .field("replaced", &self.is_replaced())
            .finish()
    }
}
