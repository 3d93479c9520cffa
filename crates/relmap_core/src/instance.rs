//! Live model instances.
//!
//! An [`Instance`] is a shared handle to one in-memory object. Cloning the
//! handle does not copy the object; [`Instance::ptr_eq`] is reference
//! equality. The set of fields is fixed by the model's config when the
//! instance is built: mapped properties first, then belongsTo relations,
//! then hasMany relations.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relmap_codec::{PathTarget, PropertyPath, Value};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::junction::Junction;
use crate::placeholder::{BelongsToPlaceholder, HasManyPlaceholder};
use crate::types::InstanceId;

/// The content of one instance field.
#[derive(Debug, Clone)]
pub enum Field {
    /// A mapped property.
    Value(Value),
    /// A loaded many-to-one relation; `None` when the foreign key is null.
    BelongsTo(Option<Instance>),
    /// A loaded one-to-many or many-to-many relation.
    HasMany(Vec<Related>),
    /// A many-to-one relation that was not loaded yet.
    BelongsToPlaceholder(BelongsToPlaceholder),
    /// A one-to-many or many-to-many relation that was not loaded yet.
    HasManyPlaceholder(HasManyPlaceholder),
}

impl Field {
    /// Returns true for unresolved relations.
    pub fn is_placeholder(&self) -> bool {
        matches!(
            self,
            Field::BelongsToPlaceholder(_) | Field::HasManyPlaceholder(_)
        )
    }

    /// Short name of the field kind, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Field::Value(_) => "value",
            Field::BelongsTo(_) => "belongsTo",
            Field::HasMany(_) => "hasMany",
            Field::BelongsToPlaceholder(_) => "belongsTo placeholder",
            Field::HasManyPlaceholder(_) => "hasMany placeholder",
        }
    }
}

/// One element of a hasMany collection.
#[derive(Debug, Clone)]
pub enum Related {
    /// A plain related instance.
    Instance(Instance),
    /// A related instance reached through a junction row with extra fields.
    Junction(Junction),
}

impl Related {
    /// The related instance.
    pub fn instance(&self) -> &Instance {
        match self {
            Related::Instance(instance) => instance,
            Related::Junction(junction) => junction.instance(),
        }
    }

    /// The junction wrapper, if any.
    pub fn junction(&self) -> Option<&Junction> {
        match self {
            Related::Instance(_) => None,
            Related::Junction(junction) => Some(junction),
        }
    }

    /// Reads `name` from the junction (when present) or the instance.
    ///
    /// # Errors
    ///
    /// Returns an error when neither has the field.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        match self {
            Related::Instance(instance) => instance.get(name),
            Related::Junction(junction) => junction.get(name),
        }
    }

    /// Returns true when both wrap the same instance object.
    pub fn is(&self, instance: &Instance) -> bool {
        Instance::ptr_eq(self.instance(), instance)
    }
}

impl From<Instance> for Related {
    fn from(instance: Instance) -> Self {
        Related::Instance(instance)
    }
}

impl From<Junction> for Related {
    fn from(junction: Junction) -> Self {
        Related::Junction(junction)
    }
}

pub(crate) struct InstanceInner {
    id: InstanceId,
    model: String,
    state: RwLock<InstanceState>,
}

struct InstanceState {
    fields: Vec<(String, Field)>,
    deleted: bool,
}

impl InstanceState {
    fn slot(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, f)| f)
    }
}

/// Shared handle to a live model instance.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

/// Non-owning handle to an [`Instance`].
#[derive(Clone)]
pub struct WeakInstance {
    id: InstanceId,
    inner: Weak<InstanceInner>,
}

impl WeakInstance {
    /// The id of the instance this handle points to.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Returns the instance if it is still alive.
    pub fn upgrade(&self) -> Option<Instance> {
        self.inner.upgrade().map(|inner| Instance { inner })
    }

    /// Returns true when this handle points to `instance`.
    pub fn is(&self, instance: &Instance) -> bool {
        self.id == instance.id()
    }
}

impl fmt::Debug for WeakInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakInstance").field(&self.id).finish()
    }
}

impl Instance {
    pub(crate) fn new(id: InstanceId, model: impl Into<String>, fields: Vec<(String, Field)>) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                id,
                model: model.into(),
                state: RwLock::new(InstanceState {
                    fields,
                    deleted: false,
                }),
            }),
        }
    }

    /// Object identity of this instance.
    pub fn id(&self) -> InstanceId {
        self.inner.id
    }

    /// Name of the model this instance belongs to.
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Returns true when both handles point to the same object.
    pub fn ptr_eq(a: &Instance, b: &Instance) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Creates a non-owning handle.
    pub fn downgrade(&self) -> WeakInstance {
        WeakInstance {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Returns true once the instance was deleted.
    pub fn is_deleted(&self) -> bool {
        self.inner.state.read().deleted
    }

    fn deleted(&self) -> CoreError {
        CoreError::instance_deleted(self.model())
    }

    fn unknown(&self, name: &str) -> CoreError {
        CoreError::unknown_property(self.model(), name)
    }

    /// Names of the fields, in order.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceDeleted`] after delete.
    pub fn field_names(&self) -> CoreResult<Vec<String>> {
        let state = self.inner.state.read();
        if state.deleted {
            return Err(self.deleted());
        }
        Ok(state.fields.iter().map(|(name, _)| name.clone()).collect())
    }

    /// Returns true when the instance has field `name`.
    pub fn has_field(&self, name: &str) -> bool {
        self.inner.state.read().slot(name).is_some()
    }

    /// A copy of the raw content of field `name`.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown fields or a deleted instance.
    pub fn field(&self, name: &str) -> CoreResult<Field> {
        let state = self.inner.state.read();
        if state.deleted {
            return Err(self.deleted());
        }
        state.slot(name).cloned().ok_or_else(|| self.unknown(name))
    }

    pub(crate) fn fields(&self) -> CoreResult<Vec<(String, Field)>> {
        let state = self.inner.state.read();
        if state.deleted {
            return Err(self.deleted());
        }
        Ok(state.fields.clone())
    }

    /// Reads the mapped property `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAValue`] for relation fields and
    /// [`CoreError::UnknownProperty`] for unknown fields.
    pub fn get(&self, name: &str) -> CoreResult<Value> {
        match self.field(name)? {
            Field::Value(value) => Ok(value),
            _ => Err(CoreError::NotAValue {
                model: self.model().to_string(),
                property: name.to_string(),
            }),
        }
    }

    /// Writes the mapped property `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotAValue`] for relation fields and
    /// [`CoreError::UnknownProperty`] for unknown fields.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        let mut state = self.inner.state.write();
        if state.deleted {
            return Err(self.deleted());
        }
        match state.slot_mut(name) {
            Some(Field::Value(slot)) => {
                *slot = value.into();
                Ok(())
            }
            Some(_) => Err(CoreError::NotAValue {
                model: self.model().to_string(),
                property: name.to_string(),
            }),
            None => Err(self.unknown(name)),
        }
    }

    /// Reads the value at property path `path`, following belongsTo
    /// relations (and resolving their placeholders) on the way.
    ///
    /// Returns `Null` when nothing lives at the path.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid path, an unknown head field, or a
    /// failing placeholder resolution.
    pub fn get_path(&self, path: &str) -> CoreResult<Value> {
        let path = PropertyPath::parse(path)?;
        Ok(self.resolve_path(&path)?.unwrap_or_default())
    }

    /// Writes `value` at property path `path` inside a mapped property.
    ///
    /// # Errors
    ///
    /// Returns an error when the head of the path is not a value field.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> CoreResult<()> {
        let path = PropertyPath::parse(path)?;
        self.write_path(&path, value.into())
    }

    pub(crate) fn write_path(&self, path: &PropertyPath, value: Value) -> CoreResult<()> {
        let (head, rest) = path.split_first();
        let Some(rest) = rest else {
            return self.set(head.name(), value);
        };
        let mut state = self.inner.state.write();
        if state.deleted {
            return Err(self.deleted());
        }
        match state.slot_mut(head.name()) {
            Some(Field::Value(slot)) => Ok(rest.set(slot, value)?),
            Some(_) => Err(CoreError::NotAValue {
                model: self.model().to_string(),
                property: head.name().to_string(),
            }),
            None => Err(self.unknown(head.name())),
        }
    }

    pub(crate) fn read_path(&self, path: &PropertyPath) -> CoreResult<Value> {
        let (head, rest) = path.split_first();
        let value = self.get(head.name())?;
        Ok(match rest {
            None => value,
            Some(rest) => rest.get(&value).cloned().unwrap_or_default(),
        })
    }

    /// The many-to-one relation `name`; `None` when it is empty.
    ///
    /// An unresolved relation is returned as a placeholder reference that
    /// answers known fields (the foreign key) without a backend round-trip.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a belongsTo relation.
    pub fn belongs_to(&self, name: &str) -> CoreResult<Option<BelongsToRef>> {
        match self.field(name)? {
            Field::BelongsTo(target) => Ok(target.map(BelongsToRef::Loaded)),
            Field::BelongsToPlaceholder(placeholder) => Ok(Some(BelongsToRef::Placeholder {
                placeholder,
                via: self.clone(),
            })),
            _ => Err(CoreError::not_a_relation(self.model(), name, "belongsTo")),
        }
    }

    /// Points the many-to-one relation `name` at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a belongsTo relation.
    pub fn set_belongs_to(&self, name: &str, target: Option<Instance>) -> CoreResult<()> {
        match self.field(name)? {
            Field::BelongsTo(_) | Field::BelongsToPlaceholder(_) => {
                self.replace_field(name, Field::BelongsTo(target))?;
                Ok(())
            }
            _ => Err(CoreError::not_a_relation(self.model(), name, "belongsTo")),
        }
    }

    /// The elements of the hasMany relation `name`, loading it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a hasMany relation or loading
    /// fails.
    pub fn has_many(&self, name: &str) -> CoreResult<Vec<Related>> {
        match self.field(name)? {
            Field::HasMany(items) => Ok(items),
            Field::HasManyPlaceholder(placeholder) => placeholder.resolve(self),
            _ => Err(CoreError::not_a_relation(self.model(), name, "hasMany")),
        }
    }

    /// Replaces the elements of the hasMany relation `name`.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a hasMany relation.
    pub fn set_has_many(&self, name: &str, items: Vec<Related>) -> CoreResult<()> {
        match self.field(name)? {
            Field::HasMany(_) | Field::HasManyPlaceholder(_) => {
                self.replace_field(name, Field::HasMany(items))?;
                Ok(())
            }
            _ => Err(CoreError::not_a_relation(self.model(), name, "hasMany")),
        }
    }

    /// Appends to the hasMany relation `name`, loading it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a hasMany relation or loading
    /// fails.
    pub fn push_related(&self, name: &str, item: impl Into<Related>) -> CoreResult<()> {
        let mut items = self.has_many(name)?;
        items.push(item.into());
        self.replace_field(name, Field::HasMany(items))?;
        Ok(())
    }

    /// Removes `target` from the hasMany relation `name`.
    ///
    /// Returns whether it was present.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is not a hasMany relation or loading
    /// fails.
    pub fn remove_related(&self, name: &str, target: &Instance) -> CoreResult<bool> {
        let mut items = self.has_many(name)?;
        let before = items.len();
        items.retain(|item| !item.is(target));
        let removed = items.len() != before;
        if removed {
            self.replace_field(name, Field::HasMany(items))?;
        }
        Ok(removed)
    }

    /// A shallow copy: a new object with the same field contents.
    ///
    /// Placeholders are shared with the original, which keeps owning them;
    /// resolving one through the copy fails with
    /// [`CoreError::StalePlaceholder`]. The copy is not bound to any
    /// repository.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InstanceDeleted`] after delete.
    pub fn duplicate(&self) -> CoreResult<Instance> {
        let fields = self.fields()?;
        Ok(Instance::new(InstanceId::next(), self.model(), fields))
    }

    /// Writes a field, returning the previous content.
    ///
    /// A replaced placeholder owned by this instance is marked as such.
    pub(crate) fn replace_field(&self, name: &str, field: Field) -> CoreResult<Field> {
        let old = {
            let mut state = self.inner.state.write();
            if state.deleted {
                return Err(self.deleted());
            }
            let slot = state.slot_mut(name).ok_or_else(|| self.unknown(name))?;
            std::mem::replace(slot, field.clone())
        };
        match &old {
            Field::BelongsToPlaceholder(placeholder) if placeholder.is_owned_by(self) => {
                let replacement = match field {
                    Field::BelongsTo(target) => target,
                    _ => None,
                };
                trace!(model = %self.model(), property = name, "belongsTo placeholder replaced");
                placeholder.mark_replaced(replacement);
            }
            Field::HasManyPlaceholder(placeholder) if placeholder.is_owned_by(self) => {
                trace!(model = %self.model(), property = name, "hasMany placeholder replaced");
                placeholder.mark_replaced();
            }
            _ => {}
        }
        Ok(old)
    }

    /// Clears every field and marks the instance deleted.
    pub(crate) fn tombstone(&self) {
        let mut state = self.inner.state.write();
        state.fields.clear();
        state.deleted = true;
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Instance::ptr_eq(self, other)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("model", &self.inner.model)
            .finish_non_exhaustive()
    }
}

impl PathTarget for Instance {
    type Error = CoreError;

    fn resolve_path(&self, path: &PropertyPath) -> CoreResult<Option<Value>> {
        let (head, rest) = path.split_first();
        let field = self.field(head.name())?;
        match (field, rest) {
            (Field::Value(value), None) => Ok(Some(value)),
            (Field::Value(value), Some(rest)) => Ok(rest.get(&value).cloned()),
            (Field::BelongsTo(Some(target)), Some(rest)) => target.resolve_path(&rest),
            (Field::BelongsToPlaceholder(placeholder), Some(rest)) => {
                if rest.is_simple() {
                    if let Some(known) = placeholder.known(rest.head()) {
                        return Ok(Some(known));
                    }
                }
                placeholder.resolve(self)?.resolve_path(&rest)
            }
            _ => Ok(None),
        }
    }
}

/// A many-to-one relation as reached through its container.
#[derive(Debug, Clone)]
pub enum BelongsToRef {
    /// The related instance is loaded.
    Loaded(Instance),
    /// The related instance was not loaded yet.
    Placeholder {
        /// The placeholder standing in for the related instance.
        placeholder: BelongsToPlaceholder,
        /// The container the placeholder was read from.
        via: Instance,
    },
}

impl BelongsToRef {
    /// Returns true while the relation is unresolved.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, BelongsToRef::Placeholder { .. })
    }

    /// Returns the related instance, loading it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::StalePlaceholder`] when the placeholder was read
    /// through a duplicate of its container, or the loading error.
    pub fn resolve(&self) -> CoreResult<Instance> {
        match self {
            BelongsToRef::Loaded(instance) => Ok(instance.clone()),
            BelongsToRef::Placeholder { placeholder, via } => placeholder.resolve(via),
        }
    }

    /// Reads property path `path` of the related instance.
    ///
    /// Fields the placeholder already knows (the referenced id) are answered
    /// without loading.
    ///
    /// # Errors
    ///
    /// Returns an error when loading fails or the path is invalid.
    pub fn get(&self, path: &str) -> CoreResult<Value> {
        if let BelongsToRef::Placeholder { placeholder, .. } = self {
            if let Some(known) = placeholder.known(path) {
                return Ok(known);
            }
        }
        self.resolve()?.get_path(path)
    }

    /// Writes property path `path` of the related instance, loading it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PlaceholderReplaced`] when this reference still
    /// holds a placeholder that was substituted in the meantime.
    pub fn set(&self, path: &str, value: impl Into<Value>) -> CoreResult<()> {
        if let BelongsToRef::Placeholder { placeholder, .. } = self {
            if placeholder.is_replaced() {
                return Err(CoreError::PlaceholderReplaced {
                    property: placeholder.property().to_string(),
                });
            }
        }
        self.resolve()?.set_path(path, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> Instance {
        Instance::new(
            InstanceId::next(),
            "Customer",
            vec![
                ("id".into(), Field::Value(Value::Integer(1))),
                ("name".into(), Field::Value(Value::from("Bob Fanger"))),
                (
                    "address".into(),
                    Field::Value(Value::map(vec![(
                        Value::from("city"),
                        Value::from("Amsterdam"),
                    )])),
                ),
                ("orders".into(), Field::HasMany(Vec::new())),
            ],
        )
    }

    fn order(customer: Option<Instance>) -> Instance {
        Instance::new(
            InstanceId::next(),
            "Order",
            vec![
                ("id".into(), Field::Value(Value::Integer(1))),
                ("product".into(), Field::Value(Value::from("Kop koffie"))),
                ("customer".into(), Field::BelongsTo(customer)),
            ],
        )
    }

    #[test]
    fn get_and_set_values() {
        let bob = customer();
        assert_eq!(bob.get("name").unwrap(), Value::from("Bob Fanger"));
        bob.set("name", "Robert").unwrap();
        assert_eq!(bob.get("name").unwrap(), Value::from("Robert"));
        assert!(matches!(
            bob.get("missing"),
            Err(CoreError::UnknownProperty { .. })
        ));
        assert!(matches!(bob.get("orders"), Err(CoreError::NotAValue { .. })));
        assert!(matches!(bob.set("orders", 1), Err(CoreError::NotAValue { .. })));
    }

    #[test]
    fn handles_share_the_object() {
        let bob = customer();
        let alias = bob.clone();
        alias.set("name", "Bobby").unwrap();
        assert_eq!(bob.get("name").unwrap(), Value::from("Bobby"));
        assert!(Instance::ptr_eq(&bob, &alias));
        assert_eq!(bob, alias);
        assert_ne!(bob, customer());
    }

    #[test]
    fn nested_paths() {
        let bob = customer();
        assert_eq!(bob.get_path("address.city").unwrap(), Value::from("Amsterdam"));
        bob.set_path("address.zip", "1000AA").unwrap();
        assert_eq!(bob.get_path("address[zip]").unwrap(), Value::from("1000AA"));
        assert!(bob.get_path("address.street").unwrap().is_null());
        assert!(bob.set_path("orders.x", 1).is_err());
    }

    #[test]
    fn paths_follow_relations() {
        let bob = customer();
        let coffee = order(Some(bob.clone()));
        assert_eq!(coffee.get_path("customer.name").unwrap(), Value::from("Bob Fanger"));
        assert!(coffee.get_path("customer").unwrap().is_null());
        assert!(order(None).get_path("customer.name").unwrap().is_null());
    }

    #[test]
    fn relations() {
        let bob = customer();
        let coffee = order(None);
        assert!(coffee.belongs_to("customer").unwrap().is_none());
        coffee.set_belongs_to("customer", Some(bob.clone())).unwrap();
        let target = coffee.belongs_to("customer").unwrap().unwrap();
        assert!(!target.is_placeholder());
        assert_eq!(target.get("name").unwrap(), Value::from("Bob Fanger"));
        assert!(coffee.belongs_to("product").is_err());

        bob.push_related("orders", coffee.clone()).unwrap();
        assert_eq!(bob.has_many("orders").unwrap().len(), 1);
        assert!(bob.remove_related("orders", &coffee).unwrap());
        assert!(!bob.remove_related("orders", &coffee).unwrap());
        assert!(bob.has_many("orders").unwrap().is_empty());
        assert!(bob.has_many("name").is_err());
    }

    #[test]
    fn duplicate_is_a_new_object() {
        let bob = customer();
        let copy = bob.duplicate().unwrap();
        assert_ne!(bob, copy);
        copy.set("name", "Copy").unwrap();
        assert_eq!(bob.get("name").unwrap(), Value::from("Bob Fanger"));
    }

    #[test]
    fn tombstone_rejects_access() {
        let bob = customer();
        bob.tombstone();
        assert!(bob.is_deleted());
        assert!(matches!(
            bob.get("name"),
            Err(CoreError::InstanceDeleted { .. })
        ));
        assert!(matches!(
            bob.set("name", "x"),
            Err(CoreError::InstanceDeleted { .. })
        ));
        assert!(bob.field_names().is_err());
        assert!(bob.duplicate().is_err());
    }

    #[test]
    fn weak_handles() {
        let bob = customer();
        let weak = bob.downgrade();
        assert!(weak.is(&bob));
        assert_eq!(weak.upgrade(), Some(bob.clone()));
        drop(bob);
        assert!(weak.upgrade().is_none());
    }
}
