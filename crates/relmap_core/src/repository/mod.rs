//! The repository: identity map, retrieval and the entry points of every
//! other operation.
//!
//! Locking rules: the registry, identity map and listener locks are taken
//! for short critical sections only. None of them is held while a backend
//! is called, while a listener runs, or while another repository operation
//! runs.

mod diff;
mod events;
mod export;
mod identity;
mod mapping;
mod persist;
mod registry;
mod relations;
mod reload;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use relmap_codec::{Conditions, PropertyPath, Record, Value};
use tracing::{debug, trace};

use crate::collection::{Collection, RepositoryCollection};
use crate::config::{ConvertOptions, GetOptions};
use crate::error::{CoreError, CoreResult};
use crate::instance::{Instance, Related};
use crate::junction::Junction;
use crate::types::{EntryState, InstanceId, Lifecycle, RepositoryId};

pub use diff::{Change, Changes};
pub(crate) use identity::{Entry, IdentityMap, Reference};
pub(crate) use mapping::column_of;
use mapping::{blank_fields, id_record, index_of_data, index_of_instance};

struct RepositoryInner {
    id: RepositoryId,
    registry: RwLock<registry::Registry>,
    identity: Mutex<IdentityMap>,
    listeners: RwLock<events::Listeners>,
}

/// Maps backend rows to live instances, one instance per row.
///
/// A `Repository` is a cheap handle; clones share the same registry and
/// identity map. Within one repository, fetching the same model and id twice
/// yields the same [`Instance`] object for as long as one handle to it is
/// alive.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use relmap_backend::{table_config, InMemoryBackend, ModelConfig, TableSchema};
/// use relmap_codec::{Record, Value};
/// use relmap_core::Repository;
///
/// let backend = InMemoryBackend::new();
/// backend.create_table(TableSchema::new("customers")).unwrap();
/// backend.seed("customers", [Record::new().with("id", 1).with("name", "Bob")]).unwrap();
/// backend.register_model(ModelConfig::new("Customer", table_config("customers")).columns(["id", "name"]));
///
/// let repo = Repository::new();
/// repo.register_backend(Arc::new(backend)).unwrap();
///
/// let bob = repo.get("Customer", 1).unwrap();
/// assert_eq!(bob.get("name").unwrap(), Value::from("Bob"));
/// assert_eq!(repo.get("Customer", 1).unwrap(), bob);
/// ```
#[derive(Clone)]
pub struct Repository {
    inner: Arc<RepositoryInner>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                id: RepositoryId::new(),
                registry: RwLock::new(registry::Registry::default()),
                identity: Mutex::new(IdentityMap::default()),
                listeners: RwLock::new(events::Listeners::default()),
            }),
        }
    }

    /// The id of this repository.
    pub fn id(&self) -> RepositoryId {
        self.inner.id
    }

    pub(crate) fn live(&self, model: &str, index: &str) -> Option<Instance> {
        self.inner.identity.lock().live(model, index)
    }

    pub(crate) fn with_entry<T>(
        &self,
        key: InstanceId,
        f: impl FnOnce(Option<&mut Entry>) -> T,
    ) -> T {
        let mut identity = self.inner.identity.lock();
        f(identity.get_mut(key))
    }

    /// The stored state of `instance`, or [`CoreError::NotBound`].
    pub(crate) fn state_of(&self, model: &str, instance: &Instance) -> CoreResult<EntryState> {
        self.with_entry(instance.id(), |entry| match entry {
            Some(entry) if entry.model == model => Ok(entry.state),
            _ => Err(CoreError::not_bound(model)),
        })
    }

    /// Number of live instances in the identity map.
    ///
    /// Entries of dropped instances are swept out first.
    pub fn tracked(&self) -> usize {
        let mut identity = self.inner.identity.lock();
        identity.sweep();
        identity.live_len()
    }

    /// Returns true when the instance with `id` is live in the identity map.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown model or a malformed id.
    pub fn contains(&self, model: &str, id: impl Into<Value>) -> CoreResult<bool> {
        let config = self.config(model)?;
        let index = index_of_data(&config, &id_record(&config, &id.into())?)?;
        Ok(self.live(model, &index).is_some())
    }

    /// Returns true when `instance` is tracked by this repository.
    pub fn is_bound(&self, instance: &Instance) -> bool {
        self.inner.identity.lock().get(instance.id()).is_some()
    }

    /// Fetches the instance of `model` with `id`.
    ///
    /// A live instance is returned without a backend call.
    ///
    /// # Errors
    ///
    /// Returns the backend error (such as not found),
    /// [`CoreError::IncompleteId`] for a partial compound id, or
    /// [`CoreError::IndexMismatch`] when the fetched data carries another id.
    pub fn get(&self, model: &str, id: impl Into<Value>) -> CoreResult<Instance> {
        self.get_with(model, id, &GetOptions::default())
    }

    /// [`get`](Self::get) with options.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub fn get_with(
        &self,
        model: &str,
        id: impl Into<Value>,
        options: &GetOptions,
    ) -> CoreResult<Instance> {
        let config = self.config(model)?;
        let id_record = id_record(&config, &id.into())?;
        let index = index_of_data(&config, &id_record)?;

        let key = {
            let mut identity = self.inner.identity.lock();
            if let Some(instance) = identity.live(model, &index) {
                drop(identity);
                trace!(model, index = %index, "identity map hit");
                if options.preload {
                    self.load_associations(model, &instance)?;
                }
                return Ok(instance);
            }
            let key = InstanceId::next();
            // Another caller is fetching this row; whoever binds first wins.
            if !identity.in_flight(model, &index) {
                identity.insert(key, Entry::new(model, Some(index.clone()), EntryState::Retrieving));
            }
            key
        };

        let fetched = self.fetch(&config, &id_record, &index);
        let data = match fetched {
            Ok(data) => data,
            Err(err) => {
                self.inner.identity.lock().remove(key);
                return Err(err);
            }
        };
        let instance = match self.build_instance(&config, key, &data) {
            Ok(instance) => instance,
            Err(err) => {
                self.inner.identity.lock().remove(key);
                return Err(err);
            }
        };
        let instance = self.bind(model, Some(index), instance, data);
        if options.preload {
            self.load_associations(model, &instance)?;
        }
        Ok(instance)
    }

    fn fetch(
        &self,
        config: &relmap_backend::ModelConfig,
        id: &Record,
        index: &str,
    ) -> CoreResult<Record> {
        let backend = self.backend_for(config)?;
        debug!(model = %config.name, id = %id, "fetching instance");
        let data = backend.get(id, &config.backend_config)?;
        let actual = index_of_data(config, &data)?;
        if actual != index {
            return Err(CoreError::index_mismatch(&config.name, index, actual));
        }
        Ok(data)
    }

    /// Binds backend `data` to an instance of `model`.
    ///
    /// When the row's instance is already live it is returned unchanged;
    /// the new data is not applied to it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IncompleteId`] when `data` lacks id columns.
    pub fn convert(&self, model: &str, data: Record) -> CoreResult<Instance> {
        let config = self.config(model)?;
        let index = if config.id.is_empty() {
            None
        } else {
            Some(index_of_data(&config, &data)?)
        };
        if let Some(index) = &index {
            if let Some(instance) = self.live(model, index) {
                trace!(model, index = %index, "identity map hit");
                return Ok(instance);
            }
        }

        let key = InstanceId::next();
        let instance = self.build_instance(&config, key, &data)?;
        Ok(self.bind(model, index, instance, data))
    }

    /// Stores a freshly built instance as `Retrieved` and fires
    /// [`Lifecycle::Load`].
    ///
    /// When another instance became live under the same index meanwhile,
    /// that one is returned and the fresh one is discarded.
    fn bind(&self, model: &str, index: Option<String>, instance: Instance, data: Record) -> Instance {
        let key = instance.id();
        {
            let mut identity = self.inner.identity.lock();
            if let Some(index) = &index {
                if let Some(existing) = identity.live(model, index).filter(|i| i.id() != key) {
                    identity.remove(key);
                    trace!(model, index = %index, "row was bound concurrently");
                    return existing;
                }
            }
            match identity.get_mut(key) {
                Some(entry) => {
                    entry.instance = Some(instance.downgrade());
                    entry.data = Some(data);
                    entry.state = EntryState::Retrieved;
                }
                None => {
                    let mut entry = Entry::new(model, index, EntryState::Retrieved);
                    entry.instance = Some(instance.downgrade());
                    entry.data = Some(data);
                    identity.insert(key, entry);
                }
            }
        }
        self.fire(model, Lifecycle::Load, &instance);
        instance
    }

    /// [`convert`](Self::convert) with options: preloading relations and
    /// wrapping the instance in a junction.
    ///
    /// # Errors
    ///
    /// See [`convert`](Self::convert).
    pub fn convert_with(
        &self,
        model: &str,
        data: Record,
        options: &ConvertOptions,
    ) -> CoreResult<Related> {
        let instance = self.convert(model, data)?;
        if options.preload {
            self.load_associations(model, &instance)?;
        }
        Ok(match &options.junction {
            Some(fields) => Related::Junction(Junction::new(instance, fields.clone())),
            None => Related::Instance(instance),
        })
    }

    /// Creates a new, unsaved instance of `model`.
    ///
    /// `values` are keyed by property path; missing properties take the
    /// model's defaults, then `Null`. A belongsTo relation is set from a
    /// foreign key given under its property name, else from its default.
    /// hasMany relations start empty.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProperty`] for keys the model does not
    /// have.
    pub fn create(&self, model: &str, values: Record) -> CoreResult<Instance> {
        let config = self.config(model)?;
        for key in values.columns() {
            let known = config.properties.iter().any(|(_, p)| p == key)
                || config.belongs_to_config(key).is_some();
            if !known {
                return Err(CoreError::unknown_property(model, key));
            }
        }

        let key = InstanceId::next();
        let instance = Instance::new(key, model, blank_fields(&config));
        for (_, property) in &config.properties {
            let value = values
                .get(property)
                .or_else(|| config.defaults.get(property))
                .cloned()
                .unwrap_or_default();
            instance.write_path(&PropertyPath::parse(property)?, value)?;
        }
        for (property, relation) in &config.belongs_to {
            if relation.reference.is_none() {
                continue;
            }
            let id = values
                .get(property)
                .cloned()
                .or_else(|| relation.default.clone())
                .unwrap_or_default();
            let field = self.belongs_to_field(&instance, property, relation, id)?;
            instance.replace_field(property, field)?;
        }

        let mut entry = Entry::new(model, None, EntryState::New);
        entry.instance = Some(instance.downgrade());
        self.inner.identity.lock().insert(key, entry);
        debug!(model, instance = %key, "instance created");
        self.fire(model, Lifecycle::Create, &instance);
        Ok(instance)
    }

    /// All instances of `model`, as a lazy collection.
    ///
    /// Every call starts a fresh query.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown model or backend.
    pub fn all(&self, model: &str) -> CoreResult<RepositoryCollection> {
        let config = self.config(model)?;
        let backend = self.backend_for(&config)?;
        let source = backend.all(&config.backend_config)?;
        Ok(RepositoryCollection::new(
            self.clone(),
            model,
            Collection::new(source),
        ))
    }

    /// The single instance of `model` matching `conditions`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoMatch`] when nothing matches and
    /// [`CoreError::AmbiguousMatch`] when several instances do.
    pub fn one(&self, model: &str, conditions: &Conditions) -> CoreResult<Instance> {
        self.one_or_none(model, conditions)?
            .ok_or_else(|| CoreError::NoMatch {
                model: model.to_string(),
                conditions: conditions.to_string(),
            })
    }

    /// Like [`one`](Self::one), but `None` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AmbiguousMatch`] when several instances match.
    pub fn one_or_none(&self, model: &str, conditions: &Conditions) -> CoreResult<Option<Instance>> {
        let mut matches = self.all(model)?.filter(conditions)?.to_vec()?;
        if matches.len() > 1 {
            return Err(CoreError::AmbiguousMatch {
                model: model.to_string(),
                conditions: conditions.to_string(),
            });
        }
        Ok(matches.pop())
    }

    /// Checks the identity map: every live bound instance still resolves to
    /// the index it is stored under.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexChanged`] for the first instance whose id
    /// properties were modified.
    pub fn validate(&self) -> CoreResult<()> {
        let entries: Vec<(String, String, Instance)> = {
            let identity = self.inner.identity.lock();
            let mut keys = identity.keys();
            keys.sort();
            keys.into_iter()
                .filter_map(|key| {
                    let entry = identity.get(key)?;
                    let index = entry.index.clone()?;
                    Some((entry.model.clone(), index, entry.upgrade()?))
                })
                .collect()
        };
        for (model, index, instance) in entries {
            let config = self.config(&model)?;
            let current = index_of_instance(&config, &instance)?;
            if current != index {
                return Err(CoreError::index_changed(model, index, current));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("id", &self.inner.id)
            .field("tracked", &self.tracked())
            .finish_non_exhaustive()
    }
}
