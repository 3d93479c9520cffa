//! Saving and deleting instances.
//!
//! A save writes the instance and, unless relations are ignored, the
//! instances it points to first (belongsTo), then the collections it owns
//! (hasMany). Cycles in the object graph are cut by the set of instances the
//! current save already visited.

use std::collections::HashSet;

use relmap_backend::{BackendError, HasManyConfig, ModelConfig};
use relmap_codec::{loose_eq, PropertyPath, Record, Value};
use tracing::{debug, trace, warn};

use super::mapping::{changed_columns, id_of_instance, id_record, index_of_data, index_of_instance, single_id};
use super::{Reference, Repository};
use crate::config::SaveOptions;
use crate::error::{CoreError, CoreResult};
use crate::instance::{Field, Instance, Related};
use crate::junction::Junction;
use crate::types::{EntryState, InstanceId, Lifecycle};

#[derive(Debug, Default)]
struct SaveContext {
    visited: HashSet<InstanceId>,
    /// Snapshot entries recorded while the child was still being saved
    /// further up the stack, so its id may not be known yet.
    unsettled: Vec<Unsettled>,
}

#[derive(Debug)]
struct Unsettled {
    owner: InstanceId,
    property: String,
    model: String,
    child: InstanceId,
}

impl Repository {
    /// Writes `instance` and its loaded relations to the backends.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotBound`] for untracked instances,
    /// [`CoreError::IndexChanged`] when id properties of a stored instance
    /// were modified, or the first backend error. A failed save leaves the
    /// entry in the state it had before.
    pub fn save(&self, model: &str, instance: &Instance) -> CoreResult<()> {
        self.save_with(model, instance, &SaveOptions::default())
    }

    /// [`save`](Self::save) with options.
    ///
    /// # Errors
    ///
    /// See [`save`](Self::save).
    pub fn save_with(&self, model: &str, instance: &Instance, options: &SaveOptions) -> CoreResult<()> {
        let mut ctx = SaveContext::default();
        self.save_inner(model, instance, options, &mut ctx)?;
        self.settle(&ctx)
    }

    /// Rewrites the snapshot rows of children that got their id only after
    /// their parent's collection was recorded.
    fn settle(&self, ctx: &SaveContext) -> CoreResult<()> {
        for pending in &ctx.unsettled {
            let Some(child) = self.with_entry(pending.child, |entry| entry.and_then(|e| e.upgrade())) else {
                continue;
            };
            let target = self.config(&pending.model)?;
            let row = id_of_instance(&target, &child)?;
            trace!(model = %pending.model, id = %row, "settling snapshot row");
            self.with_entry(pending.owner, |entry| {
                let references = entry.and_then(|e| e.references.get_mut(&pending.property));
                for reference in references.into_iter().flatten() {
                    if reference.key == pending.child {
                        reference.row = row.clone();
                    }
                }
            });
        }
        Ok(())
    }

    fn save_inner(
        &self,
        model: &str,
        instance: &Instance,
        options: &SaveOptions,
        ctx: &mut SaveContext,
    ) -> CoreResult<()> {
        if instance.is_deleted() {
            return Err(CoreError::instance_deleted(model));
        }
        if !ctx.visited.insert(instance.id()) {
            trace!(model, instance = %instance.id(), "already saved in this pass");
            return Ok(());
        }
        let config = self.config(model)?;
        let (previous, stored_index) = self.with_entry(instance.id(), |entry| match entry {
            Some(entry) if entry.model == model => Ok((entry.state, entry.index.clone())),
            _ => Err(CoreError::not_bound(model)),
        })?;
        if matches!(previous, EntryState::Saving | EntryState::Deleting) {
            trace!(model, state = %previous, "save skipped");
            return Ok(());
        }
        if previous != EntryState::New {
            if let Some(index) = stored_index {
                let current = index_of_instance(&config, instance)?;
                if current != index {
                    return Err(CoreError::index_changed(model, index, current));
                }
            }
        }

        self.set_state(instance.id(), EntryState::Saving);
        self.fire(model, Lifecycle::Saving, instance);
        let mut restore = previous;
        match self.write(&config, instance, options, ctx, &mut restore) {
            Ok(()) => {
                self.set_state(instance.id(), EntryState::Saved);
                self.fire(model, Lifecycle::Saved, instance);
                Ok(())
            }
            Err(err) => {
                warn!(model, error = %err, state = %restore, "save failed");
                self.set_state(instance.id(), restore);
                Err(err)
            }
        }
    }

    fn set_state(&self, key: InstanceId, state: EntryState) {
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.state = state;
            }
        });
    }

    fn write(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        options: &SaveOptions,
        ctx: &mut SaveContext,
        restore: &mut EntryState,
    ) -> CoreResult<()> {
        if !options.ignore_relations {
            for (property, relation) in &config.belongs_to {
                if let Field::BelongsTo(Some(target)) = instance.field(property)? {
                    self.save_inner(&relation.model, &target, options, ctx)?;
                }
            }
        }

        self.write_row(config, instance, *restore == EntryState::New)?;
        if *restore == EntryState::New {
            // The row exists now; a failure below must not make it "new" again.
            *restore = EntryState::Saved;
        }

        if options.ignore_relations {
            return Ok(());
        }
        for (property, relation) in &config.has_many {
            let Field::HasMany(items) = instance.field(property)? else {
                continue;
            };
            if relation.is_many_to_many() {
                self.save_many_to_many(config, instance, property, relation, &items, options, ctx)?;
            } else {
                self.save_one_to_many(config, instance, property, relation, &items, options, ctx)?;
            }
        }
        Ok(())
    }

    fn write_row(&self, config: &ModelConfig, instance: &Instance, is_new: bool) -> CoreResult<()> {
        let key = instance.id();
        let data = self.to_data(config, instance)?;
        let backend = self.backend_for(config)?;

        if is_new {
            debug!(model = %config.name, data = %data, "adding row");
            let stored = backend.add(&data, &config.backend_config)?;
            self.merge_back(config, instance, &stored)?;
            let index = if config.id.is_empty() {
                None
            } else {
                Some(index_of_data(config, &stored)?)
            };
            let mut identity = self.inner.identity.lock();
            if let Some(entry) = identity.get_mut(key) {
                entry.data = Some(stored);
            }
            if let Some(index) = index {
                identity.rekey(key, index);
            }
            return Ok(());
        }

        let old = self
            .with_entry(key, |entry| entry.and_then(|e| e.data.clone()))
            .ok_or_else(|| CoreError::not_bound(&config.name))?;
        let changed = changed_columns(&data, &old);
        if changed.is_empty() {
            trace!(model = %config.name, "no changes to write");
            return Ok(());
        }
        debug!(model = %config.name, columns = ?changed, "updating row");
        let stored = backend.update(&data, &old, &config.backend_config)?;
        self.merge_back(config, instance, &stored)?;
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.data = Some(stored);
            }
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn save_one_to_many(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        property: &str,
        relation: &HasManyConfig,
        items: &[Related],
        options: &SaveOptions,
        ctx: &mut SaveContext,
    ) -> CoreResult<()> {
        let target = self.config(&relation.model)?;
        let id = single_id(config, instance)?;
        let back = relation.belongs_to.clone().or_else(|| {
            target
                .belongs_to
                .iter()
                .find(|(_, r)| r.model == config.name && r.reference.as_deref() == Some(relation.reference.as_str()))
                .map(|(p, _)| p.clone())
        });

        let mut next = Vec::with_capacity(items.len());
        for item in items {
            let child = item.instance();
            match &back {
                Some(back) => match child.field(back)? {
                    Field::BelongsTo(Some(current)) if Instance::ptr_eq(&current, instance) => {}
                    Field::BelongsToPlaceholder(placeholder) if loose_eq(placeholder.id(), &id) => {}
                    _ => child.set_belongs_to(back, Some(instance.clone()))?,
                },
                None => {
                    let path = target.property_for_column(&relation.reference).ok_or_else(|| {
                        CoreError::invalid_config(
                            &config.name,
                            format!("hasMany \"{property}\" has no way to set \"{}\"", relation.reference),
                        )
                    })?;
                    child.write_path(&PropertyPath::parse(path)?, id.clone())?;
                }
            }
            self.save_inner(&relation.model, child, options, ctx)?;
            if self.state_of(&relation.model, child)? == EntryState::Saving {
                ctx.unsettled.push(Unsettled {
                    owner: instance.id(),
                    property: property.to_string(),
                    model: relation.model.clone(),
                    child: child.id(),
                });
            }
            next.push(Reference {
                key: child.id(),
                row: id_of_instance(&target, child)?,
            });
        }

        if !options.keep_missing_related_instances {
            for previous in self.references_of(instance.id(), property) {
                if next.iter().any(|r| r.key == previous.key) {
                    continue;
                }
                self.delete_missing(&target, &previous)?;
            }
        }
        self.set_references(instance.id(), property, next);
        Ok(())
    }

    /// Deletes an element that was removed from a one-to-many collection.
    fn delete_missing(&self, target: &ModelConfig, reference: &Reference) -> CoreResult<()> {
        let live = self.with_entry(reference.key, |entry| entry.and_then(|e| e.upgrade()));
        if let Some(child) = live {
            debug!(model = %target.name, instance = %child.id(), "deleting removed element");
            return self.delete(&target.name, &child);
        }
        let backend = self.backend_for(target)?;
        debug!(model = %target.name, id = %reference.row, "deleting removed row");
        match backend.delete(&reference.row, &target.backend_config) {
            Ok(()) | Err(BackendError::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        let mut identity = self.inner.identity.lock();
        identity.remove(reference.key);
        identity.forget(reference.key);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn save_many_to_many(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        property: &str,
        relation: &HasManyConfig,
        items: &[Related],
        options: &SaveOptions,
        ctx: &mut SaveContext,
    ) -> CoreResult<()> {
        let (junction, far_column) = self.junction_of(config, relation)?;
        let backend = self.backend(&junction.backend)?;
        let target = self.config(&relation.model)?;
        let id = single_id(config, instance)?;
        let key = instance.id();

        let mut next: Vec<Reference> = Vec::with_capacity(items.len());
        for item in items {
            let far = item.instance();
            // Both sides must be stored before the junction row refers to them.
            self.save_inner(&relation.model, far, options, ctx)?;

            let mut row = Record::new()
                .with(relation.reference.clone(), id.clone())
                .with(far_column.clone(), single_id(&target, far)?);
            if let Some(bridge) = item.junction() {
                let fields = bridge.fields();
                for (column, name) in &relation.fields {
                    row.insert(column.clone(), fields.value(name));
                }
                if bridge.is_dynamic() {
                    for (name, value) in &fields {
                        if !relation.fields.iter().any(|(_, n)| n == name) {
                            row.insert(name.clone(), value.clone());
                        }
                    }
                }
            }

            let previous = self
                .references_of(key, property)
                .into_iter()
                .find(|r| r.key == far.id());
            let stored = match previous {
                None => {
                    debug!(junction = %junction.name, row = %row, "adding junction row");
                    let stored = backend.add(&row, &junction.backend_config)?;
                    self.link_reciprocal(relation, instance, far, &stored)?;
                    stored
                }
                Some(previous) if !changed_columns(&row, &previous.row).is_empty() => {
                    debug!(junction = %junction.name, row = %row, "updating junction row");
                    let stored = backend.update(&row, &previous.row, &junction.backend_config)?;
                    self.link_reciprocal(relation, instance, far, &stored)?;
                    stored
                }
                Some(previous) => previous.row,
            };
            if !next.iter().any(|r| r.key == far.id()) {
                next.push(Reference {
                    key: far.id(),
                    row: stored,
                });
            }
        }

        let listed: Vec<InstanceId> = match instance.field(property)? {
            Field::HasMany(current) => current.iter().map(|i| i.instance().id()).collect(),
            _ => Vec::new(),
        };
        for previous in self.references_of(key, property) {
            if next.iter().any(|r| r.key == previous.key) {
                continue;
            }
            if listed.contains(&previous.key) {
                next.push(previous);
                continue;
            }
            debug!(junction = %junction.name, row = %previous.row, "deleting junction row");
            match backend.delete(&previous.row, &junction.backend_config) {
                Ok(()) | Err(BackendError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
            self.unlink_reciprocal(relation, instance, previous.key)?;
        }
        self.set_references(key, property, next);
        Ok(())
    }

    /// Mirrors a written junction row into the loaded reverse collection of
    /// the related instance.
    fn link_reciprocal(
        &self,
        relation: &HasManyConfig,
        instance: &Instance,
        far: &Instance,
        row: &Record,
    ) -> CoreResult<()> {
        let Some(reciprocal) = &relation.reciprocal else {
            return Ok(());
        };
        let Field::HasMany(mut list) = far.field(reciprocal)? else {
            return Ok(());
        };
        let target = self.config(&relation.model)?;
        let reverse = target
            .has_many_config(reciprocal)
            .ok_or_else(|| CoreError::not_a_relation(&target.name, reciprocal, "hasMany"))?;

        match list.iter().find(|item| item.is(instance)) {
            Some(existing) => {
                if let Some(bridge) = existing.junction() {
                    for (column, name) in &reverse.fields {
                        bridge.set_field(name, row.value(column));
                    }
                }
            }
            None => {
                let item = if reverse.fields.is_empty() {
                    Related::Instance(instance.clone())
                } else {
                    let fields = reverse
                        .fields
                        .iter()
                        .map(|(column, name)| (name.clone(), row.value(column)))
                        .collect();
                    Related::Junction(Junction::new(instance.clone(), fields))
                };
                list.push(item);
                far.replace_field(reciprocal, Field::HasMany(list))?;
            }
        }

        self.with_entry(far.id(), |entry| {
            if let Some(entry) = entry {
                let references = entry.references.entry(reciprocal.clone()).or_default();
                match references.iter_mut().find(|r| r.key == instance.id()) {
                    Some(reference) => reference.row = row.clone(),
                    None => references.push(Reference {
                        key: instance.id(),
                        row: row.clone(),
                    }),
                }
            }
        });
        Ok(())
    }

    fn unlink_reciprocal(&self, relation: &HasManyConfig, instance: &Instance, far: InstanceId) -> CoreResult<()> {
        let Some(reciprocal) = &relation.reciprocal else {
            return Ok(());
        };
        let Some(far) = self.with_entry(far, |entry| entry.and_then(|e| e.upgrade())) else {
            return Ok(());
        };
        if far.is_deleted() {
            return Ok(());
        }
        if let Field::HasMany(mut list) = far.field(reciprocal)? {
            let before = list.len();
            list.retain(|item| !item.is(instance));
            if list.len() != before {
                far.replace_field(reciprocal, Field::HasMany(list))?;
            }
        }
        self.with_entry(far.id(), |entry| {
            if let Some(references) = entry.and_then(|e| e.references.get_mut(reciprocal)) {
                references.retain(|r| r.key != instance.id());
            }
        });
        Ok(())
    }

    fn references_of(&self, key: InstanceId, property: &str) -> Vec<Reference> {
        self.with_entry(key, |entry| {
            entry
                .and_then(|e| e.references.get(property).cloned())
                .unwrap_or_default()
        })
    }

    fn set_references(&self, key: InstanceId, property: &str, references: Vec<Reference>) {
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.references.insert(property.to_string(), references);
            }
        });
    }

    /// Deletes `instance` from its backend and clears it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotPersisted`] for an instance that was never
    /// saved, [`CoreError::NotBound`] for untracked instances, or the backend
    /// error (the entry keeps its previous state).
    pub fn delete(&self, model: &str, instance: &Instance) -> CoreResult<()> {
        if instance.is_deleted() {
            return Err(CoreError::instance_deleted(model));
        }
        let config = self.config(model)?;
        let backend = self.backend_for(&config)?;
        let key = instance.id();
        let (previous, data) = self.with_entry(key, |entry| match entry {
            Some(entry) if entry.model == model => match (entry.state, entry.data.clone()) {
                (EntryState::New, _) | (_, None) => Err(CoreError::NotPersisted {
                    model: model.to_string(),
                }),
                (state, Some(data)) => {
                    entry.state = EntryState::Deleting;
                    Ok((state, data))
                }
            },
            _ => Err(CoreError::not_bound(model)),
        })?;

        self.fire(model, Lifecycle::Deleting, instance);
        debug!(model, data = %data, "deleting row");
        if let Err(err) = backend.delete(&data, &config.backend_config) {
            warn!(model, error = %err, "delete failed");
            self.set_state(key, previous);
            return Err(err.into());
        }
        {
            let mut identity = self.inner.identity.lock();
            identity.remove(key);
            identity.forget(key);
        }
        self.fire(model, Lifecycle::Deleted, instance);
        instance.tombstone();
        Ok(())
    }

    /// Deletes the row of `model` with `id`, through its live instance when
    /// there is one.
    ///
    /// # Errors
    ///
    /// Returns the backend error, such as not found.
    pub fn delete_by_id(&self, model: &str, id: impl Into<Value>) -> CoreResult<()> {
        let config = self.config(model)?;
        let id = id_record(&config, &id.into())?;
        let index = index_of_data(&config, &id)?;
        if let Some(instance) = self.live(model, &index) {
            return self.delete(model, &instance);
        }
        let backend = self.backend_for(&config)?;
        debug!(model, id = %id, "deleting row by id");
        backend.delete(&id, &config.backend_config)?;
        Ok(())
    }
}
