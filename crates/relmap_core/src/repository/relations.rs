//! Loading relations.

use std::collections::{HashMap, HashSet};

use relmap_backend::{HasManyConfig, ModelConfig};
use relmap_codec::{Condition, Conditions, Operator, PropertyPath, Value};
use tracing::debug;

use super::mapping::{id_of_instance, index_of_instance, single_id};
use super::{Reference, Repository};
use crate::collection::{Collection, RepositoryCollection};
use crate::error::{CoreError, CoreResult};
use crate::instance::{Field, Instance, Related};
use crate::junction::Junction;
use crate::types::{EntryState, InstanceId};

impl Repository {
    /// Loads relation `property` of `instance` when it is still a
    /// placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotARelation`] for plain properties, or the
    /// loading error.
    pub fn load_association(&self, model: &str, instance: &Instance, property: &str) -> CoreResult<()> {
        let config = self.config(model)?;
        match instance.field(property)? {
            Field::BelongsToPlaceholder(placeholder) => {
                placeholder.resolve(instance)?;
            }
            Field::HasManyPlaceholder(_) => {
                self.load_has_many(model, instance, property)?;
            }
            Field::BelongsTo(_) | Field::HasMany(_) => {}
            Field::Value(_) => {
                let expected = if config.has_many_config(property).is_some() {
                    "hasMany"
                } else {
                    "belongsTo"
                };
                return Err(CoreError::not_a_relation(model, property, expected));
            }
        }
        Ok(())
    }

    /// Loads every relation of `instance`, and of the instances reached
    /// that way, until no placeholder is left in the graph.
    ///
    /// # Errors
    ///
    /// Returns the first loading error.
    pub fn load_associations(&self, model: &str, instance: &Instance) -> CoreResult<()> {
        let mut visited = HashSet::new();
        self.preload(model, instance, &mut visited)
    }

    fn preload(
        &self,
        model: &str,
        instance: &Instance,
        visited: &mut HashSet<InstanceId>,
    ) -> CoreResult<()> {
        if !visited.insert(instance.id()) {
            return Ok(());
        }
        let config = self.config(model)?;
        for (property, relation) in &config.belongs_to {
            if let Some(target) = instance.belongs_to(property)? {
                let target = target.resolve()?;
                self.preload(&relation.model, &target, visited)?;
            }
        }
        for (property, relation) in &config.has_many {
            for item in instance.has_many(property)? {
                self.preload(&relation.model, item.instance(), visited)?;
            }
        }
        Ok(())
    }

    /// The target of belongsTo `property` of `model` for foreign key `id`.
    pub(crate) fn find_belongs_to(&self, model: &str, property: &str, id: &Value) -> CoreResult<Instance> {
        let config = self.config(model)?;
        let relation = config
            .belongs_to_config(property)
            .ok_or_else(|| CoreError::not_a_relation(model, property, "belongsTo"))?;
        if relation.use_index {
            return self.get(&relation.model, id.clone());
        }
        let condition = Condition::new(PropertyPath::parse(&relation.id)?, Operator::Eq, id.clone());
        self.one(&relation.model, &Conditions::new().and(condition))
    }

    /// Fetches hasMany `property` of `instance` and installs the result.
    pub(crate) fn load_has_many(
        &self,
        model: &str,
        instance: &Instance,
        property: &str,
    ) -> CoreResult<Vec<Related>> {
        let config = self.config(model)?;
        let relation = config
            .has_many_config(property)
            .ok_or_else(|| CoreError::not_a_relation(model, property, "hasMany"))?;
        let state = self.state_of(model, instance)?;

        let (items, references) = if state == EntryState::New {
            (Vec::new(), Vec::new())
        } else if relation.is_many_to_many() {
            self.fetch_many_to_many(&config, instance, relation)?
        } else {
            self.fetch_one_to_many(&config, instance, relation)?
        };

        instance.replace_field(property, Field::HasMany(items.clone()))?;
        self.with_entry(instance.id(), |entry| {
            if let Some(entry) = entry {
                entry.references.insert(property.to_string(), references);
            }
        });
        Ok(items)
    }

    fn fetch_one_to_many(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        relation: &HasManyConfig,
    ) -> CoreResult<(Vec<Related>, Vec<Reference>)> {
        let id = single_id(config, instance)?;
        let target = self.config(&relation.model)?;
        let backend = self.backend_for(&target)?;
        debug!(model = %config.name, related = %relation.model, id = %id, "loading hasMany");
        let source = backend.related(&target.backend_config, &relation.reference, &id)?;
        let mut collection = RepositoryCollection::new(self.clone(), &relation.model, Collection::new(source));
        if !relation.conditions.is_empty() {
            collection = collection.filter(&relation.conditions)?;
        }
        let instances = collection.to_vec()?;
        let references = instances
            .iter()
            .map(|i| {
                Ok(Reference {
                    key: i.id(),
                    row: id_of_instance(&target, i)?,
                })
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Ok((instances.into_iter().map(Related::Instance).collect(), references))
    }

    fn fetch_many_to_many(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        relation: &HasManyConfig,
    ) -> CoreResult<(Vec<Related>, Vec<Reference>)> {
        let id = single_id(config, instance)?;
        let (junction, far_column) = self.junction_of(config, relation)?;
        let junction_backend = self.backend(&junction.backend)?;
        debug!(
            model = %config.name,
            related = %relation.model,
            junction = %junction.name,
            id = %id,
            "loading many-to-many"
        );
        let rows = junction_backend
            .related(&junction.backend_config, &relation.reference, &id)?
            .fetch()?;
        if rows.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let target = self.config(&relation.model)?;
        let target_id = match target.id_properties().as_slice() {
            [property] => property.to_string(),
            _ => {
                return Err(CoreError::invalid_config(
                    &target.name,
                    "many-to-many targets need a single id column",
                ))
            }
        };
        let mut far_ids: Vec<Value> = Vec::new();
        for row in &rows {
            let far = row.value(&far_column);
            if !far_ids.contains(&far) {
                far_ids.push(far);
            }
        }
        let mut collection = self
            .all(&relation.model)?
            .filter(&Conditions::field_in(target_id, far_ids))?;
        if !relation.conditions.is_empty() {
            collection = collection.filter(&relation.conditions)?;
        }
        let mut by_index = HashMap::new();
        for far in collection.to_vec()? {
            by_index.insert(index_of_instance(&target, &far)?, far);
        }

        let mut items = Vec::with_capacity(rows.len());
        let mut references = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(far) = by_index.get(&row.value(&far_column).to_index_part()?) else {
                continue;
            };
            let item = if relation.fields.is_empty() {
                Related::Instance(far.clone())
            } else {
                let fields = relation
                    .fields
                    .iter()
                    .map(|(column, name)| (name.clone(), row.value(column)))
                    .collect();
                Related::Junction(Junction::new(far.clone(), fields))
            };
            items.push(item);
            references.push(Reference { key: far.id(), row });
        }
        Ok((items, references))
    }

    /// The junction config of a many-to-many relation and its column that
    /// refers to the related model.
    pub(crate) fn junction_of(
        &self,
        config: &ModelConfig,
        relation: &HasManyConfig,
    ) -> CoreResult<(std::sync::Arc<relmap_backend::JunctionConfig>, String)> {
        let name = relation.through.as_deref().ok_or_else(|| {
            CoreError::invalid_config(&config.name, format!("\"{}\" is not many-to-many", relation.model))
        })?;
        let far_column = relation.id.clone().ok_or_else(|| {
            CoreError::invalid_config(&config.name, format!("junction \"{name}\" needs an id column"))
        })?;
        Ok((self.junction_config(name)?, far_column))
    }
}
