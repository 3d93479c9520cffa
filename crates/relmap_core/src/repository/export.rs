//! Plain-value snapshots of instance graphs.

use relmap_codec::Value;

use super::Repository;
use crate::error::{CoreError, CoreResult};
use crate::instance::{Field, Instance};
use crate::types::InstanceId;

impl Repository {
    /// Converts `instance` into a map value.
    ///
    /// Relations are followed `depth` levels deep, loading them as needed;
    /// at depth zero only plain properties are exported. Junction fields are
    /// merged into the exported related instance, and relations leading back
    /// to an instance already being exported are left out.
    ///
    /// # Errors
    ///
    /// Returns the first error raised while loading a relation.
    pub fn export(&self, model: &str, instance: &Instance, depth: usize) -> CoreResult<Value> {
        let mut path = Vec::new();
        self.export_inner(model, instance, depth, &mut path)
    }

    fn export_inner(
        &self,
        model: &str,
        instance: &Instance,
        depth: usize,
        path: &mut Vec<InstanceId>,
    ) -> CoreResult<Value> {
        let config = self.config(model)?;
        path.push(instance.id());
        let mut pairs = Vec::new();
        for (name, field) in instance.fields()? {
            match field {
                Field::Value(value) => pairs.push((Value::from(name), value)),
                _ if depth == 0 => {}
                Field::BelongsTo(_) | Field::BelongsToPlaceholder(_) => {
                    let relation = config
                        .belongs_to_config(&name)
                        .ok_or_else(|| CoreError::not_a_relation(model, &name, "belongsTo"))?;
                    match instance.belongs_to(&name)? {
                        None => pairs.push((Value::from(name), Value::Null)),
                        Some(target) => {
                            let target = target.resolve()?;
                            if path.contains(&target.id()) {
                                continue;
                            }
                            let value = self.export_inner(&relation.model, &target, depth - 1, path)?;
                            pairs.push((Value::from(name), value));
                        }
                    }
                }
                Field::HasMany(_) | Field::HasManyPlaceholder(_) => {
                    let relation = config
                        .has_many_config(&name)
                        .ok_or_else(|| CoreError::not_a_relation(model, &name, "hasMany"))?;
                    let mut items = Vec::new();
                    for item in instance.has_many(&name)? {
                        if path.contains(&item.instance().id()) {
                            continue;
                        }
                        let mut value = self.export_inner(&relation.model, item.instance(), depth - 1, path)?;
                        if let Some(junction) = item.junction() {
                            for (field, field_value) in junction.fields() {
                                value.insert(field, field_value)?;
                            }
                        }
                        items.push(value);
                    }
                    pairs.push((Value::from(name), Value::Array(items)));
                }
            }
        }
        path.pop();
        Ok(Value::map(pairs))
    }
}
