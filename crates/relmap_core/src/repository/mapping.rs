//! Translation between backend rows and instances.

use relmap_backend::{BelongsToConfig, ModelConfig};
use relmap_codec::{PropertyPath, Record, Value};
use tracing::trace;

use super::Repository;
use crate::error::{CoreError, CoreResult};
use crate::instance::{Field, Instance};
use crate::placeholder::{BelongsToPlaceholder, HasManyPlaceholder};
use crate::types::InstanceId;

/// Separator between the parts of a compound index.
pub(crate) const INDEX_SEPARATOR: &str = "+";

/// The column filtered on when a condition names property path `path`.
///
/// Besides mapped properties, `relation.<id>` of a belongsTo relation maps
/// to its reference column.
pub(crate) fn column_of(config: &ModelConfig, path: &PropertyPath) -> Option<String> {
    if let Some(column) = config.column_for_property(&path.to_string()) {
        return Some(column.to_string());
    }
    let (head, rest) = path.split_first();
    let rest = rest?;
    let relation = config.belongs_to_config(head.name())?;
    let column = relation.reference.as_ref()?;
    (rest.is_simple() && rest.head() == relation.id).then(|| column.clone())
}

/// Index of the identity columns in `data`.
pub(crate) fn index_of_data(config: &ModelConfig, data: &Record) -> CoreResult<String> {
    if config.id.iter().any(|column| !data.contains(column)) {
        return Err(CoreError::IncompleteId {
            model: config.name.clone(),
            required: config.id.clone(),
        });
    }
    join_index(config.id.iter().map(|column| data.value(column)))
}

/// Index of the current id properties of `instance`.
pub(crate) fn index_of_instance(config: &ModelConfig, instance: &Instance) -> CoreResult<String> {
    let mut parts = Vec::with_capacity(config.id.len());
    for property in config.id_properties() {
        parts.push(instance.read_path(&PropertyPath::parse(property)?)?);
    }
    join_index(parts)
}

fn join_index(parts: impl IntoIterator<Item = Value>) -> CoreResult<String> {
    let parts = parts
        .into_iter()
        .map(|v| v.to_index_part())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parts.join(INDEX_SEPARATOR))
}

/// The identity columns of `instance` as a record.
pub(crate) fn id_of_instance(config: &ModelConfig, instance: &Instance) -> CoreResult<Record> {
    let mut id = Record::new();
    for column in &config.id {
        let property = config.property_for_column(column).ok_or_else(|| {
            CoreError::invalid_config(&config.name, format!("id column \"{column}\" is not mapped"))
        })?;
        id.insert(column.clone(), instance.read_path(&PropertyPath::parse(property)?)?);
    }
    Ok(id)
}

/// The identity columns for `id`.
///
/// A single-column id is any scalar; a compound id is an array in column
/// order or a map keyed by column.
pub(crate) fn id_record(config: &ModelConfig, id: &Value) -> CoreResult<Record> {
    let incomplete = || CoreError::IncompleteId {
        model: config.name.clone(),
        required: config.id.clone(),
    };
    match (config.id.as_slice(), id) {
        ([], _) => Err(CoreError::invalid_config(&config.name, "model has no id columns")),
        (_, Value::Map(_)) => {
            let given = Record::from_value(id).ok_or_else(incomplete)?;
            if config.id.iter().all(|column| given.contains(column)) {
                Ok(given.project(&config.id))
            } else {
                Err(incomplete())
            }
        }
        (columns, Value::Array(items)) if columns.len() > 1 => {
            if items.len() != columns.len() {
                return Err(incomplete());
            }
            Ok(columns.iter().cloned().zip(items.iter().cloned()).collect())
        }
        ([column], scalar) => Ok(Record::new().with(column.clone(), scalar.clone())),
        _ => Err(incomplete()),
    }
}

/// The single id value of `instance`, used as hasMany reference.
pub(crate) fn single_id(config: &ModelConfig, instance: &Instance) -> CoreResult<Value> {
    match config.id_properties().as_slice() {
        [property] => instance.read_path(&PropertyPath::parse(property)?),
        _ => Err(CoreError::invalid_config(
            &config.name,
            "hasMany relations need a single id column",
        )),
    }
}

/// Changed columns of `new` compared to `old`.
pub(crate) fn changed_columns(new: &Record, old: &Record) -> Vec<String> {
    new.iter()
        .filter(|(column, value)| old.get(column) != Some(*value))
        .map(|(column, _)| column.clone())
        .collect()
}

/// Content a fresh instance starts with before data is applied.
pub(crate) fn blank_fields(config: &ModelConfig) -> Vec<(String, Field)> {
    config
        .field_names()
        .into_iter()
        .map(|name| {
            let field = if config.belongs_to_config(&name).is_some() {
                Field::BelongsTo(None)
            } else if config.has_many_config(&name).is_some() {
                Field::HasMany(Vec::new())
            } else {
                Field::Value(Value::Null)
            };
            (name, field)
        })
        .collect()
}

impl Repository {
    /// Builds the instance for backend `data`, keyed `key`.
    pub(crate) fn build_instance(
        &self,
        config: &ModelConfig,
        key: InstanceId,
        data: &Record,
    ) -> CoreResult<Instance> {
        let instance = Instance::new(key, &config.name, blank_fields(config));
        self.apply_data(config, &instance, data)?;
        Ok(instance)
    }

    /// Writes `data` into `instance`: mapped properties, belongsTo relations
    /// (live instance or placeholder) and fresh hasMany placeholders.
    pub(crate) fn apply_data(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        data: &Record,
    ) -> CoreResult<()> {
        for (column, property) in &config.properties {
            let path = PropertyPath::parse(property)?;
            instance.write_path(&path, data.value(column))?;
        }
        for (property, relation) in &config.belongs_to {
            let field = match (&relation.reference, &relation.convert) {
                (Some(column), _) => self.belongs_to_field(instance, property, relation, data.value(column))?,
                (None, Some(column)) => match Record::from_value(&data.value(column)) {
                    Some(embedded) => Field::BelongsTo(Some(self.convert(&relation.model, embedded)?)),
                    None => Field::BelongsTo(None),
                },
                (None, None) => Field::BelongsTo(None),
            };
            instance.replace_field(property, field)?;
        }
        for (property, _) in &config.has_many {
            let placeholder = HasManyPlaceholder::new(self.clone(), instance, property);
            instance.replace_field(property, Field::HasManyPlaceholder(placeholder))?;
        }
        Ok(())
    }

    /// The content of a belongsTo field whose foreign key is `key`.
    ///
    /// A live target is linked right away; otherwise a placeholder that
    /// knows the target id is installed.
    pub(crate) fn belongs_to_field(
        &self,
        instance: &Instance,
        property: &str,
        relation: &BelongsToConfig,
        key: Value,
    ) -> CoreResult<Field> {
        if key.is_null() {
            return Ok(Field::BelongsTo(None));
        }
        if relation.use_index {
            if let Ok(index) = key.to_index_part() {
                if let Some(target) = self.live(&relation.model, &index) {
                    trace!(model = %relation.model, index = %index, "belongsTo linked to live instance");
                    return Ok(Field::BelongsTo(Some(target)));
                }
            }
        }
        let known = Record::new().with(relation.id.clone(), key.clone());
        Ok(Field::BelongsToPlaceholder(BelongsToPlaceholder::new(
            self.clone(),
            instance,
            property,
            &relation.model,
            key,
            known,
        )))
    }

    /// The backend row for the current state of `instance`.
    pub(crate) fn to_data(&self, config: &ModelConfig, instance: &Instance) -> CoreResult<Record> {
        let mut data = Record::new();
        for (column, property) in &config.properties {
            let path = PropertyPath::parse(property)?;
            data.insert(column.clone(), instance.read_path(&path)?);
        }
        for (property, relation) in &config.belongs_to {
            let field = instance.field(property)?;
            if let Some(column) = &relation.reference {
                let key = match field {
                    Field::BelongsTo(Some(target)) => target.get_path(&relation.id)?,
                    Field::BelongsToPlaceholder(placeholder) => placeholder.id().clone(),
                    _ => Value::Null,
                };
                data.insert(column.clone(), key);
            } else if let Some(column) = &relation.convert {
                let embedded = match field {
                    Field::BelongsTo(Some(target)) => {
                        let target_config = self.config(&relation.model)?;
                        self.to_data(&target_config, &target)?.to_value()
                    }
                    _ => Value::Null,
                };
                data.insert(column.clone(), embedded);
            }
        }
        Ok(data)
    }

    /// Copies columns the backend filled in (generated ids, defaults) back
    /// into `instance`.
    pub(crate) fn merge_back(
        &self,
        config: &ModelConfig,
        instance: &Instance,
        stored: &Record,
    ) -> CoreResult<()> {
        for (column, property) in &config.properties {
            let Some(value) = stored.get(column) else {
                continue;
            };
            let path = PropertyPath::parse(property)?;
            if instance.read_path(&path)? != *value {
                instance.write_path(&path, value.clone())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relmap_backend::{table_config, BelongsToConfig};

    fn rating() -> ModelConfig {
        ModelConfig::new("Rating", table_config("ratings"))
            .columns(["customer_id", "group_id", "rating"])
            .id(["customer_id", "group_id"])
    }

    fn order() -> ModelConfig {
        ModelConfig::new("Order", table_config("orders"))
            .columns(["id", "product"])
            .property("details", "meta.details")
            .belongs_to("customer", BelongsToConfig::new("Customer", "customer_id"))
    }

    #[test]
    fn columns_for_paths() {
        let config = order();
        let path = |p: &str| PropertyPath::parse(p).unwrap();
        assert_eq!(column_of(&config, &path("product")), Some("product".into()));
        assert_eq!(column_of(&config, &path("meta.details")), Some("details".into()));
        assert_eq!(column_of(&config, &path("customer.id")), Some("customer_id".into()));
        assert_eq!(column_of(&config, &path("customer.name")), None);
        assert_eq!(column_of(&config, &path("customer")), None);
    }

    #[test]
    fn compound_indexes() {
        let config = rating();
        let data = Record::new()
            .with("customer_id", 1)
            .with("group_id", 2)
            .with("rating", 5);
        assert_eq!(index_of_data(&config, &data).unwrap(), "1+2");
        assert!(matches!(
            index_of_data(&config, &Record::new().with("customer_id", 1)),
            Err(CoreError::IncompleteId { .. })
        ));
    }

    #[test]
    fn id_records() {
        let config = rating();
        let by_array = id_record(&config, &Value::Array(vec![1.into(), 2.into()])).unwrap();
        assert_eq!(by_array, Record::new().with("customer_id", 1).with("group_id", 2));

        let map = Record::new().with("group_id", 2).with("customer_id", 1).with("x", 0);
        assert_eq!(id_record(&config, &map.to_value()).unwrap(), by_array);

        let err = id_record(&config, &Value::Integer(1)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "incomplete id, \"Rating\" requires: customer_id, group_id"
        );

        let single = ModelConfig::new("Customer", table_config("customers")).columns(["id"]);
        assert_eq!(
            id_record(&single, &Value::from("1")).unwrap(),
            Record::new().with("id", "1")
        );
    }

    #[test]
    fn changes_only_cover_new_columns() {
        let old = Record::new().with("id", 1).with("name", "Bob").with("extra", 1);
        let new = Record::new().with("id", 1).with("name", "Robert");
        assert_eq!(changed_columns(&new, &old), vec!["name".to_string()]);
        assert!(changed_columns(&old.project(&["id", "name"]), &old).is_empty());
    }

    #[test]
    fn blank_fields_follow_field_order() {
        let names: Vec<String> = blank_fields(&order()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "product", "meta", "customer"]);
    }
}
