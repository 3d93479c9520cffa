//! Model and junction descriptors.
//!
//! A [`ModelConfig`] is the complete manifest of one model: which backend
//! columns map to which instance properties, which columns identify a row,
//! and how the model relates to other models. It is validated once, when a
//! backend registers it.

use std::collections::HashSet;

use relmap_codec::{Conditions, PropertyPath, Record, Value};

use crate::backend::BackendConfig;
use crate::error::{BackendError, BackendResult};

/// Configuration of a many-to-one relation.
#[derive(Debug, Clone, PartialEq)]
pub struct BelongsToConfig {
    /// The related model.
    pub model: String,
    /// Column holding the foreign key.
    pub reference: Option<String>,
    /// Column holding the related row itself (converted, not fetched).
    pub convert: Option<String>,
    /// Property of the related model the foreign key refers to.
    pub id: String,
    /// Whether the foreign key is the related model's identity.
    ///
    /// When false the related instance is looked up with a filter on
    /// [`id`](Self::id), which must match exactly one row.
    pub use_index: bool,
    /// Foreign key used for new instances.
    pub default: Option<Value>,
}

impl BelongsToConfig {
    /// A relation through the foreign key column `reference`.
    pub fn new(model: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reference: Some(reference.into()),
            convert: None,
            id: "id".to_string(),
            use_index: true,
            default: None,
        }
    }

    /// A relation whose related row is embedded in `column`.
    pub fn converted(model: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reference: None,
            convert: Some(column.into()),
            id: "id".to_string(),
            use_index: true,
            default: None,
        }
    }

    /// Sets the referenced property of the related model.
    #[must_use]
    pub fn id(mut self, property: impl Into<String>) -> Self {
        self.id = property.into();
        self
    }

    /// Sets whether the foreign key is the related model's identity.
    #[must_use]
    pub fn use_index(mut self, value: bool) -> Self {
        self.use_index = value;
        self
    }

    /// Sets the foreign key for new instances.
    #[must_use]
    pub fn default_id(mut self, id: impl Into<Value>) -> Self {
        self.default = Some(id.into());
        self
    }
}

/// Configuration of a one-to-many or many-to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct HasManyConfig {
    /// The related model.
    pub model: String,
    /// Column referring to this model's id.
    ///
    /// A column of the related model, or of the junction when
    /// [`through`](Self::through) is set.
    pub reference: String,
    /// belongsTo property of the related model pointing back here.
    pub belongs_to: Option<String>,
    /// Junction name for many-to-many relations.
    pub through: Option<String>,
    /// Junction column referring to the related model's id.
    pub id: Option<String>,
    /// Extra junction columns exposed on the junction: column to field.
    pub fields: Vec<(String, String)>,
    /// Static conditions on the related instances.
    pub conditions: Conditions,
    /// Property on the related model holding the reverse many-to-many
    /// collection.
    pub reciprocal: Option<String>,
}

impl HasManyConfig {
    /// A one-to-many relation through the related model's `reference` column.
    pub fn new(model: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reference: reference.into(),
            belongs_to: None,
            through: None,
            id: None,
            fields: Vec::new(),
            conditions: Conditions::new(),
            reciprocal: None,
        }
    }

    /// A many-to-many relation through `junction`.
    ///
    /// `reference` is the junction column referring to this model, `id` the
    /// one referring to the related model.
    pub fn through(
        model: impl Into<String>,
        junction: impl Into<String>,
        reference: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            through: Some(junction.into()),
            id: Some(id.into()),
            ..Self::new(model, reference)
        }
    }

    /// Sets the back-reference property.
    #[must_use]
    pub fn belongs_to(mut self, property: impl Into<String>) -> Self {
        self.belongs_to = Some(property.into());
        self
    }

    /// Exposes junction `column` as field `name`.
    #[must_use]
    pub fn field(mut self, column: impl Into<String>, name: impl Into<String>) -> Self {
        self.fields.push((column.into(), name.into()));
        self
    }

    /// Sets the static conditions.
    #[must_use]
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the reverse collection property on the related model.
    #[must_use]
    pub fn reciprocal(mut self, property: impl Into<String>) -> Self {
        self.reciprocal = Some(property.into());
        self
    }

    /// Returns true for relations through a junction.
    pub fn is_many_to_many(&self) -> bool {
        self.through.is_some()
    }
}

/// A named many-to-many bridge table.
#[derive(Debug, Clone, PartialEq)]
pub struct JunctionConfig {
    /// Name used by [`HasManyConfig::through`].
    pub name: String,
    /// Identifier of the backend storing the junction rows.
    pub backend: String,
    /// Backend-specific config.
    pub backend_config: BackendConfig,
    /// Columns identifying a junction row.
    pub columns: Vec<String>,
}

impl JunctionConfig {
    /// Creates a junction descriptor.
    pub fn new(name: impl Into<String>, backend_config: BackendConfig) -> Self {
        Self {
            name: name.into(),
            backend: String::new(),
            backend_config,
            columns: Vec::new(),
        }
    }

    /// Sets the backend identifier.
    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// Sets the identifying columns.
    #[must_use]
    pub fn columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }
}

/// The manifest of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Model name.
    pub name: String,
    /// Plural name.
    pub plural: String,
    /// Column to property path mapping, in declaration order.
    pub properties: Vec<(String, String)>,
    /// Columns identifying a row.
    pub id: Vec<String>,
    /// Many-to-one relations by property.
    pub belongs_to: Vec<(String, BelongsToConfig)>,
    /// One-to-many and many-to-many relations by property.
    pub has_many: Vec<(String, HasManyConfig)>,
    /// Values for new instances, keyed by property.
    pub defaults: Record,
    /// Identifier of the backend storing the rows.
    pub backend: String,
    /// Backend-specific config.
    pub backend_config: BackendConfig,
}

impl ModelConfig {
    /// Creates a model with an `id` identity column and no properties.
    pub fn new(name: impl Into<String>, backend_config: BackendConfig) -> Self {
        let name = name.into();
        Self {
            plural: format!("{name}s"),
            name,
            properties: Vec::new(),
            id: vec!["id".to_string()],
            belongs_to: Vec::new(),
            has_many: Vec::new(),
            defaults: Record::new(),
            backend: String::new(),
            backend_config,
        }
    }

    /// Sets the plural name.
    #[must_use]
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Maps `column` to property path `property`.
    #[must_use]
    pub fn property(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.properties.push((column.into(), property.into()));
        self
    }

    /// Maps each column to a property of the same name.
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        for column in columns {
            let column = column.as_ref();
            self.properties.push((column.to_string(), column.to_string()));
        }
        self
    }

    /// Sets the identity columns.
    #[must_use]
    pub fn id<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.id = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a many-to-one relation.
    #[must_use]
    pub fn belongs_to(mut self, property: impl Into<String>, relation: BelongsToConfig) -> Self {
        self.belongs_to.push((property.into(), relation));
        self
    }

    /// Adds a one-to-many or many-to-many relation.
    #[must_use]
    pub fn has_many(mut self, property: impl Into<String>, relation: HasManyConfig) -> Self {
        self.has_many.push((property.into(), relation));
        self
    }

    /// Sets the default of `property` for new instances.
    #[must_use]
    pub fn default_value(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(property, value);
        self
    }

    /// Sets the backend identifier.
    #[must_use]
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    /// The property path mapped to `column`.
    pub fn property_for_column(&self, column: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, p)| p.as_str())
    }

    /// The column mapped to property path `property`.
    pub fn column_for_property(&self, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, p)| p == property)
            .map(|(c, _)| c.as_str())
    }

    /// Property paths of the identity columns, in order.
    pub fn id_properties(&self) -> Vec<&str> {
        self.id
            .iter()
            .filter_map(|column| self.property_for_column(column))
            .collect()
    }

    /// The many-to-one relation on `property`.
    pub fn belongs_to_config(&self, property: &str) -> Option<&BelongsToConfig> {
        self.belongs_to
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, r)| r)
    }

    /// The one-to-many or many-to-many relation on `property`.
    pub fn has_many_config(&self, property: &str) -> Option<&HasManyConfig> {
        self.has_many
            .iter()
            .find(|(p, _)| p == property)
            .map(|(_, r)| r)
    }

    /// Instance field names in order: mapped properties, belongsTo, hasMany.
    ///
    /// Nested property paths contribute their head segment once.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for (_, path) in &self.properties {
            let head = PropertyPath::parse(path)
                .map(|p| p.head().to_string())
                .unwrap_or_else(|_| path.clone());
            if !names.contains(&head) {
                names.push(head);
            }
        }
        names.extend(self.belongs_to.iter().map(|(p, _)| p.clone()));
        names.extend(self.has_many.iter().map(|(p, _)| p.clone()));
        names
    }

    /// Checks the manifest for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> BackendResult<()> {
        let invalid = |message: String| Err(BackendError::invalid_config(&self.name, message));

        if self.name.is_empty() {
            return Err(BackendError::invalid_config("", "model name is empty"));
        }

        let mut columns = HashSet::new();
        let mut heads = HashSet::new();
        for (column, property) in &self.properties {
            if !columns.insert(column.as_str()) {
                return invalid(format!("column \"{column}\" is mapped twice"));
            }
            let path = PropertyPath::parse(property)?;
            if path.is_simple() && !heads.insert(path.head().to_string()) {
                return invalid(format!("property \"{property}\" is mapped twice"));
            }
            heads.insert(path.head().to_string());
        }

        for column in &self.id {
            match self.property_for_column(column) {
                Some(property) if PropertyPath::parse(property)?.is_simple() => {}
                Some(property) => {
                    return invalid(format!(
                        "id column \"{column}\" must map to a plain property, not \"{property}\""
                    ))
                }
                None => return invalid(format!("id column \"{column}\" is not mapped")),
            }
        }

        for (property, relation) in &self.belongs_to {
            if !heads.insert(property.clone()) {
                return invalid(format!("property \"{property}\" is declared twice"));
            }
            match (&relation.reference, &relation.convert) {
                (Some(column), None) | (None, Some(column)) => {
                    if !columns.insert(column.as_str()) {
                        return invalid(format!(
                            "belongsTo \"{property}\" reuses mapped column \"{column}\""
                        ));
                    }
                }
                _ => {
                    return invalid(format!(
                        "belongsTo \"{property}\" needs exactly one of reference or convert"
                    ))
                }
            }
            if relation.model.is_empty() {
                return invalid(format!("belongsTo \"{property}\" has no model"));
            }
        }

        for (property, relation) in &self.has_many {
            if !heads.insert(property.clone()) {
                return invalid(format!("property \"{property}\" is declared twice"));
            }
            if relation.model.is_empty() {
                return invalid(format!("hasMany \"{property}\" has no model"));
            }
            if relation.reference.is_empty() {
                return invalid(format!("hasMany \"{property}\" has no reference"));
            }
            if relation.is_many_to_many() && relation.id.is_none() {
                return invalid(format!(
                    "hasMany \"{property}\" goes through a junction but names no id column"
                ));
            }
            if !relation.is_many_to_many() && !relation.fields.is_empty() {
                return invalid(format!(
                    "hasMany \"{property}\" declares junction fields without a junction"
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> Value {
        Value::map(vec![(Value::from("table"), Value::from(name))])
    }

    fn customer() -> ModelConfig {
        ModelConfig::new("Customer", table("customers"))
            .columns(["id", "name", "occupation"])
            .has_many("orders", HasManyConfig::new("Order", "customer_id").belongs_to("customer"))
    }

    fn order() -> ModelConfig {
        ModelConfig::new("Order", table("orders"))
            .columns(["id", "product"])
            .belongs_to("customer", BelongsToConfig::new("Customer", "customer_id"))
    }

    #[test]
    fn defaults() {
        let config = customer();
        assert_eq!(config.plural, "Customers");
        assert_eq!(config.id, vec!["id".to_string()]);
        assert_eq!(config.id_properties(), vec!["id"]);
        assert!(config.validate().is_ok());
        assert!(order().validate().is_ok());
    }

    #[test]
    fn field_names_in_declaration_order() {
        let config = customer().property("street", "address.street").property("city", "address.city");
        assert_eq!(
            config.field_names(),
            vec!["id", "name", "occupation", "address", "orders"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn lookups() {
        let config = ModelConfig::new("Hero", table("heroes")).property("hero_name", "name");
        assert_eq!(config.property_for_column("hero_name"), Some("name"));
        assert_eq!(config.column_for_property("name"), Some("hero_name"));
        assert!(config.has_many_config("orders").is_none());
        assert!(order().belongs_to_config("customer").is_some());
    }

    #[test]
    fn unmapped_id_is_rejected() {
        let config = ModelConfig::new("Order", table("orders")).columns(["product"]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, BackendError::InvalidConfig { .. }));
        assert!(err.to_string().contains("id column \"id\""));
    }

    #[test]
    fn belongs_to_needs_reference_or_convert() {
        let mut relation = BelongsToConfig::new("Customer", "customer_id");
        relation.reference = None;
        let config = order();
        let config = ModelConfig {
            belongs_to: vec![("customer".into(), relation)],
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_columns_are_rejected() {
        let config = customer().property("name", "alias");
        assert!(config.validate().is_err());
        let config = order().property("customer_id", "customer_id");
        assert!(config.validate().is_err());
    }

    #[test]
    fn many_to_many_needs_id() {
        let mut relation = HasManyConfig::through("Group", "memberships", "customer_id", "group_id");
        assert!(relation.is_many_to_many());
        relation.id = None;
        let config = customer().has_many("groups", relation);
        assert!(config.validate().is_err());
    }

    #[test]
    fn junction_fields_need_junction() {
        let config = customer().has_many(
            "ratings",
            HasManyConfig::new("Group", "customer_id").field("rating", "rating"),
        );
        assert!(config.validate().is_err());
    }
}
