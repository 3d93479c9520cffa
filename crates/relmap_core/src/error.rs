//! Error types for the repository.

use relmap_backend::BackendError;
use relmap_codec::CodecError;
use thiserror::Error;

/// Result type for repository operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in repository operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backend error, propagated unchanged.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Value or path error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The model was never registered.
    #[error("model \"{model}\" not configured")]
    UnknownModel {
        /// The requested model.
        model: String,
    },

    /// No junction with this name was registered.
    #[error("junction \"{junction}\" not configured")]
    UnknownJunction {
        /// The requested junction.
        junction: String,
    },

    /// A model or junction names a backend that was never registered.
    #[error("backend \"{backend}\" not registered")]
    UnknownBackend {
        /// The missing backend identifier.
        backend: String,
    },

    /// A model manifest or relation is malformed.
    #[error("invalid config for \"{model}\": {message}")]
    InvalidConfig {
        /// The model (or junction) at fault.
        model: String,
        /// What is wrong.
        message: String,
    },

    /// Two backends declared the same model.
    #[error("model \"{model}\" is already configured")]
    DuplicateModel {
        /// The model declared twice.
        model: String,
    },

    /// The instance is unknown to this repository.
    #[error("the \"{model}\" instance is not bound to this repository")]
    NotBound {
        /// Model the instance was used as.
        model: String,
    },

    /// Fetched data resolves to a different index than requested.
    #[error("the id doesn't match the retrieved \"{model}\" data: {{{requested}}} != {{{actual}}}")]
    IndexMismatch {
        /// The model fetched.
        model: String,
        /// Index of the requested id.
        requested: String,
        /// Index of the fetched data.
        actual: String,
    },

    /// The id properties of a bound instance were modified.
    #[error("change rejected, the \"{model}\" index changed from {{{from}}} to {{{to}}}")]
    IndexChanged {
        /// The model saved.
        model: String,
        /// Index the instance is bound under.
        from: String,
        /// Index its id properties resolve to now.
        to: String,
    },

    /// The instance was created but never saved.
    #[error("the \"{model}\" instance was never saved")]
    NotPersisted {
        /// The model of the instance.
        model: String,
    },

    /// The instance was deleted and cleared.
    #[error("the \"{model}\" instance was deleted")]
    InstanceDeleted {
        /// The model of the instance.
        model: String,
    },

    /// An id lacks one of the identity columns.
    #[error("incomplete id, \"{model}\" requires: {}", .required.join(", "))]
    IncompleteId {
        /// The model addressed.
        model: String,
        /// Its identity columns.
        required: Vec<String>,
    },

    /// Reload would overwrite unsaved changes.
    #[error("\"{model}\" {{{index}}} has unsaved changes in: {}", .fields.join(", "))]
    PendingChanges {
        /// The model reloaded.
        model: String,
        /// Index of the instance.
        index: String,
        /// Changed columns.
        fields: Vec<String>,
    },

    /// A single-result lookup found nothing.
    #[error("no \"{model}\" model matches the conditions: {conditions}")]
    NoMatch {
        /// The model searched.
        model: String,
        /// The conditions, rendered.
        conditions: String,
    },

    /// A single-result lookup found several rows.
    #[error("more than 1 \"{model}\" model matches the conditions: {conditions}")]
    AmbiguousMatch {
        /// The model searched.
        model: String,
        /// The conditions, rendered.
        conditions: String,
    },

    /// A placeholder was reached through a container that does not own it.
    #[error("the \"{property}\" placeholder belongs to another (duplicated?) container")]
    StalePlaceholder {
        /// The relation property.
        property: String,
    },

    /// A placeholder was written to after it was substituted.
    #[error("the \"{property}\" placeholder is already replaced")]
    PlaceholderReplaced {
        /// The relation property.
        property: String,
    },

    /// The model has no such property.
    #[error("\"{model}\" has no property \"{property}\"")]
    UnknownProperty {
        /// The model of the instance.
        model: String,
        /// The requested property.
        property: String,
    },

    /// The property holds a relation, not a plain value.
    #[error("\"{model}\" property \"{property}\" is a relation, not a value")]
    NotAValue {
        /// The model of the instance.
        model: String,
        /// The requested property.
        property: String,
    },

    /// The property holds a plain value or the other kind of relation.
    #[error("\"{model}\" property \"{property}\" is not a {expected} relation")]
    NotARelation {
        /// The model of the instance.
        model: String,
        /// The requested property.
        property: String,
        /// `belongsTo` or `hasMany`.
        expected: &'static str,
    },
}

impl CoreError {
    /// Create an unknown model error.
    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Create a not bound error.
    pub fn not_bound(model: impl Into<String>) -> Self {
        Self::NotBound {
            model: model.into(),
        }
    }

    /// Create an index mismatch error.
    pub fn index_mismatch(
        model: impl Into<String>,
        requested: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::IndexMismatch {
            model: model.into(),
            requested: requested.into(),
            actual: actual.into(),
        }
    }

    /// Create an index changed error.
    pub fn index_changed(
        model: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self::IndexChanged {
            model: model.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Create an instance deleted error.
    pub fn instance_deleted(model: impl Into<String>) -> Self {
        Self::InstanceDeleted {
            model: model.into(),
        }
    }

    /// Create an unknown property error.
    pub fn unknown_property(model: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            model: model.into(),
            property: property.into(),
        }
    }

    /// Create a not-a-relation error.
    pub fn not_a_relation(
        model: impl Into<String>,
        property: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::NotARelation {
            model: model.into(),
            property: property.into(),
            expected,
        }
    }

    /// Returns true for errors raised by the backend.
    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = CoreError::index_changed("Customer", "2", "1");
        assert_eq!(
            err.to_string(),
            "change rejected, the \"Customer\" index changed from {2} to {1}"
        );

        let err = CoreError::index_mismatch("Customer", "01", "1");
        assert_eq!(
            err.to_string(),
            "the id doesn't match the retrieved \"Customer\" data: {01} != {1}"
        );

        let err = CoreError::IncompleteId {
            model: "Rating".into(),
            required: vec!["customer_id".into(), "group_id".into()],
        };
        assert_eq!(
            err.to_string(),
            "incomplete id, \"Rating\" requires: customer_id, group_id"
        );
    }

    #[test]
    fn backend_errors_convert() {
        let err: CoreError = BackendError::UnknownTable("orders".into()).into();
        assert!(err.is_backend());
        assert_eq!(err.to_string(), "backend error: unknown table \"orders\"");
    }
}
