//! Per-call options.

use relmap_codec::Record;

/// Options for `get`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetOptions {
    /// Load every relation of the instance, and of the instances reached
    /// that way, instead of installing placeholders.
    pub preload: bool,
}

impl GetOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to preload relations.
    #[must_use]
    pub const fn preload(mut self, value: bool) -> Self {
        self.preload = value;
        self
    }
}

/// Options for `convert`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Load relations right away.
    pub preload: bool,
    /// Wrap the instance in a junction carrying these fields.
    pub junction: Option<Record>,
}

impl ConvertOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to preload relations.
    #[must_use]
    pub fn preload(mut self, value: bool) -> Self {
        self.preload = value;
        self
    }

    /// Wraps the converted instance in a junction with `fields`.
    #[must_use]
    pub fn junction(mut self, fields: Record) -> Self {
        self.junction = Some(fields);
        self
    }
}

/// Options for `save`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// Only write the instance itself, not its related instances.
    pub ignore_relations: bool,
    /// Keep rows that were removed from a one-to-many collection instead of
    /// deleting them.
    pub keep_missing_related_instances: bool,
}

impl SaveOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to skip related instances.
    #[must_use]
    pub const fn ignore_relations(mut self, value: bool) -> Self {
        self.ignore_relations = value;
        self
    }

    /// Sets whether to keep rows removed from one-to-many collections.
    #[must_use]
    pub const fn keep_missing_related_instances(mut self, value: bool) -> Self {
        self.keep_missing_related_instances = value;
        self
    }
}

/// Options for `reload`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadOptions {
    /// Overwrite unsaved changes instead of failing.
    pub discard_changes: bool,
}

impl ReloadOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether unsaved changes may be overwritten.
    #[must_use]
    pub const fn discard_changes(mut self, value: bool) -> Self {
        self.discard_changes = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        assert!(!GetOptions::default().preload);
        let save = SaveOptions::default();
        assert!(!save.ignore_relations);
        assert!(!save.keep_missing_related_instances);
        assert!(!ReloadOptions::default().discard_changes);
        assert!(ConvertOptions::default().junction.is_none());
    }

    #[test]
    fn builders() {
        assert!(GetOptions::new().preload(true).preload);
        assert!(SaveOptions::new().ignore_relations(true).ignore_relations);
        assert!(ReloadOptions::new().discard_changes(true).discard_changes);
        let convert = ConvertOptions::new().junction(Record::new().with("rating", 5));
        assert_eq!(convert.junction.unwrap().len(), 1);
    }
}
