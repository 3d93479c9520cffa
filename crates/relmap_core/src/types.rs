//! Core type definitions.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Unique identifier of a [`Repository`](crate::Repository).
///
/// Placeholders and collections carry the handle of the repository that
/// created them; the id makes that relationship visible in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepositoryId(Uuid);

impl RepositoryId {
    /// Creates a new random repository ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RepositoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repo:{}", self.0)
    }
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an [`Instance`](crate::Instance) object.
///
/// Object identity, not data identity: two instances holding the same row
/// data have different ids. IDs are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(u64);

impl InstanceId {
    /// Allocates the next ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// State of an identity-map entry.
///
/// `New` is only reachable through `create`. A failed save or delete
/// restores the state the entry had before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Created in memory, never saved.
    New,
    /// Being fetched from the backend.
    Retrieving,
    /// Fetched or converted from backend data.
    Retrieved,
    /// A save is in progress.
    Saving,
    /// Saved at least once.
    Saved,
    /// A delete is in progress.
    Deleting,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Retrieving => "retrieving",
            Self::Retrieved => "retrieved",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Deleting => "deleting",
        };
        f.write_str(name)
    }
}

/// Lifecycle signals fired by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// An instance was created with `create`.
    Create,
    /// An instance was built from backend data.
    Load,
    /// An instance is about to be written.
    Saving,
    /// An instance and its relations were written.
    Saved,
    /// An instance is about to be deleted.
    Deleting,
    /// An instance was deleted; it is cleared right after the listeners run.
    Deleted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_unique() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", InstanceId(7)), "obj:7");
    }

    #[test]
    fn repository_ids_are_random() {
        assert_ne!(RepositoryId::new(), RepositoryId::new());
        assert!(RepositoryId::new().to_string().starts_with("repo:"));
    }

    #[test]
    fn state_names() {
        assert_eq!(EntryState::Retrieving.to_string(), "retrieving");
        assert_eq!(EntryState::Saved.to_string(), "saved");
    }
}
