//! The identity map.
//!
//! Entries are keyed by the [`InstanceId`] of the instance they track, so an
//! instance stays addressable while its index changes (a new instance has
//! no index until its first save). A second map resolves `(model, index)` to
//! that key; at most one entry owns an index at a time.
//!
//! Entries only hold weak references. Entries whose instance was dropped are
//! swept out whenever the map has doubled since the last sweep.

use std::collections::HashMap;

use relmap_codec::Record;

use crate::instance::{Instance, WeakInstance};
use crate::types::{EntryState, InstanceId};

/// Snapshot of one element of a hasMany collection, taken when the
/// collection was loaded or last saved.
#[derive(Debug, Clone)]
pub(crate) struct Reference {
    /// The related instance.
    pub key: InstanceId,
    /// The junction row for many-to-many relations, empty otherwise.
    pub row: Record,
}

#[derive(Debug)]
pub(crate) struct Entry {
    pub model: String,
    pub index: Option<String>,
    pub instance: Option<WeakInstance>,
    pub data: Option<Record>,
    pub state: EntryState,
    pub references: HashMap<String, Vec<Reference>>,
}

impl Entry {
    pub fn new(model: impl Into<String>, index: Option<String>, state: EntryState) -> Self {
        Self {
            model: model.into(),
            index,
            instance: None,
            data: None,
            state,
            references: HashMap::new(),
        }
    }

    pub fn upgrade(&self) -> Option<Instance> {
        self.instance.as_ref().and_then(WeakInstance::upgrade)
    }

    /// An entry still being fetched has no instance yet.
    pub fn is_in_flight(&self) -> bool {
        self.instance.is_none()
    }

    fn is_dead(&self) -> bool {
        !self.is_in_flight() && self.upgrade().is_none()
    }
}

const MIN_SWEEP: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct IdentityMap {
    entries: HashMap<InstanceId, Entry>,
    index: HashMap<String, HashMap<String, InstanceId>>,
    sweep_at: usize,
}

impl IdentityMap {
    pub fn get(&self, key: InstanceId) -> Option<&Entry> {
        self.entries.get(&key)
    }

    pub fn get_mut(&mut self, key: InstanceId) -> Option<&mut Entry> {
        self.entries.get_mut(&key)
    }

    pub fn lookup(&self, model: &str, index: &str) -> Option<InstanceId> {
        self.index.get(model).and_then(|m| m.get(index)).copied()
    }

    /// The live instance stored under `(model, index)`.
    ///
    /// An entry whose instance was dropped is discarded.
    pub fn live(&mut self, model: &str, index: &str) -> Option<Instance> {
        let key = self.lookup(model, index)?;
        let entry = self.entries.get(&key)?;
        entry.instance.as_ref()?;
        match entry.upgrade() {
            Some(instance) => Some(instance),
            None => {
                self.remove(key);
                None
            }
        }
    }

    /// Returns true when `(model, index)` is owned by an entry that is
    /// still being fetched.
    pub fn in_flight(&self, model: &str, index: &str) -> bool {
        self.lookup(model, index)
            .and_then(|key| self.entries.get(&key))
            .is_some_and(Entry::is_in_flight)
    }

    /// Adds an entry, taking over its index from any previous owner.
    pub fn insert(&mut self, key: InstanceId, entry: Entry) {
        if self.entries.len() >= self.sweep_at.max(MIN_SWEEP) {
            self.sweep();
        }
        if let Some(index) = entry.index.clone() {
            self.claim(key, &entry.model, index);
        }
        self.entries.insert(key, entry);
    }

    /// Removes every entry whose instance was dropped.
    pub fn sweep(&mut self) -> usize {
        let dead: Vec<InstanceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_dead())
            .map(|(k, _)| *k)
            .collect();
        for key in &dead {
            self.remove(*key);
        }
        self.sweep_at = self.entries.len() * 2;
        dead.len()
    }

    /// Moves the entry of `key` to a new index.
    pub fn rekey(&mut self, key: InstanceId, index: String) {
        let Some(entry) = self.entries.get(&key) else {
            return;
        };
        let model = entry.model.clone();
        if let Some(old) = entry.index.clone() {
            self.release(&model, &old, key);
        }
        self.claim(key, &model, index.clone());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.index = Some(index);
        }
    }

    pub fn remove(&mut self, key: InstanceId) -> Option<Entry> {
        let entry = self.entries.remove(&key)?;
        if let Some(index) = &entry.index {
            self.release(&entry.model, index, key);
        }
        Some(entry)
    }

    /// Keys of the entries of `model`.
    pub fn keys_of(&self, model: &str) -> Vec<InstanceId> {
        let mut keys: Vec<InstanceId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.model == model)
            .map(|(k, _)| *k)
            .collect();
        keys.sort();
        keys
    }

    pub fn keys(&self) -> Vec<InstanceId> {
        self.entries.keys().copied().collect()
    }

    /// Drops `key` from every hasMany snapshot.
    pub fn forget(&mut self, key: InstanceId) {
        for entry in self.entries.values_mut() {
            for references in entry.references.values_mut() {
                references.retain(|r| r.key != key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries whose instance is alive.
    pub fn live_len(&self) -> usize {
        self.entries.values().filter(|e| e.upgrade().is_some()).count()
    }

    /// Returns true when `(model, index)` resolves to `key`.
    pub fn owns(&self, key: InstanceId, model: &str, index: &str) -> bool {
        self.lookup(model, index) == Some(key)
    }

    fn claim(&mut self, key: InstanceId, model: &str, index: String) {
        let previous = self
            .index
            .entry(model.to_string())
            .or_default()
            .insert(index, key);
        if let Some(previous) = previous.filter(|p| *p != key) {
            self.entries.remove(&previous);
        }
    }

    fn release(&mut self, model: &str, index: &str, key: InstanceId) {
        if let Some(indexes) = self.index.get_mut(model) {
            if indexes.get(index) == Some(&key) {
                indexes.remove(index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::Field;
    use relmap_codec::Value;

    fn instance(key: InstanceId) -> Instance {
        Instance::new(key, "Customer", vec![("id".into(), Field::Value(Value::Integer(1)))])
    }

    fn entry(index: &str, instance: &Instance) -> Entry {
        let mut entry = Entry::new("Customer", Some(index.to_string()), EntryState::Retrieved);
        entry.instance = Some(instance.downgrade());
        entry
    }

    #[test]
    fn live_lookup() {
        let mut map = IdentityMap::default();
        let key = InstanceId::next();
        let bob = instance(key);
        map.insert(key, entry("1", &bob));
        assert_eq!(map.live("Customer", "1"), Some(bob.clone()));
        assert!(map.live("Customer", "2").is_none());
        assert!(map.live("Order", "1").is_none());
    }

    #[test]
    fn dropped_instances_are_discarded() {
        let mut map = IdentityMap::default();
        let key = InstanceId::next();
        let bob = instance(key);
        map.insert(key, entry("1", &bob));
        drop(bob);
        assert!(map.live("Customer", "1").is_none());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn one_entry_per_index() {
        let mut map = IdentityMap::default();
        let (a, b) = (InstanceId::next(), InstanceId::next());
        let (first, second) = (instance(a), instance(b));
        map.insert(a, entry("1", &first));
        map.insert(b, entry("1", &second));
        assert_eq!(map.len(), 1);
        assert_eq!(map.live("Customer", "1"), Some(second));
    }

    #[test]
    fn sweeps_drop_dead_entries() {
        let mut map = IdentityMap::default();
        let keep = InstanceId::next();
        let bob = instance(keep);
        map.insert(keep, entry("1", &bob));
        for _ in 0..MIN_SWEEP * 3 {
            let key = InstanceId::next();
            let created = instance(key);
            let mut new = Entry::new("Customer", None, EntryState::New);
            new.instance = Some(created.downgrade());
            map.insert(key, new);
        }
        assert!(map.len() < MIN_SWEEP * 2);
        assert_eq!(map.live_len(), 1);

        map.insert(InstanceId::next(), Entry::new("Customer", Some("2".into()), EntryState::Retrieving));
        let before = map.len();
        assert_eq!(map.sweep(), before - 2);
        assert_eq!(map.len(), 2);
        assert!(map.in_flight("Customer", "2"));
        assert!(!map.in_flight("Customer", "1"));
        assert_eq!(map.live("Customer", "1"), Some(bob));
    }

    #[test]
    fn rekey_moves_the_index() {
        let mut map = IdentityMap::default();
        let key = InstanceId::next();
        let bob = instance(key);
        let mut new = Entry::new("Customer", None, EntryState::New);
        new.instance = Some(bob.downgrade());
        map.insert(key, new);
        assert!(map.lookup("Customer", "7").is_none());

        map.rekey(key, "7".into());
        assert!(map.owns(key, "Customer", "7"));
        map.rekey(key, "8".into());
        assert!(map.lookup("Customer", "7").is_none());
        assert_eq!(map.get(key).and_then(|e| e.index.clone()), Some("8".into()));
        assert_eq!(map.keys_of("Customer"), vec![key]);

        assert!(map.remove(key).is_some());
        assert!(map.lookup("Customer", "8").is_none());
    }
}
