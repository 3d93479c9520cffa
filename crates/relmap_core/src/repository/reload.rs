//! Refreshing instances from their backend.

use relmap_codec::Value;
use tracing::debug;

use super::mapping::{id_record, index_of_data};
use super::Repository;
use crate::config::ReloadOptions;
use crate::error::{CoreError, CoreResult};
use crate::instance::Instance;
use crate::types::{EntryState, Lifecycle};

impl Repository {
    /// Replaces the content of `instance` with a fresh copy of its row.
    ///
    /// Loaded relations are dropped and become placeholders again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PendingChanges`] when the instance has unsaved
    /// changes, [`CoreError::NotPersisted`] for an instance that was never
    /// saved, or the backend error.
    pub fn reload(&self, model: &str, instance: &Instance) -> CoreResult<()> {
        self.reload_with(model, instance, &ReloadOptions::default())
    }

    /// [`reload`](Self::reload) with options.
    ///
    /// # Errors
    ///
    /// See [`reload`](Self::reload).
    pub fn reload_with(&self, model: &str, instance: &Instance, options: &ReloadOptions) -> CoreResult<()> {
        let config = self.config(model)?;
        let key = instance.id();
        let (state, index, stored) = self.with_entry(key, |entry| match entry {
            Some(entry) if entry.model == model => Ok((entry.state, entry.index.clone(), entry.data.clone())),
            _ => Err(CoreError::not_bound(model)),
        })?;
        let (Some(index), Some(stored)) = (index, stored) else {
            return Err(CoreError::NotPersisted {
                model: model.to_string(),
            });
        };
        if state == EntryState::New {
            return Err(CoreError::NotPersisted {
                model: model.to_string(),
            });
        }
        if !options.discard_changes {
            self.ensure_unchanged(model, instance, &index)?;
        }

        let data = self.fetch(&config, &stored.project(&config.id), &index)?;
        self.apply_data(&config, instance, &data)?;
        self.with_entry(key, |entry| {
            if let Some(entry) = entry {
                entry.data = Some(data);
                entry.references.clear();
                entry.state = EntryState::Retrieved;
            }
        });
        debug!(model, index = %index, "instance reloaded");
        self.fire(model, Lifecycle::Load, instance);
        Ok(())
    }

    /// Reloads the live instance with `id`, or fetches it when none is live.
    ///
    /// # Errors
    ///
    /// See [`reload`](Self::reload).
    pub fn reload_by_id(
        &self,
        model: &str,
        id: impl Into<Value>,
        options: &ReloadOptions,
    ) -> CoreResult<Instance> {
        let config = self.config(model)?;
        let id = id.into();
        let index = index_of_data(&config, &id_record(&config, &id)?)?;
        match self.live(model, &index) {
            Some(instance) => {
                self.reload_with(model, &instance, options)?;
                Ok(instance)
            }
            None => self.get(model, id),
        }
    }

    /// Reloads every stored live instance of `model`.
    ///
    /// Without `discard_changes`, nothing is reloaded when one instance has
    /// unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::PendingChanges`] for the first changed instance,
    /// or the first reload error.
    pub fn reload_all(&self, model: &str, options: &ReloadOptions) -> CoreResult<()> {
        self.config(model)?;
        let instances: Vec<(String, Instance)> = {
            let identity = self.inner.identity.lock();
            identity
                .keys_of(model)
                .into_iter()
                .filter_map(|key| {
                    let entry = identity.get(key)?;
                    if entry.state == EntryState::New {
                        return None;
                    }
                    Some((entry.index.clone()?, entry.upgrade()?))
                })
                .collect()
        };
        if !options.discard_changes {
            for (index, instance) in &instances {
                self.ensure_unchanged(model, instance, index)?;
            }
        }
        let discard = ReloadOptions::new().discard_changes(true);
        for (_, instance) in &instances {
            self.reload_with(model, instance, &discard)?;
        }
        Ok(())
    }

    fn ensure_unchanged(&self, model: &str, instance: &Instance, index: &str) -> CoreResult<()> {
        let changes = self.diff(model, instance)?;
        if changes.is_empty() {
            return Ok(());
        }
        Err(CoreError::PendingChanges {
            model: model.to_string(),
            index: index.to_string(),
            fields: changes.into_keys().collect(),
        })
    }
}
