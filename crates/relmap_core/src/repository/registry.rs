//! Backends, model configs and junction configs known to a repository.

use std::collections::HashMap;
use std::sync::Arc;

use relmap_backend::{Backend, BackendError, JunctionConfig, ModelConfig};
use tracing::{debug, info};

use super::Repository;
use crate::error::{CoreError, CoreResult};

#[derive(Default)]
pub(crate) struct Registry {
    backends: HashMap<String, Arc<dyn Backend>>,
    models: HashMap<String, Arc<ModelConfig>>,
    junctions: HashMap<String, Arc<JunctionConfig>>,
}

fn config_error(model: &str, err: BackendError) -> CoreError {
    match err {
        BackendError::InvalidConfig { subject, message } => CoreError::invalid_config(subject, message),
        other => CoreError::invalid_config(model, other.to_string()),
    }
}

impl Repository {
    /// Registers a backend and every model and junction it declares.
    ///
    /// Registration is all-or-nothing: nothing is added when one of the
    /// declarations is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for a malformed manifest and
    /// [`CoreError::DuplicateModel`] for a model that is already known.
    pub fn register_backend(&self, backend: Arc<dyn Backend>) -> CoreResult<()> {
        let identifier = backend.identifier().to_string();
        let mut models = Vec::new();
        for mut config in backend.configs() {
            if config.backend.is_empty() {
                config.backend = identifier.clone();
            }
            config.validate().map_err(|e| config_error(&config.name, e))?;
            models.push(config);
        }
        let mut junctions = Vec::new();
        for mut config in backend.junctions() {
            if config.backend.is_empty() {
                config.backend = identifier.clone();
            }
            junctions.push(config);
        }

        let mut registry = self.inner.registry.write();
        for (i, config) in models.iter().enumerate() {
            let twice = models[..i].iter().any(|c| c.name == config.name);
            if twice || registry.models.contains_key(&config.name) {
                return Err(CoreError::DuplicateModel {
                    model: config.name.clone(),
                });
            }
        }
        for config in models {
            debug!(model = %config.name, backend = %config.backend, "model registered");
            registry.models.insert(config.name.clone(), Arc::new(config));
        }
        for config in junctions {
            debug!(junction = %config.name, backend = %config.backend, "junction registered");
            registry.junctions.insert(config.name.clone(), Arc::new(config));
        }
        info!(backend = %identifier, models = registry.models.len(), "backend registered");
        registry.backends.insert(identifier, backend);
        Ok(())
    }

    /// Returns true when `model` is registered.
    pub fn is_configured(&self, model: &str) -> bool {
        self.inner.registry.read().models.contains_key(model)
    }

    /// Names of the registered models, sorted.
    pub fn models(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry.read().models.keys().cloned().collect();
        names.sort();
        names
    }

    /// The config of `model`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownModel`] when it was never registered.
    pub fn config(&self, model: &str) -> CoreResult<Arc<ModelConfig>> {
        self.inner
            .registry
            .read()
            .models
            .get(model)
            .cloned()
            .ok_or_else(|| CoreError::unknown_model(model))
    }

    pub(crate) fn junction_config(&self, name: &str) -> CoreResult<Arc<JunctionConfig>> {
        self.inner
            .registry
            .read()
            .junctions
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownJunction {
                junction: name.to_string(),
            })
    }

    pub(crate) fn backend(&self, identifier: &str) -> CoreResult<Arc<dyn Backend>> {
        self.inner
            .registry
            .read()
            .backends
            .get(identifier)
            .cloned()
            .ok_or_else(|| CoreError::UnknownBackend {
                backend: identifier.to_string(),
            })
    }

    pub(crate) fn backend_for(&self, config: &ModelConfig) -> CoreResult<Arc<dyn Backend>> {
        self.backend(&config.backend)
    }

    /// Checks that every relation points at a registered model, junction
    /// and backend.
    ///
    /// # Errors
    ///
    /// Returns the first missing piece.
    pub fn validate_configs(&self) -> CoreResult<()> {
        let registry = self.inner.registry.read();
        let model = |name: &str| {
            if registry.models.contains_key(name) {
                Ok(())
            } else {
                Err(CoreError::unknown_model(name))
            }
        };
        let mut names: Vec<&String> = registry.models.keys().collect();
        names.sort();
        for name in names {
            let config = &registry.models[name];
            if !registry.backends.contains_key(&config.backend) {
                return Err(CoreError::UnknownBackend {
                    backend: config.backend.clone(),
                });
            }
            for (_, relation) in &config.belongs_to {
                model(&relation.model)?;
            }
            for (property, relation) in &config.has_many {
                model(&relation.model)?;
                if let Some(junction) = &relation.through {
                    let junction = registry.junctions.get(junction).ok_or_else(|| {
                        CoreError::UnknownJunction {
                            junction: junction.clone(),
                        }
                    })?;
                    if !registry.backends.contains_key(&junction.backend) {
                        return Err(CoreError::UnknownBackend {
                            backend: junction.backend.clone(),
                        });
                    }
                    if config.id.len() != 1 {
                        return Err(CoreError::invalid_config(
                            &config.name,
                            format!("hasMany \"{property}\" needs a single id column"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
