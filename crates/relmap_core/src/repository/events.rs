//! Lifecycle listeners.

use std::sync::Arc;

use tracing::trace;

use super::Repository;
use crate::instance::Instance;
use crate::types::Lifecycle;

pub(crate) type Listener = Arc<dyn Fn(&Instance) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    items: Vec<(String, Lifecycle, Listener)>,
}

impl Repository {
    /// Calls `callback` whenever an instance of `model` reaches `event`.
    ///
    /// Callbacks run synchronously on the thread that triggered the event,
    /// with no repository lock held, so they may call back into the
    /// repository.
    pub fn listen<F>(&self, model: &str, event: Lifecycle, callback: F)
    where
        F: Fn(&Instance) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .items
            .push((model.to_string(), event, Arc::new(callback)));
    }

    pub(crate) fn fire(&self, model: &str, event: Lifecycle, instance: &Instance) {
        let callbacks: Vec<Listener> = self
            .inner
            .listeners
            .read()
            .items
            .iter()
            .filter(|(m, e, _)| m == model && *e == event)
            .map(|(_, _, callback)| Arc::clone(callback))
            .collect();
        if callbacks.is_empty() {
            return;
        }
        trace!(model, event = ?event, listeners = callbacks.len(), "firing lifecycle event");
        for callback in callbacks {
            callback(instance);
        }
    }
}
