use std::sync::Arc;

use crate::event_error::EventError;
use crate::events::ModelObserver;
use crate::model::Instance;
use crate::observers::ObserverRegistry;

/// Drives observers through the create, update and remove flows.
///
/// Each flow is split at the database round trip: the `before_*` half may
/// still veto the write, the `after_*` half only reports.
#[derive(Debug, Clone, Default)]
pub struct ModelLifecycle {
    observers: ObserverRegistry,
}

impl ModelLifecycle {
    pub fn new() -> Self {
        Self {
            observers: ObserverRegistry::new(),
        }
    }

    pub fn register_observer(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.register(observer);
    }

    pub fn has_observers(&self) -> bool {
        !self.observers.is_empty()
    }

    // creating -> saving
    pub fn before_create(&self, instance: &mut Instance) -> Result<(), EventError> {
        self.observers.trigger_creating(instance)?;
        self.observers.trigger_saving(instance)
    }

    // saved -> created
    pub fn after_create(&self, instance: &Instance) -> Result<(), EventError> {
        self.observers.trigger_saved(instance)?;
        self.observers.trigger_created(instance)
    }

    // updating -> saving
    pub fn before_update(&self, instance: &mut Instance) -> Result<(), EventError> {
        self.observers.trigger_updating(instance)?;
        self.observers.trigger_saving(instance)
    }

    // saved -> updated
    pub fn after_update(&self, instance: &Instance) -> Result<(), EventError> {
        self.observers.trigger_saved(instance)?;
        self.observers.trigger_updated(instance)
    }

    pub fn before_remove(&self, instance: &Instance) -> Result<(), EventError> {
        self.observers.trigger_removing(instance)
    }

    pub fn after_remove(&self, instance: &Instance) -> Result<(), EventError> {
        self.observers.trigger_removed(instance)
    }
}
