use std::sync::Arc;

use crate::event_error::EventError;
use crate::events::ModelObserver;
use crate::model::Instance;

/// Ordered list of observers registered on one model
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn ModelObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn register(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn trigger_creating(&self, instance: &mut Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.creating(instance)?;
        }
        Ok(())
    }

    pub fn trigger_created(&self, instance: &Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.created(instance)?;
        }
        Ok(())
    }

    pub fn trigger_updating(&self, instance: &mut Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.updating(instance)?;
        }
        Ok(())
    }

    pub fn trigger_updated(&self, instance: &Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.updated(instance)?;
        }
        Ok(())
    }

    pub fn trigger_saving(&self, instance: &mut Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.saving(instance)?;
        }
        Ok(())
    }

    pub fn trigger_saved(&self, instance: &Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.saved(instance)?;
        }
        Ok(())
    }

    pub fn trigger_removing(&self, instance: &Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.removing(instance)?;
        }
        Ok(())
    }

    pub fn trigger_removed(&self, instance: &Instance) -> Result<(), EventError> {
        for observer in &self.observers {
            observer.removed(instance)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}
