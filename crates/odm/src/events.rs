use std::fmt;
use std::sync::Arc;

use bson::Bson;

use crate::event_error::EventError;
use crate::model::Instance;

/// Notification emitted whenever an instance attribute is assigned or unset
#[derive(Debug, Clone, Copy)]
pub struct ChangeEvent<'a> {
    pub attr: &'a str,
    pub value: &'a Bson,
    pub previous: Option<&'a Bson>,
}

/// Lifecycle hooks invoked around persistence, in registration order.
///
/// `creating`, `updating`, `saving` and `removing` run before the database is
/// touched and may register attribute errors on the instance or return an
/// error to abort. The remaining hooks run after a successful round trip.
pub trait ModelObserver: Send + Sync {
    fn creating(&self, _instance: &mut Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn created(&self, _instance: &Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn updating(&self, _instance: &mut Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn updated(&self, _instance: &Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn saving(&self, _instance: &mut Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn saved(&self, _instance: &Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn removing(&self, _instance: &Instance) -> Result<(), EventError> {
        Ok(())
    }

    fn removed(&self, _instance: &Instance) -> Result<(), EventError> {
        Ok(())
    }
}

type ChangeListener = Arc<dyn Fn(&ChangeEvent<'_>) + Send + Sync>;

/// Per-instance change subscriptions (`change` and `change:<attr>`)
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Vec<(Option<String>, ChangeListener)>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes of every attribute
    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners.push((None, Arc::new(listener)));
    }

    /// Subscribe to changes of one attribute
    pub fn on_attr_change<F>(&mut self, attr: &str, listener: F)
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.listeners
            .push((Some(attr.to_string()), Arc::new(listener)));
    }

    pub fn emit(&self, event: &ChangeEvent<'_>) {
        for (attr, listener) in &self.listeners {
            match attr {
                Some(attr) if attr != event.attr => continue,
                _ => listener(event),
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
