use std::fmt;
use std::sync::Arc;

use bson::Document;

use crate::error::{OdmError, OdmResult};
use crate::events::{ChangeEvent, ModelObserver, Notifier};
use crate::model::{AttributeDescriptor, AttributeRegistry, Instance, ModelLifecycle};

type Validator = Arc<dyn Fn(&mut Instance) + Send + Sync>;

/// A model type: its attributes, validators, observers and the change
/// listeners every instance starts with.
pub struct ModelDefinition {
    name: String,
    attributes: AttributeRegistry,
    validators: Vec<Validator>,
    lifecycle: ModelLifecycle,
    change_listeners: Notifier,
}

impl ModelDefinition {
    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &AttributeRegistry {
        &self.attributes
    }

    pub fn primary_key(&self) -> &str {
        self.attributes.primary_key()
    }

    pub fn lifecycle(&self) -> &ModelLifecycle {
        &self.lifecycle
    }

    pub(crate) fn change_listeners(&self) -> &Notifier {
        &self.change_listeners
    }

    /// New instance from user input; every supplied field is dirty
    pub fn create(self: &Arc<Self>, values: Document) -> OdmResult<Instance> {
        for attr in values.keys() {
            if !self.attributes.contains(attr) && !self.attributes.is_primary_key(attr) {
                return Err(OdmError::UnknownAttribute {
                    model: self.name.clone(),
                    attr: attr.clone(),
                });
            }
        }
        Ok(Instance::new(Arc::clone(self), values.clone(), values))
    }

    /// Instance for a stored document; nothing is dirty
    pub fn hydrate(self: &Arc<Self>, stored: Document) -> Instance {
        Instance::new(Arc::clone(self), stored, Document::new())
    }

    /// Run every validator in registration order
    pub fn run_validators(&self, instance: &mut Instance) {
        for validator in &self.validators {
            validator(instance);
        }
    }
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("validators", &self.validators.len())
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

/// Builder collecting a model's declarations
pub struct ModelBuilder {
    name: String,
    attributes: AttributeRegistry,
    validators: Vec<Validator>,
    lifecycle: ModelLifecycle,
    change_listeners: Notifier,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            attributes: AttributeRegistry::new(name.clone()),
            name,
            validators: Vec::new(),
            lifecycle: ModelLifecycle::new(),
            change_listeners: Notifier::new(),
        }
    }

    pub fn attr(mut self, descriptor: AttributeDescriptor) -> Self {
        self.attributes.define(descriptor);
        self
    }

    /// Validator run before the saving hooks; it reports problems with
    /// [`Instance::error`]
    pub fn validate<F>(mut self, validator: F) -> Self
    where
        F: Fn(&mut Instance) + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn observe(mut self, observer: Arc<dyn ModelObserver>) -> Self {
        self.lifecycle.register_observer(observer);
        self
    }

    pub fn on_change<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.change_listeners.on_change(listener);
        self
    }

    pub fn on_attr_change<F>(mut self, attr: &str, listener: F) -> Self
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.change_listeners.on_attr_change(attr, listener);
        self
    }

    pub fn build(self) -> Arc<ModelDefinition> {
        Arc::new(ModelDefinition {
            name: self.name,
            attributes: self.attributes,
            validators: self.validators,
            lifecycle: self.lifecycle,
            change_listeners: self.change_listeners,
        })
    }
}
