//! Instance State - current values, dirty tracking and atomic baselines
//!
//! An instance is either hydrated from a stored document (nothing dirty) or
//! built from user input (every supplied field dirty). Assignments go
//! through [`Instance::set`], which records the field as dirty, captures the
//! baseline of atomic attributes and notifies change listeners.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{OdmError, OdmResult, ValidationError};
use crate::events::{ChangeEvent, Notifier};
use crate::model::ModelDefinition;
use crate::update::{parse_atomic, Number, Translation};

#[derive(Clone)]
pub struct Instance {
    model: Arc<ModelDefinition>,
    attrs: Document,
    dirty: Document,
    prior_atomic: BTreeMap<String, Number>,
    unset_markers: BTreeSet<String>,
    errors: Vec<ValidationError>,
    notifier: Notifier,
    removed: bool,
}

impl Instance {
    pub(crate) fn new(model: Arc<ModelDefinition>, attrs: Document, dirty: Document) -> Self {
        let notifier = model.change_listeners().clone();
        Self {
            model,
            attrs,
            dirty,
            prior_atomic: BTreeMap::new(),
            unset_markers: BTreeSet::new(),
            errors: Vec::new(),
            notifier,
            removed: false,
        }
    }

    pub fn model(&self) -> &Arc<ModelDefinition> {
        &self.model
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn get(&self, attr: &str) -> Option<&Bson> {
        self.attrs.get(attr)
    }

    pub fn get_str(&self, attr: &str) -> Option<&str> {
        self.attrs.get(attr).and_then(Bson::as_str)
    }

    /// Numeric value of an attribute, whatever its stored width
    pub fn get_number(&self, attr: &str) -> Option<Number> {
        self.attrs.get(attr).and_then(Number::from_bson)
    }

    /// Present and not null
    pub fn has(&self, attr: &str) -> bool {
        !matches!(self.attrs.get(attr), None | Some(Bson::Null))
    }

    /// Assign one attribute.
    ///
    /// Only declared attributes (and the primary key) may be assigned.
    /// Assigning the current value again is a no-op.
    pub fn set(&mut self, attr: &str, value: impl Into<Bson>) -> OdmResult<()> {
        self.ensure_declared(attr)?;
        let value = value.into();

        let previous = self.attrs.get(attr).cloned();
        if previous.as_ref() == Some(&value) && !self.unset_markers.contains(attr) {
            return Ok(());
        }

        if self.model.attributes().is_atomic(attr) && !self.prior_atomic.contains_key(attr) {
            if let Some(baseline) = previous.as_ref().and_then(parse_atomic) {
                self.prior_atomic.insert(attr.to_string(), baseline);
            }
        }

        self.unset_markers.remove(attr);
        self.attrs.insert(attr, value.clone());
        self.dirty.insert(attr, value.clone());
        self.notifier.emit(&ChangeEvent {
            attr,
            value: &value,
            previous: previous.as_ref(),
        });
        Ok(())
    }

    /// Assign several attributes in document order, stopping at the first
    /// undeclared one
    pub fn set_many(&mut self, values: Document) -> OdmResult<()> {
        for (attr, value) in values {
            self.set(&attr, value)?;
        }
        Ok(())
    }

    /// Remove an attribute's value; the next update issues `$unset` for it
    pub fn unset(&mut self, attr: &str) -> OdmResult<()> {
        self.ensure_declared(attr)?;
        if self.model.attributes().is_primary_key(attr) {
            return Err(OdmError::MissingPrimaryKey);
        }

        let previous = self.attrs.insert(attr, Bson::Null);
        self.dirty.insert(attr, Bson::Null);
        self.unset_markers.insert(attr.to_string());
        self.notifier.emit(&ChangeEvent {
            attr,
            value: &Bson::Null,
            previous: previous.as_ref(),
        });
        Ok(())
    }

    /// Whether anything changed since the last successful persistence
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn changed(&self, attr: &str) -> bool {
        self.dirty.contains_key(attr)
    }

    pub fn dirty(&self) -> &Document {
        &self.dirty
    }

    pub fn prior_atomic(&self) -> &BTreeMap<String, Number> {
        &self.prior_atomic
    }

    pub fn unset_markers(&self) -> &BTreeSet<String> {
        &self.unset_markers
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }

    /// Register an attribute error
    pub fn error(&mut self, attr: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(attr, message));
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    /// Clear previous errors and run the model's validators
    pub fn validate(&mut self) -> bool {
        self.errors.clear();
        let model = Arc::clone(&self.model);
        model.run_validators(self);
        self.is_valid()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Not persisted yet: the primary key is absent
    pub fn is_new(&self) -> bool {
        self.primary().is_none()
    }

    /// Primary key value, if assigned
    pub fn primary(&self) -> Option<&Bson> {
        match self.attrs.get(self.model.primary_key()) {
            None | Some(Bson::Null) => None,
            Some(value) => Some(value),
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Current values, without fields that were unset
    pub fn to_document(&self) -> Document {
        self.attrs
            .iter()
            .filter(|(attr, _)| !self.unset_markers.contains(attr.as_str()))
            .map(|(attr, value)| (attr.clone(), value.clone()))
            .collect()
    }

    pub fn on_change<F>(&mut self, listener: F)
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.notifier.on_change(listener);
    }

    pub fn on_attr_change<F>(&mut self, attr: &str, listener: F)
    where
        F: Fn(&ChangeEvent<'_>) + Send + Sync + 'static,
    {
        self.notifier.on_attr_change(attr, listener);
    }

    fn ensure_declared(&self, attr: &str) -> OdmResult<()> {
        let attributes = self.model.attributes();
        if attributes.contains(attr) || attributes.is_primary_key(attr) {
            Ok(())
        } else {
            Err(OdmError::UnknownAttribute {
                model: self.model.name().to_string(),
                attr: attr.to_string(),
            })
        }
    }

    pub(crate) fn assign_primary(&mut self, value: Bson) {
        let key = self.model.primary_key().to_string();
        self.attrs.insert(key, value);
    }

    /// Baselines and unset markers advance as soon as a translation is
    /// accepted, before the round trip
    pub(crate) fn apply_translation(&mut self, translation: &Translation) {
        self.prior_atomic = translation.prior_atomic.clone();
        for attr in &translation.cleared_unsets {
            self.unset_markers.remove(attr);
        }
    }

    pub(crate) fn restore_baselines(&mut self, prior_atomic: BTreeMap<String, Number>, unset_markers: BTreeSet<String>) {
        self.prior_atomic = prior_atomic;
        self.unset_markers = unset_markers;
    }

    /// State after a successful insert: the stored document is authoritative
    pub(crate) fn mark_inserted(&mut self, stored: Document) {
        self.attrs = stored;
        self.dirty.clear();
        self.prior_atomic.clear();
        self.unset_markers.clear();
    }

    /// State after a successful update. Baselines follow the stored values
    /// so the next delta starts from what the database holds.
    pub(crate) fn mark_updated(&mut self, stored: Document) {
        for (attr, baseline) in self.prior_atomic.iter_mut() {
            if let Some(number) = stored.get(attr).and_then(Number::from_bson) {
                *baseline = number;
            }
        }
        self.attrs = stored;
        self.dirty.clear();
        self.unset_markers.clear();
    }

    pub(crate) fn mark_removed(&mut self) {
        self.removed = true;
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.name())
            .field("attrs", &self.attrs)
            .field("dirty", &self.dirty)
            .field("prior_atomic", &self.prior_atomic)
            .field("unset_markers", &self.unset_markers)
            .field("errors", &self.errors)
            .field("removed", &self.removed)
            .finish()
    }
}
