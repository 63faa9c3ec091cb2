//! CRUD Adapter - the only component that talks to a collection
//!
//! Translates model-level persistence calls into collection round trips and
//! maps results back into instances. Unique index violations come back from
//! the database as raw errors and are re-expressed as an attribute error
//! (`<field> has already been taken`) on the offending instance.

use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use tracing::{debug, info, warn};

use crate::backends::{DocumentCollection, FindAndModifyOptions, FindOptions, IndexOptions};
use crate::error::{OdmError, OdmResult, ValidationError};
use crate::identifier::{coerce_query, primary_key_filter};
use crate::model::{Instance, ModelDefinition, ID_FIELD};
use crate::query::{ModelQuery, Pipeline};
use crate::update::{coerce_document, translate};

/// What `find` / `remove` look up: a primary key or a filter document
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Id(Bson),
    Filter(Document),
}

impl Lookup {
    /// Null and empty text identify nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Lookup::Id(Bson::Null) => true,
            Lookup::Id(Bson::String(text)) => text.is_empty(),
            _ => false,
        }
    }
}

impl From<Document> for Lookup {
    fn from(filter: Document) -> Self {
        Lookup::Filter(filter)
    }
}

impl From<Bson> for Lookup {
    fn from(value: Bson) -> Self {
        match value {
            Bson::Document(filter) => Lookup::Filter(filter),
            other => Lookup::Id(other),
        }
    }
}

impl From<ObjectId> for Lookup {
    fn from(id: ObjectId) -> Self {
        Lookup::Id(Bson::ObjectId(id))
    }
}

impl From<&str> for Lookup {
    fn from(id: &str) -> Self {
        Lookup::Id(Bson::String(id.to_string()))
    }
}

impl From<String> for Lookup {
    fn from(id: String) -> Self {
        Lookup::Id(Bson::String(id))
    }
}

impl From<i32> for Lookup {
    fn from(id: i32) -> Self {
        Lookup::Id(Bson::Int32(id))
    }
}

impl From<i64> for Lookup {
    fn from(id: i64) -> Self {
        Lookup::Id(Bson::Int64(id))
    }
}

/// Field named by a duplicate key message.
///
/// Reads the text between the first `$` and the following `_1` of the
/// classic `index: db.coll.$email_1` shape, or between `index: ` and `_1`
/// of the newer `index: email_1` shape.
pub fn duplicate_key_field(message: &str) -> Option<String> {
    let candidate = match message.find('$') {
        Some(dollar) => &message[dollar + 1..],
        None => {
            let marker = "index: ";
            &message[message.find(marker)? + marker.len()..]
        }
    };
    let field = &candidate[..candidate.find("_1")?];

    if field.is_empty() || field.contains(char::is_whitespace) {
        None
    } else {
        Some(field.to_string())
    }
}

/// A model bound to a collection
#[derive(Debug, Clone)]
pub struct ModelAdapter {
    model: Arc<ModelDefinition>,
    collection: Arc<dyn DocumentCollection>,
    default_limit: Option<i64>,
}

impl ModelAdapter {
    pub fn new(model: Arc<ModelDefinition>, collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            model,
            collection,
            default_limit: None,
        }
    }

    pub fn with_default_limit(mut self, limit: Option<i64>) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn model(&self) -> &Arc<ModelDefinition> {
        &self.model
    }

    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    /// New unsaved instance
    pub fn create(&self, values: Document) -> OdmResult<Instance> {
        self.model.create(values)
    }

    pub fn hydrate(&self, stored: Document) -> Instance {
        self.model.hydrate(stored)
    }

    /// Every document matching `filter`; an empty vector means no match
    pub async fn all(&self, filter: Document, options: FindOptions) -> OdmResult<Vec<Instance>> {
        let filter = coerce_query(filter, self.model.attributes())?;
        let options = FindOptions {
            limit: options.limit.or(self.default_limit),
            ..options
        };

        debug!("{}: find {} {:?}", self.collection.name(), filter, options);
        let documents = self.collection.find(filter, options).await?;
        Ok(documents.into_iter().map(|doc| self.hydrate(doc)).collect())
    }

    /// One instance by primary key or filter.
    ///
    /// Empty lookups resolve to `None` without a round trip.
    pub async fn find(&self, lookup: impl Into<Lookup>, options: FindOptions) -> OdmResult<Option<Instance>> {
        let lookup = lookup.into();
        if lookup.is_empty() {
            return Ok(None);
        }

        let filter = self.lookup_filter(lookup)?;
        debug!("{}: find_one {}", self.collection.name(), filter);
        let found = self.collection.find_one(filter, options).await?;
        Ok(found.map(|doc| self.hydrate(doc)))
    }

    pub async fn get(&self, lookup: impl Into<Lookup>) -> OdmResult<Option<Instance>> {
        self.find(lookup, FindOptions::default()).await
    }

    /// Persist an instance and return its primary key.
    ///
    /// Instances that were saved before are updated instead.
    pub async fn save(&self, instance: &mut Instance) -> OdmResult<Bson> {
        if !instance.is_new() {
            self.update(instance).await?;
            return instance.primary().cloned().ok_or(OdmError::MissingPrimaryKey);
        }

        self.check_valid(instance)?;
        self.model.lifecycle().before_create(instance)?;
        ensure_valid(instance)?;
        self.assign_primary_key(instance)?;

        let document = match coerce_document(instance.to_document(), self.model.attributes()) {
            Ok(document) => document,
            Err(OdmError::Validation(error)) => return Err(reject(instance, error)),
            Err(other) => return Err(other),
        };

        debug!("{}: insert {}", self.collection.name(), document);
        let stored = match self.collection.insert(document).await {
            Ok(stored) => stored,
            Err(err) => return Err(self.translate_write_error(instance, err)),
        };

        instance.mark_inserted(stored);
        self.model.lifecycle().after_create(instance)?;
        instance.primary().cloned().ok_or(OdmError::MissingPrimaryKey)
    }

    /// Write the dirty attributes of a persisted instance.
    ///
    /// New and removed instances fail with `NotSaved` before any round trip.
    /// Nothing dirty means nothing to do: no hooks run and the database is
    /// not contacted.
    pub async fn update(&self, instance: &mut Instance) -> OdmResult<()> {
        if instance.is_new() || instance.is_removed() {
            return Err(OdmError::NotSaved(self.model.name().to_string()));
        }
        if !instance.is_dirty() {
            return Ok(());
        }

        self.check_valid(instance)?;
        self.model.lifecycle().before_update(instance)?;
        ensure_valid(instance)?;

        let translation = translate(
            instance.dirty(),
            self.model.attributes(),
            instance.prior_atomic(),
            instance.unset_markers(),
        )?;
        if let Some(error) = translation.first_error() {
            for attr_error in &translation.errors {
                instance.error(&attr_error.attr, attr_error.message.clone());
            }
            warn!("{}: update rejected: {}", self.model.name(), error);
            return Err(OdmError::Validation(error.clone()));
        }

        let filter = match instance.primary() {
            Some(primary) => primary_key_filter(self.model.attributes(), primary)?,
            None => return Err(OdmError::MissingPrimaryKey),
        };
        let update = translation.mutation.to_update_document();

        let baselines = instance.prior_atomic().clone();
        let markers = instance.unset_markers().clone();
        instance.apply_translation(&translation);

        if update.is_empty() {
            let current = instance.to_document();
            instance.mark_updated(current);
            return Ok(());
        }

        debug!("{}: find_and_modify {} {}", self.collection.name(), filter, update);
        let result = self
            .collection
            .find_and_modify(filter, update, FindAndModifyOptions::default())
            .await;

        match result {
            Ok(Some(stored)) => {
                instance.mark_updated(stored);
                self.model.lifecycle().after_update(instance)?;
                Ok(())
            }
            Ok(None) => {
                instance.restore_baselines(baselines, markers);
                Err(OdmError::NotFound(self.collection.name().to_string()))
            }
            Err(err) => {
                instance.restore_baselines(baselines, markers);
                Err(self.translate_write_error(instance, err))
            }
        }
    }

    /// Remove documents; without a lookup, the instance's own document.
    ///
    /// Hooks run and the instance is flagged removed only when its own
    /// document was deleted. Any other lookup behaves like `remove_all`.
    pub async fn remove(&self, instance: &mut Instance, lookup: Option<Lookup>) -> OdmResult<u64> {
        let own = match instance.primary() {
            Some(primary) => Some(primary_key_filter(self.model.attributes(), primary)?),
            None => None,
        };
        let filter = match lookup {
            Some(lookup) => self.lookup_filter(lookup)?,
            None => own.clone().ok_or_else(|| OdmError::NotSaved(self.model.name().to_string()))?,
        };

        if own.as_ref() != Some(&filter) {
            debug!("{}: remove {}", self.collection.name(), filter);
            return self.collection.remove(filter).await;
        }

        self.model.lifecycle().before_remove(instance)?;
        debug!("{}: remove {}", self.collection.name(), filter);
        let removed = self.collection.remove(filter).await?;

        if removed > 0 {
            instance.mark_removed();
            self.model.lifecycle().after_remove(instance)?;
        }
        Ok(removed)
    }

    /// Remove every matching document, returning how many were removed
    pub async fn remove_all(&self, filter: Document) -> OdmResult<u64> {
        let filter = coerce_query(filter, self.model.attributes())?;
        debug!("{}: remove {}", self.collection.name(), filter);
        self.collection.remove(filter).await
    }

    pub async fn count(&self, filter: Document) -> OdmResult<u64> {
        let filter = coerce_query(filter, self.model.attributes())?;
        self.collection.count(filter).await
    }

    /// Create an index on this model's collection
    pub async fn index(&self, keys: Document, options: IndexOptions) -> OdmResult<String> {
        let name = self.collection.ensure_index(keys, options).await?;
        info!("{}: ensured index {}", self.collection.name(), name);
        Ok(name)
    }

    /// Unique, sparse index for every unique attribute
    pub async fn ensure_indexes(&self) -> OdmResult<Vec<String>> {
        let fields: Vec<String> = self
            .model
            .attributes()
            .unique_attributes()
            .map(|descriptor| descriptor.name.clone())
            .filter(|name| name.as_str() != ID_FIELD)
            .collect();

        let mut names = Vec::with_capacity(fields.len());
        for field in fields {
            let mut keys = Document::new();
            keys.insert(field, 1);
            names.push(self.index(keys, IndexOptions::unique_sparse()).await?);
        }
        Ok(names)
    }

    /// Query builder whose results come back as instances
    pub fn query(&self) -> ModelQuery {
        ModelQuery::new(Arc::clone(&self.model), Arc::clone(&self.collection))
    }

    /// Aggregation pipeline whose results come back as instances
    pub fn aggregate(&self) -> Pipeline {
        Pipeline::new(Arc::clone(&self.model), Arc::clone(&self.collection))
    }

    fn lookup_filter(&self, lookup: Lookup) -> OdmResult<Document> {
        match lookup {
            Lookup::Id(id) => primary_key_filter(self.model.attributes(), &id),
            Lookup::Filter(filter) => coerce_query(filter, self.model.attributes()),
        }
    }

    fn check_valid(&self, instance: &mut Instance) -> OdmResult<()> {
        instance.validate();
        ensure_valid(instance)
    }

    /// The `_id` is left to the database; other identifier keys are generated
    fn assign_primary_key(&self, instance: &mut Instance) -> OdmResult<()> {
        if instance.primary().is_some() || self.model.primary_key() == ID_FIELD {
            return Ok(());
        }
        if self.model.attributes().primary_key_is_identifier() {
            instance.assign_primary(Bson::ObjectId(ObjectId::new()));
            Ok(())
        } else {
            Err(OdmError::MissingPrimaryKey)
        }
    }

    fn translate_write_error(&self, instance: &mut Instance, err: OdmError) -> OdmError {
        let field = match &err {
            OdmError::Database(db) if db.is_duplicate_key() => duplicate_key_field(&db.message),
            _ => None,
        };

        match field {
            Some(field) => {
                let error = ValidationError::new(&field, format!("{} has already been taken", field));
                warn!("{}: {}", self.model.name(), error);
                reject(instance, error)
            }
            None => err,
        }
    }
}

fn ensure_valid(instance: &Instance) -> OdmResult<()> {
    match instance.first_error() {
        Some(error) => Err(OdmError::Validation(error.clone())),
        None => Ok(()),
    }
}

/// Register `error` on the instance and turn it into the failure result
fn reject(instance: &mut Instance, error: ValidationError) -> OdmError {
    instance.error(&error.attr, error.message.clone());
    OdmError::Validation(error)
}
