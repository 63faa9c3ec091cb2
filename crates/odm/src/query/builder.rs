//! Query Builder - fluent filter/sort/limit builder with hydrating terminals

use std::sync::Arc;

use bson::{Bson, Document};
use tracing::debug;

use crate::backends::{DocumentCollection, FindAndModifyOptions, FindOptions};
use crate::error::{OdmError, OdmResult};
use crate::identifier::coerce_query;
use crate::model::{Instance, ModelDefinition};
use crate::update::coerce_document;

use super::Wrapped;

/// Instances, or raw documents with `skip_wrapping`
pub type Many = Wrapped<Vec<Instance>, Vec<Document>>;
pub type One = Wrapped<Option<Instance>, Option<Document>>;

/// Query against one model's collection.
///
/// Identifier fields in filters are coerced while the query is built; a
/// coercion failure is kept and reported by the terminal call.
#[derive(Debug)]
pub struct ModelQuery {
    model: Arc<ModelDefinition>,
    collection: Arc<dyn DocumentCollection>,
    filter: Document,
    options: FindOptions,
    skip_wrapping: bool,
    error: Option<OdmError>,
}

impl Clone for ModelQuery {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            collection: Arc::clone(&self.collection),
            filter: self.filter.clone(),
            options: self.options.clone(),
            skip_wrapping: self.skip_wrapping,
            error: self.error.clone(),
        }
    }
}

impl ModelQuery {
    pub fn new(model: Arc<ModelDefinition>, collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            model,
            collection,
            filter: Document::new(),
            options: FindOptions::default(),
            skip_wrapping: false,
            error: None,
        }
    }

    /// Merge `filter` into the query; later keys replace earlier ones
    pub fn filter(mut self, filter: Document) -> Self {
        match coerce_query(filter, self.model.attributes()) {
            Ok(coerced) => self.filter.extend(coerced),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Bson>) -> Self {
        let mut condition = Document::new();
        condition.insert(field, value.into());
        self.filter(condition)
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.options.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Projection of returned documents
    pub fn select(mut self, projection: Document) -> Self {
        self.options.projection = Some(projection);
        self
    }

    /// Hand back raw documents instead of instances
    pub fn skip_wrapping(mut self) -> Self {
        self.skip_wrapping = true;
        self
    }

    pub fn filter_document(&self) -> &Document {
        &self.filter
    }

    pub fn options(&self) -> &FindOptions {
        &self.options
    }

    pub async fn find(self) -> OdmResult<Many> {
        let filter = self.checked_filter()?;
        debug!("{}: query find {}", self.collection.name(), filter);
        let documents = self.collection.find(filter, self.options.clone()).await?;

        if self.skip_wrapping {
            return Ok(Wrapped::Raw(documents));
        }
        Ok(Wrapped::Model(
            documents.into_iter().map(|doc| self.model.hydrate(doc)).collect(),
        ))
    }

    pub async fn find_one(self) -> OdmResult<One> {
        let filter = self.checked_filter()?;
        debug!("{}: query find_one {}", self.collection.name(), filter);
        let document = self.collection.find_one(filter, self.options.clone()).await?;
        Ok(self.wrap_one(document))
    }

    /// Apply `update` to every match, returning how many were modified
    pub async fn update(self, update: Document) -> OdmResult<u64> {
        let filter = self.checked_filter()?;
        let update = self.coerce_update(update)?;
        debug!("{}: query update {} {}", self.collection.name(), filter, update);
        self.collection.update_many(filter, update).await
    }

    /// Update the first match and return it as it is afterwards
    pub async fn find_one_and_update(self, update: Document) -> OdmResult<One> {
        let filter = self.checked_filter()?;
        let update = self.coerce_update(update)?;
        let options = FindAndModifyOptions {
            sort: self.options.sort.clone(),
            ..FindAndModifyOptions::default()
        };

        debug!("{}: query find_one_and_update {} {}", self.collection.name(), filter, update);
        let document = self.collection.find_and_modify(filter, update, options).await?;
        Ok(self.wrap_one(document))
    }

    pub async fn find_one_and_remove(self) -> OdmResult<One> {
        let filter = self.checked_filter()?;
        debug!("{}: query find_one_and_remove {}", self.collection.name(), filter);
        let document = self
            .collection
            .find_and_remove(filter, self.options.sort.clone())
            .await?;
        Ok(self.wrap_one(document))
    }

    /// Distinct values are never wrapped
    pub async fn distinct(self, field: &str) -> OdmResult<Vec<Bson>> {
        let filter = self.checked_filter()?;
        self.collection.distinct(field, filter).await
    }

    pub async fn count(self) -> OdmResult<u64> {
        let filter = self.checked_filter()?;
        self.collection.count(filter).await
    }

    fn checked_filter(&self) -> OdmResult<Document> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.filter.clone()),
        }
    }

    /// Typed coercion for `$set` values; other operators pass through
    fn coerce_update(&self, mut update: Document) -> OdmResult<Document> {
        if let Ok(set) = update.get_document("$set") {
            let coerced = coerce_document(set.clone(), self.model.attributes())?;
            update.insert("$set", coerced);
        }
        Ok(update)
    }

    fn wrap_one(&self, document: Option<Document>) -> One {
        if self.skip_wrapping {
            Wrapped::Raw(document)
        } else {
            Wrapped::Model(document.map(|doc| self.model.hydrate(doc)))
        }
    }
}
