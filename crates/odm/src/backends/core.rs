//! Core Database Backend Traits
//!
//! The adapter only talks to the database through these traits. Each method
//! is a single round trip; retries, timeouts and connection handling belong
//! to the client behind the implementation.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::error::OdmResult;

/// Options of a `find` / `find_one` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Options of a `find_and_modify` call
#[derive(Debug, Clone, PartialEq)]
pub struct FindAndModifyOptions {
    pub sort: Option<Document>,
    /// Return the document as it is after the update
    pub return_new: bool,
    pub upsert: bool,
}

impl Default for FindAndModifyOptions {
    fn default() -> Self {
        Self {
            sort: None,
            return_new: true,
            upsert: false,
        }
    }
}

/// Options of an index build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    pub unique: bool,
    /// Documents missing the indexed field are left out of the index
    pub sparse: bool,
    pub name: Option<String>,
}

impl IndexOptions {
    /// Options used for unique attributes
    pub fn unique_sparse() -> Self {
        Self {
            unique: true,
            sparse: true,
            name: None,
        }
    }
}

/// Conventional index name: `field_1`, `other_-1`, joined by `_`
pub fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| match direction {
            Bson::Int32(d) => format!("{}_{}", field, d),
            Bson::Int64(d) => format!("{}_{}", field, d),
            Bson::Double(d) => format!("{}_{}", field, *d as i64),
            other => format!("{}_{}", field, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// A collection of documents
#[async_trait]
pub trait DocumentCollection: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Insert one document and return it as stored (with its `_id`)
    async fn insert(&self, document: Document) -> OdmResult<Document>;

    /// Update the first document matching `filter`.
    ///
    /// Returns `None` when nothing matched and no upsert happened.
    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> OdmResult<Option<Document>>;

    /// Remove the first document matching `filter` and return it
    async fn find_and_remove(&self, filter: Document, sort: Option<Document>) -> OdmResult<Option<Document>>;

    /// Remove every matching document; returns how many were removed
    async fn remove(&self, filter: Document) -> OdmResult<u64>;

    async fn find(&self, filter: Document, options: FindOptions) -> OdmResult<Vec<Document>>;

    async fn find_one(&self, filter: Document, options: FindOptions) -> OdmResult<Option<Document>>;

    /// Create an index unless it already exists; returns its name
    async fn ensure_index(&self, keys: Document, options: IndexOptions) -> OdmResult<String>;

    /// Apply `update` to every matching document; returns how many changed
    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<u64>;

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>>;

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>>;

    async fn count(&self, filter: Document) -> OdmResult<u64>;
}

/// A database: a namespace of collections
pub trait DocumentDatabase: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection>;
}
