//! In-process document store
//!
//! Implements the backend traits over plain vectors of documents guarded by
//! a lock per collection. It reports unique index violations exactly like a
//! server does (code 11000 and the classic `E11000` message), which makes it
//! suitable for tests and for embedding.

pub mod aggregate;
pub mod filter;
pub mod update;

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use dashmap::DashMap;

use self::filter::{
    compare_by, get_path, is_operator_document, matches, parse_sort, project, sort_documents, values_equal,
};
use self::update::{apply_update, set_path};
use crate::backends::core::{
    index_name, DocumentCollection, DocumentDatabase, FindAndModifyOptions, FindOptions, IndexOptions,
};
use crate::error::{DatabaseError, OdmError, OdmResult};
use crate::model::ID_FIELD;

const DUPLICATE_KEY: i32 = 11000;

/// A database of in-memory collections, created on first use
#[derive(Debug)]
pub struct InMemoryDatabase {
    name: String,
    collections: DashMap<String, Arc<InMemoryCollection>>,
}

impl InMemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: DashMap::new(),
        }
    }

    /// The concrete collection behind [`DocumentDatabase::collection`]
    pub fn memory_collection(&self, name: &str) -> Arc<InMemoryCollection> {
        self.collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryCollection::new(&self.name, name)))
            .value()
            .clone()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new("test")
    }
}

impl DocumentDatabase for InMemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        self.memory_collection(name)
    }
}

#[derive(Debug, Clone)]
struct IndexSpec {
    name: String,
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
}

#[derive(Debug, Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn first_match(&self, filter: &Document, sort: Option<&Document>) -> OdmResult<Option<usize>> {
        let mut candidates = Vec::new();
        for (index, doc) in self.documents.iter().enumerate() {
            if matches(doc, filter)? {
                candidates.push(index);
            }
        }
        if let Some(sort) = sort {
            let keys = parse_sort(sort)?;
            candidates.sort_by(|a, b| compare_by(&self.documents[*a], &self.documents[*b], &keys));
        }
        Ok(candidates.first().copied())
    }

    /// Reject `candidate` if it collides with a stored document other than
    /// the one at `skip`
    fn check_unique(&self, namespace: &str, candidate: &Document, skip: Option<usize>) -> OdmResult<()> {
        if let Some(id) = candidate.get(ID_FIELD) {
            let taken = self
                .documents
                .iter()
                .enumerate()
                .any(|(i, doc)| Some(i) != skip && doc.get(ID_FIELD).map(|other| values_equal(other, id)).unwrap_or(false));
            if taken {
                return Err(duplicate_key(namespace, "_id_", &[Some(id)]));
            }
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            check_index(&self.documents, namespace, index, candidate, skip)?;
        }
        Ok(())
    }

    fn insert(&mut self, namespace: &str, document: Document) -> OdmResult<Document> {
        let mut stored = Document::new();
        let id = document
            .get(ID_FIELD)
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        stored.insert(ID_FIELD, id);
        for (field, value) in document {
            if field != ID_FIELD {
                stored.insert(field, value);
            }
        }

        self.check_unique(namespace, &stored, None)?;
        self.documents.push(stored.clone());
        Ok(stored)
    }
}

fn check_index(
    documents: &[Document],
    namespace: &str,
    index: &IndexSpec,
    candidate: &Document,
    skip: Option<usize>,
) -> OdmResult<()> {
    let values: Vec<Option<&Bson>> = index.fields.iter().map(|field| get_path(candidate, field)).collect();
    if index.sparse && values.iter().all(Option::is_none) {
        return Ok(());
    }

    let collides = documents.iter().enumerate().any(|(i, doc)| {
        if Some(i) == skip {
            return false;
        }
        let others: Vec<Option<&Bson>> = index.fields.iter().map(|field| get_path(doc, field)).collect();
        if index.sparse && others.iter().all(Option::is_none) {
            return false;
        }
        values.iter().zip(others.iter()).all(|(mine, theirs)| {
            values_equal(mine.unwrap_or(&Bson::Null), theirs.unwrap_or(&Bson::Null))
        })
    });

    if collides {
        Err(duplicate_key(namespace, &index.name, &values))
    } else {
        Ok(())
    }
}

fn duplicate_key(namespace: &str, index: &str, values: &[Option<&Bson>]) -> OdmError {
    let key = values
        .iter()
        .map(|value| format!(": {}", value.unwrap_or(&Bson::Null)))
        .collect::<Vec<_>>()
        .join(", ");
    OdmError::Database(DatabaseError::with_code(
        DUPLICATE_KEY,
        format!(
            "E11000 duplicate key error index: {}.${}  dup key: {{ {} }}",
            namespace, index, key
        ),
    ))
}

/// A collection held in memory
#[derive(Debug)]
pub struct InMemoryCollection {
    name: String,
    namespace: String,
    state: RwLock<CollectionState>,
}

impl InMemoryCollection {
    pub fn new(database: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: format!("{}.{}", database, name),
            state: RwLock::new(CollectionState::default()),
        }
    }

    /// Names of the secondary indexes, in creation order
    pub fn index_names(&self) -> OdmResult<Vec<String>> {
        Ok(self.read()?.indexes.iter().map(|index| index.name.clone()).collect())
    }

    pub fn len(&self) -> OdmResult<usize> {
        Ok(self.read()?.documents.len())
    }

    pub fn is_empty(&self) -> OdmResult<bool> {
        Ok(self.read()?.documents.is_empty())
    }

    fn read(&self) -> OdmResult<RwLockReadGuard<'_, CollectionState>> {
        self.state
            .read()
            .map_err(|_| OdmError::database(format!("collection '{}' lock poisoned", self.name)))
    }

    fn write(&self) -> OdmResult<RwLockWriteGuard<'_, CollectionState>> {
        self.state
            .write()
            .map_err(|_| OdmError::database(format!("collection '{}' lock poisoned", self.name)))
    }

    fn select(&self, filter: &Document, options: &FindOptions) -> OdmResult<Vec<Document>> {
        let state = self.read()?;
        let mut selected = Vec::new();
        for doc in &state.documents {
            if matches(doc, filter)? {
                selected.push(doc.clone());
            }
        }
        drop(state);

        if let Some(sort) = &options.sort {
            sort_documents(&mut selected, sort)?;
        }
        let skip = options.skip.unwrap_or(0) as usize;
        let mut selected: Vec<Document> = selected.into_iter().skip(skip).collect();
        // zero means no limit, a negative limit is read as its magnitude
        if let Some(limit) = options.limit.filter(|limit| *limit != 0) {
            selected.truncate(limit.unsigned_abs() as usize);
        }
        if let Some(projection) = &options.projection {
            selected = selected
                .iter()
                .map(|doc| project(doc, projection))
                .collect::<OdmResult<_>>()?;
        }
        Ok(selected)
    }
}

#[async_trait]
impl DocumentCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, document: Document) -> OdmResult<Document> {
        self.write()?.insert(&self.namespace, document)
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> OdmResult<Option<Document>> {
        let mut state = self.write()?;

        match state.first_match(&filter, options.sort.as_ref())? {
            Some(index) => {
                let before = state.documents[index].clone();
                let mut after = before.clone();
                apply_update(&mut after, &update)?;
                state.check_unique(&self.namespace, &after, Some(index))?;
                state.documents[index] = after.clone();
                Ok(Some(if options.return_new { after } else { before }))
            }
            None if options.upsert => {
                let mut seed = Document::new();
                for (field, value) in &filter {
                    let is_condition = matches!(value, Bson::Document(inner) if is_operator_document(inner));
                    if !field.starts_with('$') && !is_condition {
                        set_path(&mut seed, field, value.clone())?;
                    }
                }
                apply_update(&mut seed, &update)?;
                let stored = state.insert(&self.namespace, seed)?;
                Ok(if options.return_new { Some(stored) } else { None })
            }
            None => Ok(None),
        }
    }

    async fn find_and_remove(&self, filter: Document, sort: Option<Document>) -> OdmResult<Option<Document>> {
        let mut state = self.write()?;
        match state.first_match(&filter, sort.as_ref())? {
            Some(index) => Ok(Some(state.documents.remove(index))),
            None => Ok(None),
        }
    }

    async fn remove(&self, filter: Document) -> OdmResult<u64> {
        let mut state = self.write()?;

        let mut flags = Vec::with_capacity(state.documents.len());
        for doc in &state.documents {
            flags.push(matches(doc, &filter)?);
        }
        let before = state.documents.len();
        let mut flags = flags.into_iter();
        state.documents.retain(|_| !flags.next().unwrap_or(false));
        Ok((before - state.documents.len()) as u64)
    }

    async fn find(&self, filter: Document, options: FindOptions) -> OdmResult<Vec<Document>> {
        self.select(&filter, &options)
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> OdmResult<Option<Document>> {
        let options = FindOptions {
            limit: Some(1),
            ..options
        };
        Ok(self.select(&filter, &options)?.into_iter().next())
    }

    async fn ensure_index(&self, keys: Document, options: IndexOptions) -> OdmResult<String> {
        let name = options.name.clone().unwrap_or_else(|| index_name(&keys));
        let mut state = self.write()?;
        if state.indexes.iter().any(|index| index.name == name) {
            return Ok(name);
        }

        let spec = IndexSpec {
            name: name.clone(),
            fields: keys.keys().cloned().collect(),
            unique: options.unique,
            sparse: options.sparse,
        };
        if spec.unique {
            for (position, doc) in state.documents.iter().enumerate() {
                check_index(&state.documents[..position], &self.namespace, &spec, doc, None)?;
            }
        }

        tracing::debug!("Created index {} on {}", name, self.namespace);
        state.indexes.push(spec);
        Ok(name)
    }

    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<u64> {
        let mut state = self.write()?;
        let mut modified = 0;

        for index in 0..state.documents.len() {
            if !matches(&state.documents[index], &filter)? {
                continue;
            }
            let mut updated = state.documents[index].clone();
            apply_update(&mut updated, &update)?;
            if updated != state.documents[index] {
                state.check_unique(&self.namespace, &updated, Some(index))?;
                state.documents[index] = updated;
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        let state = self.read()?;
        let mut values: Vec<Bson> = Vec::new();
        let mut push = |value: &Bson| {
            if !values.iter().any(|seen| values_equal(seen, value)) {
                values.push(value.clone());
            }
        };

        for doc in &state.documents {
            if !matches(doc, &filter)? {
                continue;
            }
            match get_path(doc, field) {
                Some(Bson::Array(items)) => items.iter().for_each(&mut push),
                Some(value) => push(value),
                None => {}
            }
        }
        Ok(values)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        let documents = self.read()?.documents.clone();
        aggregate::run_pipeline(documents, &pipeline)
    }

    async fn count(&self, filter: Document) -> OdmResult<u64> {
        let state = self.read()?;
        let mut count = 0;
        for doc in &state.documents {
            if matches(doc, &filter)? {
                count += 1;
            }
        }
        Ok(count)
    }
}
