//! MongoDB backend on the official driver

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document};
use mongodb::error::{Error as DriverError, ErrorKind, WriteFailure};
use mongodb::options::{
    Acknowledgment, ClientOptions, DatabaseOptions, FindOneAndDeleteOptions, FindOneAndUpdateOptions,
    FindOneOptions, FindOptions as DriverFindOptions, IndexOptions as DriverIndexOptions, ReturnDocument,
    WriteConcern as DriverWriteConcern,
};
use mongodb::{Client, Collection, Database, IndexModel};
use tracing::info;

use super::core::{DocumentCollection, DocumentDatabase, FindAndModifyOptions, FindOptions, IndexOptions};
use crate::config::{OdmConfig, WriteConcern};
use crate::error::{DatabaseError, OdmError, OdmResult};

impl From<DriverError> for OdmError {
    fn from(err: DriverError) -> Self {
        let code = match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => Some(concern.code),
            ErrorKind::Command(command) => Some(command.code),
            _ => None,
        };

        // The server message is what duplicate key parsing needs
        let message = match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(write)) => write.message.clone(),
            ErrorKind::Command(command) => command.message.clone(),
            _ => err.to_string(),
        };

        OdmError::Database(DatabaseError { code, message })
    }
}

fn write_concern(concern: WriteConcern) -> DriverWriteConcern {
    let mut driver = DriverWriteConcern::default();
    driver.w = Some(match concern {
        WriteConcern::Nodes(nodes) => Acknowledgment::Nodes(nodes),
        WriteConcern::Majority => Acknowledgment::Majority,
    });
    driver
}

/// A MongoDB database
#[derive(Debug, Clone)]
pub struct MongoDatabase {
    name: String,
    database: Database,
}

impl MongoDatabase {
    pub async fn connect(config: &OdmConfig) -> OdmResult<Self> {
        let name = config.database_name().ok_or_else(|| {
            OdmError::Configuration(format!("No database name in '{}'", config.url))
        })?;

        let mut client_options = ClientOptions::parse(&config.url).await?;
        client_options.app_name = Some("elif-odm".to_string());
        let client = Client::with_options(client_options)?;

        let mut database_options = DatabaseOptions::default();
        database_options.write_concern = Some(write_concern(config.write_concern));
        let database = client.database_with_options(&name, database_options);

        info!("Connected to MongoDB database {} (w: {})", name, config.write_concern);
        Ok(Self { name, database })
    }

    pub fn from_database(database: Database) -> Self {
        Self {
            name: database.name().to_string(),
            database,
        }
    }
}

impl DocumentDatabase for MongoDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn collection(&self, name: &str) -> Arc<dyn DocumentCollection> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            collection: self.database.collection::<Document>(name),
        })
    }
}

/// A MongoDB collection of raw documents
#[derive(Debug, Clone)]
pub struct MongoCollection {
    name: String,
    collection: Collection<Document>,
}

async fn collect(mut cursor: mongodb::Cursor<Document>) -> OdmResult<Vec<Document>> {
    let mut documents = Vec::new();
    while cursor.advance().await? {
        documents.push(cursor.deserialize_current()?);
    }
    Ok(documents)
}

#[async_trait]
impl DocumentCollection for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert(&self, mut document: Document) -> OdmResult<Document> {
        let result = self.collection.insert_one(&document, None).await?;
        if !document.contains_key("_id") {
            let mut stored = Document::new();
            stored.insert("_id", result.inserted_id);
            stored.extend(document);
            document = stored;
        }
        Ok(document)
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> OdmResult<Option<Document>> {
        let mut driver_options = FindOneAndUpdateOptions::default();
        driver_options.sort = options.sort;
        driver_options.upsert = Some(options.upsert);
        driver_options.return_document = Some(if options.return_new {
            ReturnDocument::After
        } else {
            ReturnDocument::Before
        });

        Ok(self
            .collection
            .find_one_and_update(filter, update, driver_options)
            .await?)
    }

    async fn find_and_remove(&self, filter: Document, sort: Option<Document>) -> OdmResult<Option<Document>> {
        let mut driver_options = FindOneAndDeleteOptions::default();
        driver_options.sort = sort;
        Ok(self.collection.find_one_and_delete(filter, driver_options).await?)
    }

    async fn remove(&self, filter: Document) -> OdmResult<u64> {
        Ok(self.collection.delete_many(filter, None).await?.deleted_count)
    }

    async fn find(&self, filter: Document, options: FindOptions) -> OdmResult<Vec<Document>> {
        let mut driver_options = DriverFindOptions::default();
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.limit = options.limit.filter(|limit| *limit != 0);
        driver_options.projection = options.projection;

        let cursor = self.collection.find(filter, driver_options).await?;
        collect(cursor).await
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> OdmResult<Option<Document>> {
        let mut driver_options = FindOneOptions::default();
        driver_options.sort = options.sort;
        driver_options.skip = options.skip;
        driver_options.projection = options.projection;

        Ok(self.collection.find_one(filter, driver_options).await?)
    }

    async fn ensure_index(&self, keys: Document, options: IndexOptions) -> OdmResult<String> {
        let mut driver_options = DriverIndexOptions::default();
        driver_options.unique = Some(options.unique);
        driver_options.sparse = Some(options.sparse);
        driver_options.name = options.name;

        let model = IndexModel::builder().keys(keys).options(driver_options).build();
        Ok(self.collection.create_index(model, None).await?.index_name)
    }

    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<u64> {
        Ok(self.collection.update_many(filter, update, None).await?.modified_count)
    }

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        Ok(self.collection.distinct(field, filter, None).await?)
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        let cursor = self.collection.aggregate(pipeline, None).await?;
        collect(cursor).await
    }

    async fn count(&self, filter: Document) -> OdmResult<u64> {
        Ok(self.collection.count_documents(filter, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_concern_mapping() {
        assert_eq!(write_concern(WriteConcern::Nodes(1)).w, Some(Acknowledgment::Nodes(1)));
        assert_eq!(write_concern(WriteConcern::Majority).w, Some(Acknowledgment::Majority));
    }
}
