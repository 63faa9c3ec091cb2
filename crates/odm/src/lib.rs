//! # elif-odm: Document Database Layer for elif.rs
//!
//! Binds models (attribute definitions, validation, dirty tracking, change
//! events) to a document database. Saving a mutated instance sends only the
//! fields that changed, with atomic counters written as `$inc` deltas;
//! query and aggregation results come back as model instances.
//!
//! ```ignore
//! let odm = Odm::new(Arc::new(InMemoryDatabase::new("app")));
//! let users = odm.bind(user_model).await?;
//!
//! let mut user = users.create(doc! { "email": "jimmy@example.com", "visits": 1 })?;
//! users.save(&mut user).await?;
//!
//! user.set("visits", 2)?;
//! users.update(&mut user).await?; // { "$inc": { "visits": 1 } }
//! ```

pub mod adapter;
pub mod backends;
pub mod config;
pub mod error;
pub mod event_error;
pub mod events;
pub mod identifier;
pub mod logging;
pub mod model;
pub mod observers;
pub mod odm;
pub mod query;
pub mod update;

pub use adapter::{duplicate_key_field, Lookup, ModelAdapter};
pub use backends::{
    DocumentCollection, DocumentDatabase, FindAndModifyOptions, FindOptions, InMemoryDatabase, IndexOptions,
};
pub use config::{EnvConfig, OdmConfig, WriteConcern};
pub use error::{DatabaseError, OdmError, OdmResult, ValidationError};
pub use event_error::EventError;
pub use events::{ChangeEvent, ModelObserver};
pub use logging::{init_logging, LoggingConfig};
pub use model::{AttrType, AttributeDescriptor, Instance, ModelBuilder, ModelDefinition};
pub use odm::Odm;
pub use query::{ModelQuery, Pipeline, Wrapped};
pub use update::{translate, MutationDocument, Number, Translation};

#[cfg(feature = "mongodb")]
pub use backends::MongoDatabase;
