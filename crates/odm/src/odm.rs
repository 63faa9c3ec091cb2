//! Binding entry point
//!
//! `Odm` owns a database handle and binds model definitions to collections,
//! creating the unique indexes their attributes declare.

use std::sync::Arc;

use tracing::info;

use crate::adapter::ModelAdapter;
use crate::backends::DocumentDatabase;
use crate::config::OdmConfig;
use crate::error::OdmResult;
use crate::model::ModelDefinition;

#[derive(Debug, Clone)]
pub struct Odm {
    database: Arc<dyn DocumentDatabase>,
    config: OdmConfig,
}

impl Odm {
    pub fn new(database: Arc<dyn DocumentDatabase>) -> Self {
        Self::with_config(database, OdmConfig::default())
    }

    pub fn with_config(database: Arc<dyn DocumentDatabase>, config: OdmConfig) -> Self {
        Self { database, config }
    }

    /// Connect to MongoDB with a validated configuration
    #[cfg(feature = "mongodb")]
    pub async fn connect(config: OdmConfig) -> OdmResult<Self> {
        use crate::config::EnvConfig;

        config.validate()?;
        let database = crate::backends::mongo::MongoDatabase::connect(&config).await?;
        Ok(Self::with_config(Arc::new(database), config))
    }

    pub fn database(&self) -> &Arc<dyn DocumentDatabase> {
        &self.database
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    /// Bind a model to the collection named after it
    pub async fn bind(&self, model: Arc<ModelDefinition>) -> OdmResult<ModelAdapter> {
        let collection = model.name().to_string();
        self.bind_to(model, &collection).await
    }

    /// Bind a model to an explicitly named collection
    pub async fn bind_to(&self, model: Arc<ModelDefinition>, collection: &str) -> OdmResult<ModelAdapter> {
        let adapter = ModelAdapter::new(model, self.database.collection(collection))
            .with_default_limit(self.config.default_limit);

        if self.config.ensure_indexes {
            adapter.ensure_indexes().await?;
        }

        info!(
            "Bound model {} to {}.{}",
            adapter.model().name(),
            self.database.name(),
            collection
        );
        Ok(adapter)
    }
}
