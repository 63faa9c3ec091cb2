//! Aggregation pipeline with hydrating `exec`

use std::sync::Arc;

use bson::{doc, Bson, Document};
use tracing::debug;

use crate::backends::DocumentCollection;
use crate::error::{OdmError, OdmResult};
use crate::identifier::coerce_query;
use crate::model::{Instance, ModelDefinition};

use super::Wrapped;

/// Stages are kept in the order they are added
#[derive(Debug, Clone)]
pub struct Pipeline {
    model: Arc<ModelDefinition>,
    collection: Arc<dyn DocumentCollection>,
    stages: Vec<Document>,
    skip_wrapping: bool,
    error: Option<OdmError>,
}

impl Pipeline {
    pub fn new(model: Arc<ModelDefinition>, collection: Arc<dyn DocumentCollection>) -> Self {
        Self {
            model,
            collection,
            stages: Vec::new(),
            skip_wrapping: false,
            error: None,
        }
    }

    /// `$match`, with identifier fields coerced
    pub fn match_(mut self, filter: Document) -> Self {
        match coerce_query(filter, self.model.attributes()) {
            Ok(filter) => self.stages.push(doc! { "$match": filter }),
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    /// `$group` by `id` (an expression such as `"$team"` or `Bson::Null`)
    pub fn group(self, id: impl Into<Bson>, accumulators: Document) -> Self {
        let mut group = doc! { "_id": id.into() };
        group.extend(accumulators);
        self.stage(doc! { "$group": group })
    }

    pub fn sort(self, sort: Document) -> Self {
        self.stage(doc! { "$sort": sort })
    }

    pub fn skip(self, skip: i64) -> Self {
        self.stage(doc! { "$skip": skip })
    }

    pub fn limit(self, limit: i64) -> Self {
        self.stage(doc! { "$limit": limit })
    }

    pub fn project(self, projection: Document) -> Self {
        self.stage(doc! { "$project": projection })
    }

    pub fn count(self, field: &str) -> Self {
        self.stage(doc! { "$count": field })
    }

    /// Append a raw stage
    pub fn stage(mut self, stage: Document) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn skip_wrapping(mut self) -> Self {
        self.skip_wrapping = true;
        self
    }

    pub fn stages(&self) -> &[Document] {
        &self.stages
    }

    pub async fn exec(self) -> OdmResult<Wrapped<Vec<Instance>, Vec<Document>>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        debug!("{}: aggregate {:?}", self.collection.name(), self.stages);
        let documents = self.collection.aggregate(self.stages).await?;

        if self.skip_wrapping {
            Ok(Wrapped::Raw(documents))
        } else {
            Ok(Wrapped::Model(
                documents.into_iter().map(|doc| self.model.hydrate(doc)).collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::InMemoryDatabase;
    use crate::backends::DocumentDatabase;
    use crate::model::AttributeDescriptor;

    fn pipeline() -> (Pipeline, Arc<dyn DocumentCollection>) {
        let model = ModelDefinition::builder("score")
            .attr(AttributeDescriptor::new("_id"))
            .attr(AttributeDescriptor::new("team"))
            .attr(AttributeDescriptor::new("points"))
            .build();
        let collection = InMemoryDatabase::new("game").collection("scores");
        (Pipeline::new(model, Arc::clone(&collection)), collection)
    }

    #[test]
    fn test_stage_order() {
        let (pipeline, _) = pipeline();
        let pipeline = pipeline
            .match_(doc! { "team": "red" })
            .group("$team", doc! { "total": { "$sum": "$points" } })
            .sort(doc! { "total": -1 })
            .limit(1);

        let names: Vec<&str> = pipeline
            .stages()
            .iter()
            .filter_map(|stage| stage.keys().next().map(String::as_str))
            .collect();
        assert_eq!(names, vec!["$match", "$group", "$sort", "$limit"]);
    }

    #[tokio::test]
    async fn test_exec_wraps_group_results() {
        let (pipeline, collection) = pipeline();
        for (team, points) in [("red", 3), ("blue", 4), ("red", 5)] {
            collection.insert(doc! { "team": team, "points": points }).await.unwrap();
        }

        let grouped = pipeline
            .clone()
            .group("$team", doc! { "total": { "$sum": "$points" } })
            .sort(doc! { "total": -1 })
            .exec()
            .await
            .unwrap()
            .into_model()
            .unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].get_str("_id"), Some("red"));
        assert_eq!(grouped[0].get("total"), Some(&Bson::Int32(8)));

        let raw = pipeline.count("n").skip_wrapping().exec().await.unwrap();
        assert_eq!(raw.into_raw().unwrap(), vec![doc! { "n": 3 }]);
    }
}
