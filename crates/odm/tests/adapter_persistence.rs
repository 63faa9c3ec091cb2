use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use elif_odm::backends::memory::InMemoryCollection;
use elif_odm::{
    AttrType, AttributeDescriptor, DocumentCollection, DocumentDatabase, EventError, FindAndModifyOptions,
    FindOptions, InMemoryDatabase, IndexOptions, Instance, Lookup, ModelAdapter, ModelDefinition, ModelObserver,
    Odm, OdmError, OdmResult,
};

/// Collection wrapper recording every update document it is sent
#[derive(Debug)]
struct RecordingCollection {
    inner: Arc<InMemoryCollection>,
    round_trips: AtomicUsize,
    updates: Mutex<Vec<Document>>,
}

impl RecordingCollection {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(InMemoryCollection::new("app", name)),
            round_trips: AtomicUsize::new(0),
            updates: Mutex::new(Vec::new()),
        })
    }

    fn round_trips(&self) -> usize {
        self.round_trips.load(Ordering::SeqCst)
    }

    fn last_update(&self) -> Option<Document> {
        self.updates.lock().unwrap().last().cloned()
    }

    fn hit(&self) {
        self.round_trips.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentCollection for RecordingCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn insert(&self, document: Document) -> OdmResult<Document> {
        self.hit();
        self.inner.insert(document).await
    }

    async fn find_and_modify(
        &self,
        filter: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> OdmResult<Option<Document>> {
        self.hit();
        self.updates.lock().unwrap().push(update.clone());
        self.inner.find_and_modify(filter, update, options).await
    }

    async fn find_and_remove(&self, filter: Document, sort: Option<Document>) -> OdmResult<Option<Document>> {
        self.hit();
        self.inner.find_and_remove(filter, sort).await
    }

    async fn remove(&self, filter: Document) -> OdmResult<u64> {
        self.hit();
        self.inner.remove(filter).await
    }

    async fn find(&self, filter: Document, options: FindOptions) -> OdmResult<Vec<Document>> {
        self.hit();
        self.inner.find(filter, options).await
    }

    async fn find_one(&self, filter: Document, options: FindOptions) -> OdmResult<Option<Document>> {
        self.hit();
        self.inner.find_one(filter, options).await
    }

    async fn ensure_index(&self, keys: Document, options: IndexOptions) -> OdmResult<String> {
        self.hit();
        self.inner.ensure_index(keys, options).await
    }

    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<u64> {
        self.hit();
        self.inner.update_many(filter, update).await
    }

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        self.hit();
        self.inner.distinct(field, filter).await
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        self.hit();
        self.inner.aggregate(pipeline).await
    }

    async fn count(&self, filter: Document) -> OdmResult<u64> {
        self.hit();
        self.inner.count(filter).await
    }
}

fn user_model() -> Arc<ModelDefinition> {
    ModelDefinition::builder("user")
        .attr(AttributeDescriptor::new("_id"))
        .attr(AttributeDescriptor::new("name"))
        .attr(AttributeDescriptor::new("email").unique())
        .attr(AttributeDescriptor::new("visits").atomic())
        .attr(AttributeDescriptor::new("team").references())
        .attr(AttributeDescriptor::new("joined").typed(AttrType::Date))
        .build()
}

fn recorded_adapter() -> (ModelAdapter, Arc<RecordingCollection>) {
    let collection = RecordingCollection::new("users");
    (ModelAdapter::new(user_model(), collection.clone()), collection)
}

async fn bound_users() -> ModelAdapter {
    let odm = Odm::new(Arc::new(InMemoryDatabase::new("app")));
    odm.bind(user_model()).await.unwrap()
}

#[tokio::test]
async fn test_atomic_counter_sends_increments() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy", "visits": 30 }).unwrap();
    users.save(&mut user).await.unwrap();

    user.set("visits", 35).unwrap();
    users.update(&mut user).await.unwrap();
    assert_eq!(collection.last_update(), Some(doc! { "$inc": { "visits": 5 } }));

    user.set("visits", 40).unwrap();
    users.update(&mut user).await.unwrap();
    assert_eq!(collection.last_update(), Some(doc! { "$inc": { "visits": 5 } }));

    let stored = users.get(user.primary().unwrap().clone()).await.unwrap().unwrap();
    assert_eq!(stored.get_number("visits").map(|n| n.as_f64()), Some(40.0));
}

#[tokio::test]
async fn test_atomic_counter_without_baseline_is_set() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy" }).unwrap();
    users.save(&mut user).await.unwrap();

    user.set("visits", 3).unwrap();
    users.update(&mut user).await.unwrap();
    assert_eq!(collection.last_update(), Some(doc! { "$set": { "visits": 3 } }));
}

#[tokio::test]
async fn test_mixed_update_document() {
    let (users, collection) = recorded_adapter();
    let mut user = users
        .create(doc! { "name": "jimmy", "email": "jimmy@example.com", "visits": 1 })
        .unwrap();
    users.save(&mut user).await.unwrap();

    user.set("name", "martha").unwrap();
    user.set("visits", 3).unwrap();
    user.unset("email").unwrap();
    users.update(&mut user).await.unwrap();

    assert_eq!(
        collection.last_update(),
        Some(doc! {
            "$set": { "name": "martha" },
            "$inc": { "visits": 2 },
            "$unset": { "email": "" }
        })
    );
    assert!(!user.has("email"));
    assert!(!user.is_dirty());
}

#[tokio::test]
async fn test_nan_atomic_aborts_without_round_trip() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy", "visits": 1 }).unwrap();
    users.save(&mut user).await.unwrap();
    let before = collection.round_trips();

    user.set("visits", "lots").unwrap();
    let err = users.update(&mut user).await.unwrap_err();

    assert_eq!(
        err.validation_error().map(|e| e.message.as_str()),
        Some("Atomic property visits set to NaN")
    );
    assert_eq!(collection.round_trips(), before);
    assert!(user.is_dirty());
}

#[tokio::test]
async fn test_clean_instance_skips_update() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy" }).unwrap();
    users.save(&mut user).await.unwrap();
    let before = collection.round_trips();

    users.update(&mut user).await.unwrap();
    user.set("name", "jimmy").unwrap();
    users.update(&mut user).await.unwrap();

    assert_eq!(collection.round_trips(), before);
}

#[tokio::test]
async fn test_save_persisted_instance_updates() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy" }).unwrap();
    let id = users.save(&mut user).await.unwrap();

    user.set("name", "martha").unwrap();
    assert_eq!(users.save(&mut user).await.unwrap(), id);
    assert_eq!(collection.last_update(), Some(doc! { "$set": { "name": "martha" } }));
    assert_eq!(users.count(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn test_duplicate_email_is_attribute_error() {
    let users = bound_users().await;

    let mut first = users.create(doc! { "name": "jimmy", "email": "same@example.com" }).unwrap();
    users.save(&mut first).await.unwrap();

    let mut second = users.create(doc! { "name": "martha", "email": "same@example.com" }).unwrap();
    let err = users.save(&mut second).await.unwrap_err();

    assert!(matches!(err, OdmError::Validation(_)));
    assert_eq!(err.to_string(), "Validation error: email has already been taken");
    assert_eq!(second.first_error().map(|e| e.attr.as_str()), Some("email"));
    assert!(second.is_new());
}

#[tokio::test]
async fn test_duplicate_email_on_update() {
    let users = bound_users().await;

    let mut first = users.create(doc! { "email": "a@example.com" }).unwrap();
    users.save(&mut first).await.unwrap();
    let mut second = users.create(doc! { "email": "b@example.com" }).unwrap();
    users.save(&mut second).await.unwrap();

    second.set("email", "a@example.com").unwrap();
    let err = users.update(&mut second).await.unwrap_err();
    assert_eq!(
        err.validation_error().map(|e| e.message.as_str()),
        Some("email has already been taken")
    );
}

#[tokio::test]
async fn test_missing_unique_values_do_not_collide() {
    let users = bound_users().await;
    for name in ["jimmy", "martha"] {
        let mut user = users.create(doc! { "name": name }).unwrap();
        users.save(&mut user).await.unwrap();
    }
    assert_eq!(users.count(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn test_textual_and_native_identifiers() {
    let users = bound_users().await;
    let team = ObjectId::new();
    let mut user = users
        .create(doc! { "name": "jimmy", "team": team.to_hex() })
        .unwrap();
    let id = users.save(&mut user).await.unwrap();
    let oid = id.as_object_id().unwrap();

    assert_eq!(user.get("team"), Some(&Bson::ObjectId(team)));

    let by_text = users.get(oid.to_hex()).await.unwrap().unwrap();
    let by_native = users.get(oid).await.unwrap().unwrap();
    assert_eq!(by_text.primary(), by_native.primary());

    let by_filter = users
        .find(doc! { "_id": oid.to_hex() }, FindOptions::default())
        .await
        .unwrap();
    assert!(by_filter.is_some());

    let by_reference = users
        .all(doc! { "team": { "$in": [team.to_hex()] } }, FindOptions::default())
        .await
        .unwrap();
    assert_eq!(by_reference.len(), 1);

    let removed = users
        .remove(&mut user, Some(Lookup::from(oid.to_hex())))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(user.is_removed());
    assert!(users.get(oid).await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove_with_foreign_lookup_leaves_instance_alone() {
    let users = bound_users().await;
    let mut jimmy = users.create(doc! { "name": "jimmy" }).unwrap();
    users.save(&mut jimmy).await.unwrap();
    let mut martha = users.create(doc! { "name": "martha" }).unwrap();
    users.save(&mut martha).await.unwrap();

    let removed = users
        .remove(&mut jimmy, Some(Lookup::from(doc! { "name": "martha" })))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(!jimmy.is_removed());
    assert!(users.get(jimmy.primary().unwrap().clone()).await.unwrap().is_some());
    assert!(users.get(martha.primary().unwrap().clone()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_remove_of_missing_document_is_not_flagged() {
    let users = bound_users().await;
    let mut ghost = users.hydrate(doc! { "_id": ObjectId::new(), "name": "ghost" });

    assert_eq!(users.remove(&mut ghost, None).await.unwrap(), 0);
    assert!(!ghost.is_removed());
}

#[tokio::test]
async fn test_removed_instance_cannot_be_written() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy" }).unwrap();
    users.save(&mut user).await.unwrap();
    users.remove(&mut user, None).await.unwrap();
    assert!(user.is_removed());
    let before = collection.round_trips();

    user.set("name", "martha").unwrap();
    assert!(matches!(users.update(&mut user).await, Err(OdmError::NotSaved(_))));
    assert!(matches!(users.save(&mut user).await, Err(OdmError::NotSaved(_))));
    assert_eq!(collection.round_trips(), before);
}

#[tokio::test]
async fn test_textual_atomic_is_stored_as_number() {
    let (users, collection) = recorded_adapter();
    let mut user = users.create(doc! { "name": "jimmy", "visits": "5" }).unwrap();
    users.save(&mut user).await.unwrap();
    assert_eq!(user.get("visits"), Some(&Bson::Int32(5)));

    user.set("visits", 6).unwrap();
    users.update(&mut user).await.unwrap();
    assert_eq!(collection.last_update(), Some(doc! { "$inc": { "visits": 1 } }));
    assert_eq!(user.get("visits"), Some(&Bson::Int32(6)));

    let mut broken = users.create(doc! { "name": "martha", "visits": "lots" }).unwrap();
    let err = users.save(&mut broken).await.unwrap_err();
    assert_eq!(err.validation_error().map(|e| e.attr.as_str()), Some("visits"));
    assert!(broken.is_new());
}

#[tokio::test]
async fn test_lookup_edge_cases() {
    let users = bound_users().await;

    assert!(users.get("").await.unwrap().is_none());
    assert!(users.get(Bson::Null).await.unwrap().is_none());
    assert!(matches!(users.get("nope").await, Err(OdmError::InvalidIdentifier(_))));
    assert!(users.all(doc! { "name": "nobody" }, FindOptions::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_date_is_attribute_error() {
    let users = bound_users().await;
    let mut user = users.create(doc! { "name": "jimmy", "joined": "yesterday-ish" }).unwrap();

    let err = users.save(&mut user).await.unwrap_err();
    assert_eq!(err.validation_error().map(|e| e.attr.as_str()), Some("joined"));
    assert!(user.is_new());

    user.set("joined", "2021-05-06T07:08:09Z").unwrap();
    users.save(&mut user).await.unwrap();
    assert!(matches!(user.get("joined"), Some(Bson::DateTime(_))));
}

#[tokio::test]
async fn test_remove_all_and_count() {
    let users = bound_users().await;
    for (name, visits) in [("a", 1), ("b", 5), ("c", 9)] {
        let mut user = users.create(doc! { "name": name, "visits": visits }).unwrap();
        users.save(&mut user).await.unwrap();
    }

    assert_eq!(users.count(doc! { "visits": { "$gt": 2 } }).await.unwrap(), 2);
    assert_eq!(users.remove_all(doc! { "visits": { "$lt": 6 } }).await.unwrap(), 2);
    assert_eq!(users.count(doc! {}).await.unwrap(), 1);
}

#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    fn push(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct JournalObserver {
    journal: Arc<Journal>,
}

impl ModelObserver for JournalObserver {
    fn creating(&self, _instance: &mut Instance) -> Result<(), EventError> {
        self.journal.push("creating");
        Ok(())
    }

    fn created(&self, _instance: &Instance) -> Result<(), EventError> {
        self.journal.push("created");
        Ok(())
    }

    fn updating(&self, _instance: &mut Instance) -> Result<(), EventError> {
        self.journal.push("updating");
        Ok(())
    }

    fn updated(&self, _instance: &Instance) -> Result<(), EventError> {
        self.journal.push("updated");
        Ok(())
    }

    fn saving(&self, instance: &mut Instance) -> Result<(), EventError> {
        self.journal.push("saving");
        if instance.get_str("name") == Some("forbidden") {
            return Err(EventError::validation("name is not allowed"));
        }
        Ok(())
    }

    fn saved(&self, _instance: &Instance) -> Result<(), EventError> {
        self.journal.push("saved");
        Ok(())
    }

    fn removing(&self, _instance: &Instance) -> Result<(), EventError> {
        self.journal.push("removing");
        Ok(())
    }

    fn removed(&self, _instance: &Instance) -> Result<(), EventError> {
        self.journal.push("removed");
        Ok(())
    }
}

fn journaled_adapter(journal: Arc<Journal>) -> ModelAdapter {
    let validator_journal = Arc::clone(&journal);
    let model = ModelDefinition::builder("post")
        .attr(AttributeDescriptor::new("_id"))
        .attr(AttributeDescriptor::new("name"))
        .validate(move |instance: &mut Instance| {
            validator_journal.push("validate");
            if !instance.has("name") {
                instance.error("name", "name is required");
            }
        })
        .observe(Arc::new(JournalObserver { journal }))
        .build();
    let db = InMemoryDatabase::new("app");
    ModelAdapter::new(model, db.collection("posts"))
}

#[tokio::test]
async fn test_lifecycle_order_through_adapter() {
    let journal = Arc::new(Journal::default());
    let posts = journaled_adapter(Arc::clone(&journal));

    let mut post = posts.create(doc! { "name": "hello" }).unwrap();
    posts.save(&mut post).await.unwrap();
    post.set("name", "hello again").unwrap();
    posts.update(&mut post).await.unwrap();
    posts.remove(&mut post, None).await.unwrap();

    assert_eq!(
        journal.events(),
        vec![
            "validate", "creating", "saving", "saved", "created", "validate", "updating", "saving", "saved",
            "updated", "removing", "removed",
        ]
    );
}

#[tokio::test]
async fn test_failed_validation_skips_hooks_and_database() {
    let journal = Arc::new(Journal::default());
    let posts = journaled_adapter(Arc::clone(&journal));

    let mut post = posts.create(doc! {}).unwrap();
    let err = posts.save(&mut post).await.unwrap_err();

    assert_eq!(err.validation_error().map(|e| e.message.as_str()), Some("name is required"));
    assert_eq!(journal.events(), vec!["validate"]);
    assert_eq!(posts.count(doc! {}).await.unwrap(), 0);
}

#[tokio::test]
async fn test_observer_veto_aborts_save() {
    let journal = Arc::new(Journal::default());
    let posts = journaled_adapter(Arc::clone(&journal));

    let mut post = posts.create(doc! { "name": "forbidden" }).unwrap();
    assert!(matches!(posts.save(&mut post).await, Err(OdmError::Event(_))));
    assert!(post.is_new());
    assert_eq!(posts.count(doc! {}).await.unwrap(), 0);
}
