use std::collections::BTreeSet;

use bson::{Bson, Document};

/// Pending update grouped by operator.
///
/// An attribute lives in at most one group; placing it in one group removes
/// it from the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationDocument {
    pub set: Document,
    pub inc: Document,
    pub unset: BTreeSet<String>,
}

impl MutationDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(&mut self, attr: &str, value: Bson) {
        self.inc.remove(attr);
        self.unset.remove(attr);
        self.set.insert(attr, value);
    }

    pub fn increment(&mut self, attr: &str, delta: Bson) {
        self.set.remove(attr);
        self.unset.remove(attr);
        self.inc.insert(attr, delta);
    }

    pub fn unset_field(&mut self, attr: &str) {
        self.set.remove(attr);
        self.inc.remove(attr);
        self.unset.insert(attr.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.inc.is_empty() && self.unset.is_empty()
    }

    /// Names of every attribute touched by this mutation
    pub fn fields(&self) -> Vec<String> {
        self.set
            .keys()
            .chain(self.inc.keys())
            .cloned()
            .chain(self.unset.iter().cloned())
            .collect()
    }

    /// Render as a database update document (`$set`, `$inc`, `$unset`)
    pub fn to_update_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.inc.is_empty() {
            update.insert("$inc", self.inc.clone());
        }
        if !self.unset.is_empty() {
            let fields: Document = self
                .unset
                .iter()
                .map(|field| (field.clone(), Bson::String(String::new())))
                .collect();
            update.insert("$unset", fields);
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_groups_are_exclusive() {
        let mut mutation = MutationDocument::new();
        mutation.set_value("age", Bson::Int32(30));
        mutation.increment("age", Bson::Int32(5));
        assert!(mutation.set.is_empty());
        assert_eq!(mutation.inc, doc! { "age": 5 });

        mutation.unset_field("age");
        assert!(mutation.inc.is_empty());
        assert!(mutation.unset.contains("age"));
    }

    #[test]
    fn test_update_document_omits_empty_groups() {
        let mut mutation = MutationDocument::new();
        assert_eq!(mutation.to_update_document(), doc! {});

        mutation.set_value("name", Bson::String("martha".into()));
        mutation.unset_field("nickname");

        assert_eq!(
            mutation.to_update_document(),
            doc! { "$set": { "name": "martha" }, "$unset": { "nickname": "" } }
        );
    }
}
