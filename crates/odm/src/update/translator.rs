//! Update Translator - dirty attributes to a mutation document
//!
//! Atomic attributes are written as `$inc` deltas against the last persisted
//! value (the baseline) so that concurrent writers compose. Without a
//! baseline the absolute value is `$set`. Every other attribute is `$set`
//! after type coercion, or `$unset` when it carries an unset marker.

use std::collections::{BTreeMap, BTreeSet};

use bson::Document;

use super::coercion::coerce_value;
use super::mutation::MutationDocument;
use super::numeric::{parse_atomic, Number};
use crate::error::{OdmError, OdmResult, ValidationError};
use crate::model::AttributeRegistry;

/// Output of a single translation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translation {
    pub mutation: MutationDocument,
    /// Baselines to keep for the next update cycle
    pub prior_atomic: BTreeMap<String, Number>,
    /// Unset markers consumed by this translation
    pub cleared_unsets: Vec<String>,
    pub errors: Vec<ValidationError>,
}

impl Translation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&ValidationError> {
        self.errors.first()
    }
}

/// Translate an instance's dirty attributes.
///
/// Attribute errors are collected and do not stop the other fields from
/// being processed. A malformed identifier aborts with `InvalidIdentifier`.
/// Nothing here touches the database.
pub fn translate(
    dirty: &Document,
    registry: &AttributeRegistry,
    prior_atomic: &BTreeMap<String, Number>,
    unset_markers: &BTreeSet<String>,
) -> OdmResult<Translation> {
    let mut translation = Translation {
        prior_atomic: prior_atomic.clone(),
        ..Default::default()
    };

    for (attr, value) in dirty {
        // identifiers never change once assigned
        if registry.is_primary_key(attr) {
            continue;
        }

        if unset_markers.contains(attr) {
            translation.mutation.unset_field(attr);
            translation.prior_atomic.remove(attr);
            translation.cleared_unsets.push(attr.clone());
            continue;
        }

        if registry.is_atomic(attr) {
            let number = match parse_atomic(value) {
                Some(number) => number,
                None => {
                    translation.errors.push(ValidationError::new(
                        attr,
                        format!("Atomic property {} set to NaN", attr),
                    ));
                    continue;
                }
            };

            match prior_atomic.get(attr) {
                Some(&previous) => translation
                    .mutation
                    .increment(attr, (number - previous).to_bson()),
                None => translation.mutation.set_value(attr, number.to_bson()),
            }
            translation.prior_atomic.insert(attr.clone(), number);
            continue;
        }

        match coerce_value(registry.get(attr), attr, value.clone()) {
            Ok(coerced) => translation.mutation.set_value(attr, coerced),
            Err(OdmError::Validation(error)) => translation.errors.push(error),
            Err(other) => return Err(other),
        }
    }

    Ok(translation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrType, AttributeDescriptor};
    use bson::oid::ObjectId;
    use bson::{doc, Bson};

    fn registry() -> AttributeRegistry {
        let mut registry = AttributeRegistry::new("user");
        registry.define(AttributeDescriptor::new("_id"));
        registry.define(AttributeDescriptor::new("name"));
        registry.define(AttributeDescriptor::new("age").atomic());
        registry.define(AttributeDescriptor::new("visits").atomic());
        registry.define(AttributeDescriptor::new("born").typed(AttrType::Date));
        registry.define(AttributeDescriptor::new("team").references());
        registry
    }

    fn no_baselines() -> BTreeMap<String, Number> {
        BTreeMap::new()
    }

    #[test]
    fn test_plain_fields_are_set() {
        let dirty = doc! { "name": "jimmy" };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(t.mutation.set, doc! { "name": "jimmy" });
        assert!(t.mutation.inc.is_empty());
        assert!(t.mutation.unset.is_empty());
        assert!(t.is_valid());
    }

    #[test]
    fn test_atomic_without_baseline_is_set() {
        let dirty = doc! { "age": 30 };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(t.mutation.set, doc! { "age": 30 });
        assert_eq!(t.prior_atomic.get("age"), Some(&Number::Int(30)));
    }

    #[test]
    fn test_atomic_with_baseline_is_incremented() {
        let mut baselines = no_baselines();
        baselines.insert("age".to_string(), Number::Int(30));

        let t = translate(&doc! { "age": 35 }, &registry(), &baselines, &BTreeSet::new()).unwrap();
        assert_eq!(t.mutation.inc, doc! { "age": 5 });
        assert!(t.mutation.set.is_empty());
        assert_eq!(t.prior_atomic.get("age"), Some(&Number::Int(35)));

        // the second cycle starts from the new baseline
        let t = translate(&doc! { "age": 40 }, &registry(), &t.prior_atomic, &BTreeSet::new()).unwrap();
        assert_eq!(t.mutation.inc, doc! { "age": 5 });
        assert_eq!(t.prior_atomic.get("age"), Some(&Number::Int(40)));
    }

    #[test]
    fn test_atomic_text_values() {
        let mut baselines = no_baselines();
        baselines.insert("visits".to_string(), Number::Int(2));

        let t = translate(&doc! { "visits": "2.5" }, &registry(), &baselines, &BTreeSet::new()).unwrap();
        assert_eq!(t.mutation.inc, doc! { "visits": 0.5 });
    }

    #[test]
    fn test_atomic_nan_is_reported_once() {
        let dirty = doc! { "age": "old", "name": "jimmy" };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(
            t.errors,
            vec![ValidationError::new("age", "Atomic property age set to NaN")]
        );
        assert!(!t.mutation.set.contains_key("age"));
        assert!(!t.mutation.inc.contains_key("age"));
        assert!(!t.prior_atomic.contains_key("age"));
        // other fields still processed
        assert_eq!(t.mutation.set, doc! { "name": "jimmy" });
    }

    #[test]
    fn test_primary_key_is_never_written() {
        let dirty = doc! { "_id": ObjectId::new(), "name": "jimmy" };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(t.mutation.fields(), vec!["name".to_string()]);
    }

    #[test]
    fn test_unset_marker() {
        let dirty = doc! { "name": Bson::Null, "age": Bson::Null };
        let markers: BTreeSet<String> = ["name".to_string(), "age".to_string()].into_iter().collect();
        let mut baselines = no_baselines();
        baselines.insert("age".to_string(), Number::Int(30));

        let t = translate(&dirty, &registry(), &baselines, &markers).unwrap();

        assert_eq!(t.mutation.unset, markers);
        assert!(t.mutation.set.is_empty());
        assert_eq!(t.cleared_unsets, vec!["name".to_string(), "age".to_string()]);
        assert!(t.prior_atomic.is_empty());
    }

    #[test]
    fn test_typed_fields_are_coerced() {
        let team = ObjectId::new();
        let dirty = doc! { "born": "2020-01-02", "team": team.to_hex() };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(
            t.mutation.set,
            doc! { "born": bson::DateTime::from_millis(1_577_923_200_000), "team": team }
        );
    }

    #[test]
    fn test_invalid_reference_aborts() {
        let dirty = doc! { "team": "nope" };
        let result = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new());

        assert!(matches!(result, Err(OdmError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_invalid_date_is_collected() {
        let dirty = doc! { "born": "whenever", "name": "jimmy" };
        let t = translate(&dirty, &registry(), &no_baselines(), &BTreeSet::new()).unwrap();

        assert_eq!(t.first_error().map(|e| e.attr.as_str()), Some("born"));
        assert_eq!(t.mutation.set, doc! { "name": "jimmy" });
    }
}
