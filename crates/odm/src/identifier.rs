//! Identifier coercion
//!
//! Identifiers may cross the adapter boundary either as native ObjectIds or
//! as their 24-character hex text. Everything headed for the database is
//! normalised to the native form here, at the earliest point the adapter
//! sees it (filter construction, lookups and stored values alike).

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::error::{OdmError, OdmResult};
use crate::model::AttributeRegistry;

const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Convert a raw value into a native identifier
pub fn coerce_id(value: &Bson) -> OdmResult<ObjectId> {
    match value {
        Bson::ObjectId(oid) => Ok(*oid),
        Bson::String(text) => ObjectId::parse_str(text).map_err(|_| {
            OdmError::InvalidIdentifier(format!("'{}' is not a valid ObjectId", text))
        }),
        // extended JSON shape: { "$oid": "..." }
        Bson::Document(doc) if doc.len() == 1 => match doc.get_str("$oid") {
            Ok(text) => coerce_id(&Bson::String(text.to_string())),
            Err(_) => Err(OdmError::InvalidIdentifier(format!(
                "{} cannot be used as an ObjectId",
                value
            ))),
        },
        other => Err(OdmError::InvalidIdentifier(format!(
            "{} cannot be used as an ObjectId",
            other
        ))),
    }
}

/// Coerce textual identifiers, leaving every other shape untouched
pub fn coerce_id_value(value: Bson) -> OdmResult<Bson> {
    match value {
        Bson::String(_) => Ok(Bson::ObjectId(coerce_id(&value)?)),
        other => Ok(other),
    }
}

/// Whether a filter key holds identifiers for this model
pub fn is_identifier_field(registry: &AttributeRegistry, key: &str) -> bool {
    if registry.is_primary_key(key) {
        return registry.primary_key_is_identifier();
    }
    registry.get(key).map(|d| d.is_identifier()).unwrap_or(false)
}

/// Filter matching a primary key value
pub fn primary_key_filter(registry: &AttributeRegistry, value: &Bson) -> OdmResult<Document> {
    let key = registry.primary_key();
    let value = if registry.primary_key_is_identifier() {
        Bson::ObjectId(coerce_id(value)?)
    } else {
        value.clone()
    };

    let mut filter = Document::new();
    filter.insert(key, value);
    Ok(filter)
}

/// Rewrite every identifier-typed field of a filter document.
///
/// Reference attributes and the primary key have textual values coerced,
/// including values nested in operator documents (`$in`, `$ne`, ...) and in
/// `$and` / `$or` / `$nor` branches.
pub fn coerce_query(filter: Document, registry: &AttributeRegistry) -> OdmResult<Document> {
    let mut coerced = Document::new();

    for (key, value) in filter {
        let value = if LOGICAL_OPERATORS.contains(&key.as_str()) {
            coerce_branches(value, registry)?
        } else if is_identifier_field(registry, &key) {
            coerce_condition(value)?
        } else {
            value
        };
        coerced.insert(key, value);
    }

    Ok(coerced)
}

fn coerce_branches(value: Bson, registry: &AttributeRegistry) -> OdmResult<Bson> {
    match value {
        Bson::Array(branches) => {
            let mut coerced = Vec::with_capacity(branches.len());
            for branch in branches {
                coerced.push(match branch {
                    Bson::Document(doc) => Bson::Document(coerce_query(doc, registry)?),
                    other => other,
                });
            }
            Ok(Bson::Array(coerced))
        }
        other => Ok(other),
    }
}

fn coerce_condition(value: Bson) -> OdmResult<Bson> {
    match value {
        Bson::String(_) => coerce_id_value(value),
        Bson::Array(items) => items
            .into_iter()
            .map(coerce_condition)
            .collect::<OdmResult<Vec<_>>>()
            .map(Bson::Array),
        Bson::Document(doc) if is_operator_document(&doc) => {
            let mut coerced = Document::new();
            for (op, operand) in doc {
                let operand = match op.as_str() {
                    "$exists" | "$type" | "$size" | "$regex" | "$options" => operand,
                    _ => coerce_condition(operand)?,
                };
                coerced.insert(op, operand);
            }
            Ok(Bson::Document(coerced))
        }
        other => Ok(other),
    }
}

fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrType, AttributeDescriptor};
    use bson::doc;

    const HEX: &str = "507f1f77bcf86cd799439011";

    fn registry() -> AttributeRegistry {
        let mut registry = AttributeRegistry::new("post");
        registry.define(AttributeDescriptor::new("_id"));
        registry.define(AttributeDescriptor::new("author").references());
        registry.define(AttributeDescriptor::new("editor").typed(AttrType::ObjectId));
        registry.define(AttributeDescriptor::new("title").typed(AttrType::String));
        registry
    }

    #[test]
    fn test_coerce_id_native_and_text() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(coerce_id(&Bson::ObjectId(oid)).unwrap(), oid);
        assert_eq!(coerce_id(&Bson::String(HEX.to_string())).unwrap(), oid);
        assert_eq!(coerce_id(&Bson::Document(doc! { "$oid": HEX })).unwrap(), oid);
    }

    #[test]
    fn test_coerce_id_rejects_malformed_text() {
        let result = coerce_id(&Bson::String("not-an-id".to_string()));
        assert!(matches!(result, Err(OdmError::InvalidIdentifier(_))));

        let result = coerce_id(&Bson::Int32(42));
        assert!(matches!(result, Err(OdmError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_coerce_query_rewrites_identifier_fields() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        let filter = doc! { "_id": HEX, "author": HEX, "title": HEX };

        let coerced = coerce_query(filter, &registry()).unwrap();

        assert_eq!(coerced, doc! { "_id": oid, "author": oid, "title": HEX });
    }

    #[test]
    fn test_coerce_query_nested_operators() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        let filter = doc! {
            "$or": [
                { "editor": { "$in": [HEX] } },
                { "author": { "$ne": HEX, "$exists": true } },
            ]
        };

        let coerced = coerce_query(filter, &registry()).unwrap();

        assert_eq!(
            coerced,
            doc! {
                "$or": [
                    { "editor": { "$in": [oid] } },
                    { "author": { "$ne": oid, "$exists": true } },
                ]
            }
        );
    }

    #[test]
    fn test_coerce_query_propagates_invalid_identifier() {
        let result = coerce_query(doc! { "author": "bogus" }, &registry());
        assert!(matches!(result, Err(OdmError::InvalidIdentifier(_))));
    }

    #[test]
    fn test_primary_key_filter() {
        let oid = ObjectId::parse_str(HEX).unwrap();
        assert_eq!(
            primary_key_filter(&registry(), &Bson::String(HEX.to_string())).unwrap(),
            doc! { "_id": oid }
        );

        let mut numeric = AttributeRegistry::new("account");
        numeric.define(AttributeDescriptor::new("id").typed(AttrType::Number));
        assert_eq!(
            primary_key_filter(&numeric, &Bson::Int32(7)).unwrap(),
            doc! { "id": 7 }
        );
    }
}
