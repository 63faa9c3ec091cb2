//! Update operators for the in-memory store

use bson::{Bson, Document};

use super::filter::{get_path, is_operator_document};
use crate::error::{OdmError, OdmResult};
use crate::model::ID_FIELD;
use crate::update::Number;

/// Apply an update document in place.
///
/// Operator documents support `$set`, `$inc` and `$unset`; anything else is a
/// replacement that keeps the stored `_id`.
pub fn apply_update(doc: &mut Document, update: &Document) -> OdmResult<()> {
    if !is_operator_document(update) {
        let mut replacement = Document::new();
        if let Some(id) = doc.get(ID_FIELD) {
            replacement.insert(ID_FIELD, id.clone());
        }
        for (field, value) in update {
            if field != ID_FIELD {
                replacement.insert(field.clone(), value.clone());
            }
        }
        *doc = replacement;
        return Ok(());
    }

    for (op, fields) in update {
        let fields = match fields {
            Bson::Document(fields) => fields,
            other => {
                return Err(OdmError::database(format!(
                    "Modifiers operate on fields but we found {} instead",
                    other
                )))
            }
        };

        match op.as_str() {
            "$set" => {
                for (path, value) in fields {
                    guard_id(path)?;
                    set_path(doc, path, value.clone())?;
                }
            }
            "$inc" => {
                for (path, delta) in fields {
                    guard_id(path)?;
                    let delta = Number::from_bson(delta).ok_or_else(|| {
                        OdmError::database(format!("Cannot increment with non-numeric argument: {{{}: {}}}", path, delta))
                    })?;
                    let next = match get_path(doc, path) {
                        None => delta,
                        Some(current) => Number::from_bson(current).ok_or_else(|| {
                            OdmError::database(format!(
                                "Cannot apply $inc to a value of non-numeric type. {{{}: {}}}",
                                path, current
                            ))
                        })? + delta,
                    };
                    set_path(doc, path, next.to_bson())?;
                }
            }
            "$unset" => {
                for path in fields.keys() {
                    guard_id(path)?;
                    unset_path(doc, path);
                }
            }
            other => {
                return Err(OdmError::database(format!("Unknown modifier: {}", other)));
            }
        }
    }
    Ok(())
}

fn guard_id(path: &str) -> OdmResult<()> {
    if path == ID_FIELD {
        Err(OdmError::database("Mod on _id not allowed"))
    } else {
        Ok(())
    }
}

/// Assign at a dotted path, creating intermediate documents
pub fn set_path(doc: &mut Document, path: &str, value: Bson) -> OdmResult<()> {
    let (head, rest) = match path.split_once('.') {
        None => {
            doc.insert(path, value);
            return Ok(());
        }
        Some(split) => split,
    };

    if !doc.contains_key(head) {
        doc.insert(head, Document::new());
    }
    match doc.get_mut(head) {
        Some(Bson::Document(inner)) => set_path(inner, rest, value),
        _ => Err(OdmError::database(format!(
            "Cannot create field '{}' in element '{}'",
            rest, head
        ))),
    }
}

/// Remove the value at a dotted path, if present
pub fn unset_path(doc: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            doc.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = doc.get_mut(head) {
                unset_path(inner, rest);
            }
        }
    }
}
