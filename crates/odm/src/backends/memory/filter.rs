//! Filter evaluation, ordering and projection for the in-memory store

use std::cmp::Ordering;

use bson::{Bson, Document};
use regex::RegexBuilder;

use super::update::set_path;
use crate::error::{OdmError, OdmResult};
use crate::model::ID_FIELD;
use crate::update::Number;

/// Value at a dotted path; numeric segments index into arrays
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Bson::Document(inner) => inner.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map(|k| k.starts_with('$')).unwrap_or(false)
}

/// Whether `doc` satisfies `filter`
pub fn matches(doc: &Document, filter: &Document) -> OdmResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for branch in branches(key, condition)? {
                    if !matches(doc, branch)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => any_branch(doc, key, condition)?,
            "$nor" => !any_branch(doc, key, condition)?,
            op if op.starts_with('$') => {
                return Err(OdmError::database(format!("unknown top level operator: {}", op)))
            }
            path => matches_field(get_path(doc, path), condition)?,
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

fn any_branch(doc: &Document, op: &str, condition: &Bson) -> OdmResult<bool> {
    for branch in branches(op, condition)? {
        if matches(doc, branch)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn branches<'a>(op: &str, condition: &'a Bson) -> OdmResult<Vec<&'a Document>> {
    match condition {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| match item {
                Bson::Document(branch) => Ok(branch),
                _ => Err(OdmError::database(format!("{} entries must be documents", op))),
            })
            .collect(),
        _ => Err(OdmError::database(format!("{} must be a nonempty array", op))),
    }
}

fn matches_field(value: Option<&Bson>, condition: &Bson) -> OdmResult<bool> {
    match condition {
        Bson::Document(ops) if is_operator_document(ops) => {
            for (op, operand) in ops {
                if !apply_operator(value, op, operand, ops)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Bson::RegularExpression(regex) => regex_matches(value, &regex.pattern, &regex.options),
        expected => Ok(equals_condition(value, expected)),
    }
}

fn apply_operator(value: Option<&Bson>, op: &str, operand: &Bson, ops: &Document) -> OdmResult<bool> {
    let result = match op {
        "$eq" => equals_condition(value, operand),
        "$ne" => !equals_condition(value, operand),
        "$gt" => compare_condition(value, operand, |o| o == Ordering::Greater),
        "$gte" => compare_condition(value, operand, |o| o != Ordering::Less),
        "$lt" => compare_condition(value, operand, |o| o == Ordering::Less),
        "$lte" => compare_condition(value, operand, |o| o != Ordering::Greater),
        "$in" => in_list(value, op, operand)?,
        "$nin" => !in_list(value, op, operand)?,
        "$exists" => truthy(operand) == value.is_some(),
        "$size" => match (value, Number::from_bson(operand)) {
            (Some(Bson::Array(items)), Some(size)) => items.len() as f64 == size.as_f64(),
            _ => false,
        },
        "$regex" => {
            let pattern = match operand {
                Bson::String(pattern) => pattern.as_str(),
                Bson::RegularExpression(regex) => regex.pattern.as_str(),
                _ => return Err(OdmError::database("$regex has to be a string")),
            };
            let options = ops.get_str("$options").unwrap_or("");
            regex_matches(value, pattern, options)?
        }
        // read together with $regex
        "$options" => true,
        "$not" => match operand {
            Bson::Document(inner) => !matches_field(value, &Bson::Document(inner.clone()))?,
            Bson::RegularExpression(regex) => !regex_matches(value, &regex.pattern, &regex.options)?,
            _ => return Err(OdmError::database("$not needs a regex or a document")),
        },
        other => return Err(OdmError::database(format!("unknown operator: {}", other))),
    };
    Ok(result)
}

fn equals_condition(value: Option<&Bson>, expected: &Bson) -> bool {
    match value {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) => {
            values_equal(&Bson::Array(items.clone()), expected)
                || items.iter().any(|item| values_equal(item, expected))
        }
        Some(actual) => values_equal(actual, expected),
    }
}

fn compare_condition<F>(value: Option<&Bson>, operand: &Bson, accept: F) -> bool
where
    F: Fn(Ordering) -> bool,
{
    let check = |candidate: &Bson| comparable(candidate, operand) && accept(compare_bson(candidate, operand));
    match value {
        None => false,
        Some(Bson::Array(items)) => items.iter().any(check),
        Some(actual) => check(actual),
    }
}

fn in_list(value: Option<&Bson>, op: &str, operand: &Bson) -> OdmResult<bool> {
    match operand {
        Bson::Array(candidates) => Ok(candidates.iter().any(|candidate| match candidate {
            Bson::RegularExpression(regex) => {
                regex_matches(value, &regex.pattern, &regex.options).unwrap_or(false)
            }
            _ => equals_condition(value, candidate),
        })),
        _ => Err(OdmError::database(format!("{} needs an array", op))),
    }
}

fn regex_matches(value: Option<&Bson>, pattern: &str, options: &str) -> OdmResult<bool> {
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| OdmError::database(format!("invalid regex: {}", e)))?;

    Ok(match value {
        Some(Bson::String(text)) => regex.is_match(text),
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Bson::String(text) if regex.is_match(text))),
        _ => false,
    })
}

/// Equality with numbers compared by value across widths
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (Number::from_bson(a), Number::from_bson(b)) {
        (Some(x), Some(y)) => compare_numbers(x, y) == Ordering::Equal,
        _ => a == b,
    }
}

pub fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        other => Number::from_bson(other)
            .map(|n| n.as_f64() != 0.0)
            .unwrap_or(true),
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 255,
        _ => 12,
    }
}

fn comparable(a: &Bson, b: &Bson) -> bool {
    let rank = type_rank(a);
    rank == type_rank(b) && rank != 1
}

fn compare_numbers(a: Number, b: Number) -> Ordering {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => x.cmp(&y),
        (x, y) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
    }
}

/// Total order over values: by type class first, then by value
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }

    match (a, b) {
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
        (Bson::Array(x), Bson::Array(y)) => compare_sequences(x.iter(), y.iter()),
        (Bson::Document(x), Bson::Document(y)) => {
            for ((key_x, value_x), (key_y, value_y)) in x.iter().zip(y.iter()) {
                let ordering = key_x.cmp(key_y).then_with(|| compare_bson(value_x, value_y));
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => match (Number::from_bson(a), Number::from_bson(b)) {
            (Some(x), Some(y)) => compare_numbers(x, y),
            _ => Ordering::Equal,
        },
    }
}

fn compare_sequences<'a>(
    x: impl ExactSizeIterator<Item = &'a Bson>,
    y: impl ExactSizeIterator<Item = &'a Bson>,
) -> Ordering {
    let (len_x, len_y) = (x.len(), y.len());
    for (a, b) in x.zip(y) {
        let ordering = compare_bson(a, b);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    len_x.cmp(&len_y)
}

/// Sort keys of a `{ field: 1 | -1 }` specification; `true` is descending
pub fn parse_sort(spec: &Document) -> OdmResult<Vec<(String, bool)>> {
    let mut keys = Vec::with_capacity(spec.len());
    for (field, direction) in spec {
        let descending = match Number::from_bson(direction) {
            Some(n) if n.as_f64() < 0.0 => true,
            Some(_) => false,
            None => {
                return Err(OdmError::database(format!(
                    "invalid sort direction for '{}': {}",
                    field, direction
                )))
            }
        };
        keys.push((field.clone(), descending));
    }
    Ok(keys)
}

/// Order two documents by parsed sort keys; missing fields sort as null
pub fn compare_by(a: &Document, b: &Document, keys: &[(String, bool)]) -> Ordering {
    for (field, descending) in keys {
        let left = get_path(a, field).unwrap_or(&Bson::Null);
        let right = get_path(b, field).unwrap_or(&Bson::Null);
        let ordering = compare_bson(left, right);
        let ordering = if *descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Stable sort by a `{ field: 1 | -1 }` specification
pub fn sort_documents(docs: &mut [Document], spec: &Document) -> OdmResult<()> {
    let keys = parse_sort(spec)?;
    docs.sort_by(|a, b| compare_by(a, b, &keys));
    Ok(())
}

/// Apply an inclusion or exclusion projection
pub fn project(doc: &Document, projection: &Document) -> OdmResult<Document> {
    let include_id = projection.get(ID_FIELD).map(truthy).unwrap_or(true);
    let inclusive = projection
        .iter()
        .any(|(field, flag)| field != ID_FIELD && truthy(flag));

    if !inclusive {
        let mut projected = doc.clone();
        for (field, _) in projection.iter().filter(|(_, flag)| !truthy(flag)) {
            super::update::unset_path(&mut projected, field);
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    if include_id {
        if let Some(id) = doc.get(ID_FIELD) {
            projected.insert(ID_FIELD, id.clone());
        }
    }
    for (field, flag) in projection {
        if field == ID_FIELD || !truthy(flag) {
            continue;
        }
        if let Some(value) = get_path(doc, field) {
            set_path(&mut projected, field, value.clone())?;
        }
    }
    Ok(projected)
}
