//! Aggregation pipeline subset for the in-memory store

use std::cmp::Ordering;

use bson::{Bson, Document};

use super::filter::{compare_bson, get_path, matches, project, sort_documents, truthy, values_equal};
use super::update::set_path;
use crate::error::{OdmError, OdmResult};
use crate::model::ID_FIELD;
use crate::update::Number;

/// Run `pipeline` over `documents`, stage by stage
pub fn run_pipeline(mut documents: Vec<Document>, pipeline: &[Document]) -> OdmResult<Vec<Document>> {
    for stage in pipeline {
        let (name, spec) = match stage.iter().next() {
            Some(entry) if stage.len() == 1 => entry,
            _ => {
                return Err(OdmError::database(
                    "A pipeline stage specification object must contain exactly one field.",
                ))
            }
        };

        documents = match name.as_str() {
            "$match" => {
                let filter = stage_document(name, spec)?;
                let mut kept = Vec::with_capacity(documents.len());
                for doc in documents {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            "$sort" => {
                sort_documents(&mut documents, stage_document(name, spec)?)?;
                documents
            }
            "$skip" => {
                let skip = stage_count(name, spec)?;
                documents.into_iter().skip(skip).collect()
            }
            "$limit" => {
                let limit = stage_count(name, spec)?;
                documents.truncate(limit);
                documents
            }
            "$project" => project_stage(&documents, stage_document(name, spec)?)?,
            "$group" => group_stage(&documents, stage_document(name, spec)?)?,
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|field| !field.is_empty() && !field.starts_with('$'))
                    .ok_or_else(|| OdmError::database("$count requires a non-empty field name"))?;
                let mut counted = Document::new();
                counted.insert(field, count_bson(documents.len()));
                vec![counted]
            }
            other => {
                return Err(OdmError::database(format!(
                    "Unrecognized pipeline stage name: '{}'",
                    other
                )))
            }
        };
    }
    Ok(documents)
}

fn stage_document<'a>(name: &str, spec: &'a Bson) -> OdmResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| OdmError::database(format!("{} specification must be an object", name)))
}

fn stage_count(name: &str, spec: &Bson) -> OdmResult<usize> {
    match Number::from_bson(spec) {
        Some(Number::Int(n)) if n >= 0 => Ok(n as usize),
        Some(Number::Float(f)) if f >= 0.0 && f.fract() == 0.0 => Ok(f as usize),
        _ => Err(OdmError::database(format!(
            "{} must be a non-negative integer, got {}",
            name, spec
        ))),
    }
}

fn count_bson(count: usize) -> Bson {
    Number::Int(count as i64).to_bson()
}

/// Evaluate an expression: `"$path"` reads a field, documents evaluate
/// member-wise, anything else is a literal
fn evaluate(doc: &Document, expression: &Bson) -> Bson {
    match expression {
        Bson::String(path) if path.starts_with('$') => {
            get_path(doc, &path[1..]).cloned().unwrap_or(Bson::Null)
        }
        Bson::Document(members) => Bson::Document(
            members
                .iter()
                .map(|(key, value)| (key.clone(), evaluate(doc, value)))
                .collect(),
        ),
        literal => literal.clone(),
    }
}

fn project_stage(documents: &[Document], spec: &Document) -> OdmResult<Vec<Document>> {
    let computed: Vec<(&String, &Bson)> = spec
        .iter()
        .filter(|(_, value)| matches!(value, Bson::String(s) if s.starts_with('$')) || value.as_document().is_some())
        .collect();

    if computed.is_empty() {
        return documents.iter().map(|doc| project(doc, spec)).collect();
    }

    let mut projected = Vec::with_capacity(documents.len());
    for doc in documents {
        let mut out = Document::new();
        let include_id = spec.get(ID_FIELD).map(truthy).unwrap_or(true);
        if include_id {
            if let Some(id) = doc.get(ID_FIELD) {
                out.insert(ID_FIELD, id.clone());
            }
        }
        for (field, value) in spec {
            if field == ID_FIELD && value.as_document().is_none() && !matches!(value, Bson::String(_)) {
                continue;
            }
            match value {
                Bson::String(s) if s.starts_with('$') => set_path(&mut out, field, evaluate(doc, value))?,
                Bson::Document(_) => set_path(&mut out, field, evaluate(doc, value))?,
                flag if truthy(flag) => {
                    if let Some(current) = get_path(doc, field) {
                        set_path(&mut out, field, current.clone())?;
                    }
                }
                _ => {
                    return Err(OdmError::database(
                        "Cannot mix exclusion with computed fields in $project",
                    ))
                }
            }
        }
        projected.push(out);
    }
    Ok(projected)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
}

impl Accumulator {
    fn parse(name: &str) -> OdmResult<Self> {
        Ok(match name {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            other => {
                return Err(OdmError::database(format!(
                    "unknown group operator '{}'",
                    other
                )))
            }
        })
    }
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone)]
enum AccState {
    Sum(Number),
    Avg { total: Number, count: usize },
    Extreme(Option<Bson>),
    Pick(Option<Bson>),
    Push(Vec<Bson>),
}

impl AccState {
    fn new(accumulator: Accumulator) -> Self {
        match accumulator {
            Accumulator::Sum => AccState::Sum(Number::Int(0)),
            Accumulator::Avg => AccState::Avg {
                total: Number::Int(0),
                count: 0,
            },
            Accumulator::Min | Accumulator::Max => AccState::Extreme(None),
            Accumulator::First | Accumulator::Last => AccState::Pick(None),
            Accumulator::Push => AccState::Push(Vec::new()),
        }
    }

    fn feed(&mut self, accumulator: Accumulator, value: Bson) {
        match self {
            AccState::Sum(total) => {
                if let Some(n) = Number::from_bson(&value) {
                    *total = *total + n;
                }
            }
            AccState::Avg { total, count } => {
                if let Some(n) = Number::from_bson(&value) {
                    *total = *total + n;
                    *count += 1;
                }
            }
            AccState::Extreme(current) => {
                if matches!(value, Bson::Null | Bson::Undefined) {
                    return;
                }
                let wanted = if accumulator == Accumulator::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let replace = match current.as_ref() {
                    None => true,
                    Some(existing) => compare_bson(&value, existing) == wanted,
                };
                if replace {
                    *current = Some(value);
                }
            }
            AccState::Pick(current) => {
                if accumulator == Accumulator::Last || current.is_none() {
                    *current = Some(value);
                }
            }
            AccState::Push(items) => items.push(value),
        }
    }

    fn finish(self) -> Bson {
        match self {
            AccState::Sum(total) => total.to_bson(),
            AccState::Avg { total, count } if count > 0 => Bson::Double(total.as_f64() / count as f64),
            AccState::Avg { .. } => Bson::Null,
            AccState::Extreme(value) | AccState::Pick(value) => value.unwrap_or(Bson::Null),
            AccState::Push(items) => Bson::Array(items),
        }
    }
}

fn group_stage(documents: &[Document], spec: &Document) -> OdmResult<Vec<Document>> {
    let key_expression = spec
        .get(ID_FIELD)
        .ok_or_else(|| OdmError::database("a group specification must include an _id"))?;

    let mut fields = Vec::new();
    for (field, definition) in spec.iter().filter(|(field, _)| field.as_str() != ID_FIELD) {
        let (op, expression) = match definition.as_document().and_then(|d| d.iter().next()) {
            Some(entry) => entry,
            None => {
                return Err(OdmError::database(format!(
                    "The field '{}' must be an accumulator object",
                    field
                )))
            }
        };
        fields.push((field.clone(), Accumulator::parse(op)?, expression.clone()));
    }

    // groups keep first-seen order
    let mut groups: Vec<(Bson, Vec<AccState>)> = Vec::new();
    for doc in documents {
        let key = evaluate(doc, key_expression);
        let index = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(index) => index,
            None => {
                let states = fields.iter().map(|(_, acc, _)| AccState::new(*acc)).collect();
                groups.push((key, states));
                groups.len() - 1
            }
        };

        let states = &mut groups[index].1;
        for ((_, accumulator, expression), state) in fields.iter().zip(states.iter_mut()) {
            state.feed(*accumulator, evaluate(doc, expression));
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut out = Document::new();
            out.insert(ID_FIELD, key);
            for ((field, _, _), state) in fields.iter().zip(states) {
                out.insert(field.clone(), state.finish());
            }
            out
        })
        .collect())
}
