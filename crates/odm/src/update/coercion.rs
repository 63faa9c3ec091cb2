//! Type coercion of attribute values before they are stored
//!
//! Only textual values are touched: date attributes are parsed into BSON
//! datetimes, identifier attributes into ObjectIds and atomic attributes
//! into numbers.

use bson::{Bson, Document};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::{OdmError, OdmResult, ValidationError};
use crate::identifier;
use crate::model::{AttributeDescriptor, AttributeRegistry};
use crate::update::numeric::parse_atomic;

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Coerce one value according to its descriptor.
///
/// Unparseable dates and non-numeric atomics are attribute errors; malformed
/// identifiers fail with `InvalidIdentifier`.
pub fn coerce_value(descriptor: Option<&AttributeDescriptor>, attr: &str, value: Bson) -> OdmResult<Bson> {
    let descriptor = match descriptor {
        Some(descriptor) => descriptor,
        None => return Ok(value),
    };

    match value {
        Bson::String(text) if descriptor.attr_type.is_date() => match parse_date(&text) {
            Some(date) => Ok(Bson::DateTime(date)),
            None => Err(OdmError::Validation(ValidationError::new(
                attr,
                format!("{} is not a valid date", attr),
            ))),
        },
        Bson::String(_) if descriptor.is_identifier() => identifier::coerce_id_value(value),
        Bson::String(_) if descriptor.atomic => match parse_atomic(&value) {
            Some(number) => Ok(number.to_bson()),
            None => Err(OdmError::Validation(ValidationError::new(
                attr,
                format!("Atomic property {} set to NaN", attr),
            ))),
        },
        other => Ok(other),
    }
}

/// Coerce every declared attribute of a document about to be inserted
pub fn coerce_document(doc: Document, registry: &AttributeRegistry) -> OdmResult<Document> {
    let mut coerced = Document::new();
    for (attr, value) in doc {
        let value = if registry.is_primary_key(&attr) && registry.primary_key_is_identifier() {
            identifier::coerce_id_value(value)?
        } else {
            coerce_value(registry.get(&attr), &attr, value)?
        };
        coerced.insert(attr, value);
    }
    Ok(coerced)
}

/// Parse the textual date forms accepted for date attributes
pub fn parse_date(text: &str) -> Option<bson::DateTime> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(to_bson_datetime(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(to_bson_datetime(dt.with_timezone(&Utc)));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(to_bson_datetime(naive.and_utc()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|naive| to_bson_datetime(naive.and_utc()));
    }
    None
}

fn to_bson_datetime(dt: DateTime<Utc>) -> bson::DateTime {
    bson::DateTime::from_millis(dt.timestamp_millis())
}
