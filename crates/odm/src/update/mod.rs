//! Update translation: from dirty instance state to database mutations
//!
//! - `translator`: per-field treatment of dirty attributes
//! - `mutation`: the `$set` / `$inc` / `$unset` grouping
//! - `numeric`: parsing of atomic values
//! - `coercion`: date and identifier coercion of stored values

pub mod coercion;
pub mod mutation;
pub mod numeric;
pub mod translator;

pub use coercion::{coerce_document, coerce_value, parse_date};
pub use mutation::MutationDocument;
pub use numeric::{parse_atomic, Number};
pub use translator::{translate, Translation};
