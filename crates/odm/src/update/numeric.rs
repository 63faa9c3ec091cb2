//! Numeric parsing for atomic attributes
//!
//! Atomic values may arrive as numbers or as text. Text that looks like a
//! float (`digits.digits`) or scientific notation (`digits.digitse digits`)
//! is read as a float prefix, anything else as a base-10 integer prefix.

use std::fmt;
use std::ops::{Add, Sub};

use bson::Bson;
use once_cell::sync::Lazy;
use regex::Regex;

static FLOAT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]*\.[0-9]*").expect("valid float pattern"));

static SCIENTIFIC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9.]+e[0-9]+").expect("valid scientific pattern"));

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(?:Infinity|(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)")
        .expect("valid float prefix pattern")
});

static INTEGER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]?[0-9]+").expect("valid integer prefix pattern"));

/// A parsed atomic value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    /// Read a number stored natively in a document
    pub fn from_bson(value: &Bson) -> Option<Number> {
        match value {
            Bson::Int32(i) => Some(Number::Int(*i as i64)),
            Bson::Int64(i) => Some(Number::Int(*i)),
            Bson::Double(f) if !f.is_nan() => Some(Number::Float(*f)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    /// Integers that fit 32 bits are stored as such, matching `doc!` literals
    pub fn to_bson(self) -> Bson {
        match self {
            Number::Int(i) => match i32::try_from(i) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(i),
            },
            Number::Float(f) => Bson::Double(f),
        }
    }
}

impl Add for Number {
    type Output = Number;

    fn add(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => match a.checked_add(b) {
                Some(sum) => Number::Int(sum),
                None => Number::Float(a as f64 + b as f64),
            },
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl Sub for Number {
    type Output = Number;

    fn sub(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => match a.checked_sub(b) {
                Some(delta) => Number::Int(delta),
                None => Number::Float(a as f64 - b as f64),
            },
            (a, b) => Number::Float(a.as_f64() - b.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Int(value as i64)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

/// Parse the value assigned to an atomic attribute. `None` means NaN.
pub fn parse_atomic(value: &Bson) -> Option<Number> {
    if let Some(number) = Number::from_bson(value) {
        return Some(number);
    }

    let text = match value {
        Bson::String(s) => s.clone(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Null | Bson::Undefined => "null".to_string(),
        Bson::Double(_) => return None,
        other => other.to_string(),
    };

    if FLOAT_PATTERN.is_match(&text) || SCIENTIFIC_PATTERN.is_match(&text) {
        parse_float_prefix(&text).map(Number::Float)
    } else {
        parse_int_prefix(&text)
    }
}

/// Longest leading float literal, after leading whitespace
fn parse_float_prefix(text: &str) -> Option<f64> {
    let trimmed = text.trim_start();
    let literal = FLOAT_PREFIX.find(trimmed)?.as_str();
    literal.parse::<f64>().ok().filter(|f| !f.is_nan())
}

/// Leading base-10 integer, after leading whitespace
fn parse_int_prefix(text: &str) -> Option<Number> {
    let trimmed = text.trim_start();
    let literal = INTEGER_PREFIX.find(trimmed)?.as_str();
    match literal.parse::<i64>() {
        Ok(i) => Some(Number::Int(i)),
        Err(_) => literal.parse::<f64>().ok().map(Number::Float),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_numbers() {
        assert_eq!(parse_atomic(&Bson::Int32(35)), Some(Number::Int(35)));
        assert_eq!(parse_atomic(&Bson::Int64(1 << 40)), Some(Number::Int(1 << 40)));
        assert_eq!(parse_atomic(&Bson::Double(2.5)), Some(Number::Float(2.5)));
        assert_eq!(parse_atomic(&Bson::Double(f64::NAN)), None);
    }

    #[test]
    fn test_integer_text() {
        assert_eq!(parse_atomic(&Bson::String("40".into())), Some(Number::Int(40)));
        assert_eq!(parse_atomic(&Bson::String("  -7".into())), Some(Number::Int(-7)));
        assert_eq!(parse_atomic(&Bson::String("12abc".into())), Some(Number::Int(12)));
    }

    #[test]
    fn test_float_and_scientific_text() {
        assert_eq!(parse_atomic(&Bson::String("3.25".into())), Some(Number::Float(3.25)));
        assert_eq!(parse_atomic(&Bson::String("1.5e3".into())), Some(Number::Float(1500.0)));
        assert_eq!(parse_atomic(&Bson::String("2e2".into())), Some(Number::Float(200.0)));
        assert_eq!(parse_atomic(&Bson::String(".5".into())), Some(Number::Float(0.5)));
    }

    #[test]
    fn test_not_a_number() {
        assert_eq!(parse_atomic(&Bson::String("lots".into())), None);
        assert_eq!(parse_atomic(&Bson::String("".into())), None);
        assert_eq!(parse_atomic(&Bson::String("abc.".into())), None);
        assert_eq!(parse_atomic(&Bson::Boolean(true)), None);
        assert_eq!(parse_atomic(&Bson::Null), None);
    }

    #[test]
    fn test_subtraction_keeps_integers() {
        assert_eq!(Number::Int(40) - Number::Int(35), Number::Int(5));
        assert_eq!(Number::Float(2.5) - Number::Int(1), Number::Float(1.5));
        assert_eq!(
            Number::Int(i64::MIN) - Number::Int(1),
            Number::Float(i64::MIN as f64 - 1.0)
        );
    }

    #[test]
    fn test_to_bson_width() {
        assert_eq!(Number::Int(5).to_bson(), Bson::Int32(5));
        assert_eq!(Number::Int(1 << 40).to_bson(), Bson::Int64(1 << 40));
        assert_eq!(Number::Float(0.5).to_bson(), Bson::Double(0.5));
    }
}
