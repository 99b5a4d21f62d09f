//! The coercion table: how a value of one kind becomes a value of a declared
//! field type. Every `(ValueKind, FieldType)` pair maps to exactly one [`Rule`];
//! a conversion is only performed when it is lossless and unambiguous.

use chrono::NaiveTime;

use super::parse;
use super::record::{Decimal, Value, ValueKind};
use crate::config::TransformParams;
use crate::error::RejectReason;
use crate::schema::FieldType;

/// Largest integer magnitude an f64 represents exactly.
const F64_EXACT_INT: i64 = 1 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Same representation; decimals are still checked against precision/scale.
    Identity,
    /// Parse text using the configured formats and separators.
    Parse,
    /// Move to a wider representation (integer → decimal, date → datetime).
    Widen,
    /// Move to a narrower one, only when nothing is lost (7.00 → 7).
    Narrow,
    /// Format as text.
    Render,
    /// No conversion exists.
    Reject,
}

/// Rule for converting a `source` value into a field of type `target`.
pub fn rule(source: ValueKind, target: FieldType) -> Rule {
    use FieldType as T;
    use ValueKind as K;

    match (source, target) {
        // nulls are resolved against nullability before coercion
        (K::Null, _) => Rule::Reject,

        (K::Text, T::String) => Rule::Identity,
        (K::Text, _) => Rule::Parse,

        (K::Integer, T::Integer) => Rule::Identity,
        (K::Integer, T::Decimal { .. } | T::Float) => Rule::Widen,
        (K::Integer, T::String) => Rule::Render,

        (K::Decimal, T::Decimal { .. }) => Rule::Identity,
        (K::Decimal, T::Integer) => Rule::Narrow,
        (K::Decimal, T::String) => Rule::Render,

        (K::Float, T::Float) => Rule::Identity,
        (K::Float, T::Integer) => Rule::Narrow,
        (K::Float, T::String) => Rule::Render,

        (K::Boolean, T::Boolean) => Rule::Identity,
        (K::Boolean, T::String) => Rule::Render,

        (K::Date, T::Date) => Rule::Identity,
        (K::Date, T::DateTime) => Rule::Widen,
        (K::Date, T::String) => Rule::Render,

        (K::DateTime, T::DateTime) => Rule::Identity,
        (K::DateTime, T::Date) => Rule::Narrow,
        (K::DateTime, T::String) => Rule::Render,

        // decimal/float → float/decimal is binary-vs-decimal ambiguous;
        // everything else has no meaningful conversion
        _ => Rule::Reject,
    }
}

/// Coerce `value` into `target` following [`rule`].
pub fn coerce(
    value: &Value,
    target: FieldType,
    params: &TransformParams,
) -> Result<Value, RejectReason> {
    let converted = match rule(value.kind(), target) {
        Rule::Identity => identity(value, target),
        Rule::Parse => match value {
            Value::Text(s) => parse_text(s, target, params),
            _ => None,
        },
        Rule::Widen => widen(value, target),
        Rule::Narrow => narrow(value),
        Rule::Render => Some(Value::Text(value.to_string())),
        Rule::Reject => None,
    };

    converted.ok_or_else(|| RejectReason::Unconvertible {
        value: value.to_string(),
        target: target.to_string(),
    })
}

fn identity(value: &Value, target: FieldType) -> Option<Value> {
    match (value, target) {
        (Value::Text(s), FieldType::String) => Some(Value::Text(parse::clean_str(s).to_string())),
        (Value::Decimal(d), FieldType::Decimal { precision, scale }) => {
            fit_decimal(*d, precision, scale).map(Value::Decimal)
        }
        _ => Some(value.clone()),
    }
}

fn parse_text(s: &str, target: FieldType, p: &TransformParams) -> Option<Value> {
    let (dec, thousands) = (p.decimal_separator, p.thousands_separator);
    match target {
        FieldType::Integer => parse::parse_integer(s, dec, thousands).map(Value::Integer),
        FieldType::Decimal { precision, scale } => parse::parse_decimal(s, dec, thousands)
            .and_then(|d| fit_decimal(d, precision, scale))
            .map(Value::Decimal),
        FieldType::Float => parse::parse_float(s, dec, thousands).map(Value::Float),
        FieldType::Boolean => parse::parse_bool(s).map(Value::Boolean),
        FieldType::Date => parse::parse_date(s, &p.date_format).map(Value::Date),
        FieldType::DateTime => parse::parse_datetime(s, &p.datetime_format).map(Value::DateTime),
        FieldType::String => Some(Value::Text(parse::clean_str(s).to_string())),
    }
}

fn widen(value: &Value, target: FieldType) -> Option<Value> {
    match (value, target) {
        (Value::Integer(i), FieldType::Decimal { precision, scale }) => {
            fit_decimal(Decimal::new(i128::from(*i), 0), precision, scale).map(Value::Decimal)
        }
        (Value::Integer(i), FieldType::Float) => {
            (i.unsigned_abs() <= F64_EXACT_INT as u64).then(|| Value::Float(*i as f64))
        }
        (Value::Date(d), FieldType::DateTime) => Some(Value::DateTime(d.and_time(NaiveTime::MIN))),
        _ => None,
    }
}

fn narrow(value: &Value) -> Option<Value> {
    match value {
        Value::Decimal(d) => d
            .rescale(0)
            .and_then(|d| i64::try_from(d.mantissa).ok())
            .map(Value::Integer),
        Value::Float(f) => {
            let exact = f.fract() == 0.0 && f.abs() <= F64_EXACT_INT as f64;
            exact.then(|| Value::Integer(*f as i64))
        }
        Value::DateTime(dt) => (dt.time() == NaiveTime::MIN).then(|| Value::Date(dt.date())),
        _ => None,
    }
}

/// Bring `d` to exactly `scale` fractional digits within `precision` total digits.
fn fit_decimal(d: Decimal, precision: u8, scale: u8) -> Option<Decimal> {
    let d = d.rescale(scale)?;
    (d.digits() <= u32::from(precision)).then_some(d)
}
