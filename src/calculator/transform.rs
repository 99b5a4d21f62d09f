// src/calculator/transform.rs

use once_cell::sync::Lazy;
use regex::Regex;

use super::coerce::coerce;
use super::parse::clean_str;
use super::record::{RawRecord, ValidatedRecord, Value};
use crate::config::{Configuration, UnknownColumnPolicy};
use crate::error::{RecordError, RejectReason};
use crate::schema::Schema;

static CURRENCY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());

/// Result of transforming one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted(ValidatedRecord),
    Rejected(RecordError),
    /// Outside the configured row filters. Not a validation failure.
    Filtered,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted(_))
    }
}

/// Map one raw record onto `schema`.
///
/// Rules run in a fixed order: dropped columns, renames, null tokens,
/// defaults, currency normalisation, row filters, the unknown-column policy,
/// and finally per-field coercion. Filters on currency columns ignore case. The first failing field decides the
/// rejection. Applying this to a record that already conforms yields the
/// same record.
pub fn transform(mut raw: RawRecord, config: &Configuration, schema: &Schema) -> Outcome {
    let params = &config.transform;

    for column in &params.drop {
        raw.remove(column);
    }

    for (from, to) in &params.rename {
        if from == to {
            continue;
        }
        if let Some(value) = raw.remove(from) {
            raw.set(to.clone(), value);
        }
    }

    for value in raw.columns_mut() {
        if let Value::Text(s) = value {
            if params.is_null_token(clean_str(s)) {
                *value = Value::Null;
            }
        }
    }

    for (field, default) in &params.defaults {
        if raw.get(field).map_or(true, Value::is_null) {
            raw.set(field.clone(), Value::Text(default.clone()));
        }
    }

    for field in &params.currency_columns {
        let code = match raw.get(field) {
            None | Some(Value::Null) => continue,
            Some(value) => clean_str(&value.to_string()).to_ascii_uppercase(),
        };
        if !CURRENCY_CODE.is_match(&code) {
            return Outcome::Rejected(RecordError::new(
                field.as_str(),
                RejectReason::BadCurrency(code),
            ));
        }
        raw.set(field.clone(), Value::Text(code));
    }

    for (field, allowed) in &config.filters {
        let keep = match raw.get(field) {
            None | Some(Value::Null) => false,
            Some(value) => {
                let rendered = value.to_string();
                let rendered = clean_str(&rendered);
                if params.currency_columns.contains(field) {
                    allowed.iter().any(|a| a.trim().eq_ignore_ascii_case(rendered))
                } else {
                    allowed.iter().any(|a| a.trim() == rendered)
                }
            }
        };
        if !keep {
            return Outcome::Filtered;
        }
    }

    if config.unknown_columns == UnknownColumnPolicy::Reject {
        if let Some((name, _)) = raw.columns().find(|(n, _)| schema.field(n).is_none()) {
            return Outcome::Rejected(RecordError::new(name, RejectReason::UnknownColumn));
        }
    }

    let mut values = Vec::with_capacity(schema.len());
    for field in schema.fields() {
        let value = match raw.get(&field.name) {
            None if field.nullable => Value::Null,
            None => {
                return Outcome::Rejected(RecordError::new(
                    field.name.as_str(),
                    RejectReason::Missing,
                ))
            }
            Some(Value::Null) if field.nullable => Value::Null,
            Some(Value::Null) => {
                return Outcome::Rejected(RecordError::new(
                    field.name.as_str(),
                    RejectReason::Null,
                ))
            }
            Some(v) => match coerce(v, field.ty, params) {
                Ok(v) => v,
                Err(reason) => {
                    return Outcome::Rejected(RecordError::new(field.name.as_str(), reason))
                }
            },
        };
        values.push(value);
    }

    Outcome::Accepted(ValidatedRecord::new(values))
}
