// src/calculator/record.rs

use chrono::{NaiveDate, NaiveDateTime};
use std::{fmt, path::PathBuf, sync::Arc};

use crate::schema::Schema;

/// Fixed-point number: `mantissa / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    pub mantissa: i128,
    pub scale: u8,
}

impl Decimal {
    pub fn new(mantissa: i128, scale: u8) -> Self {
        Self { mantissa, scale }
    }

    /// Number of decimal digits in the mantissa (at least 1).
    pub fn digits(&self) -> u32 {
        self.mantissa
            .unsigned_abs()
            .checked_ilog10()
            .map_or(1, |d| d + 1)
    }

    /// Re-express at `scale` without losing information, if possible.
    pub fn rescale(&self, scale: u8) -> Option<Decimal> {
        if scale >= self.scale {
            let factor = 10i128.checked_pow(u32::from(scale - self.scale))?;
            Some(Decimal::new(self.mantissa.checked_mul(factor)?, scale))
        } else {
            let factor = 10i128.checked_pow(u32::from(self.scale - scale))?;
            (self.mantissa % factor == 0).then(|| Decimal::new(self.mantissa / factor, scale))
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let abs = self.mantissa.unsigned_abs();
        if self.scale == 0 {
            return write!(f, "{sign}{abs}");
        }
        let factor = 10u128.pow(u32::from(self.scale));
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / factor,
            abs % factor,
            width = self.scale as usize
        )
    }
}

/// A single cell. Raw records from CSV hold `Text`; validated records hold the
/// variant matching their field's declared type, or `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

/// Discriminant of [`Value`], the row axis of the coercion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Text,
    Integer,
    Decimal,
    Float,
    Boolean,
    Date,
    DateTime,
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Text(_) => ValueKind::Text,
            Value::Integer(_) => ValueKind::Integer,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Float(_) => ValueKind::Float,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Date(_) => ValueKind::Date,
            Value::DateTime(_) => ValueKind::DateTime,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Text(s) => f.write_str(s),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

/// Where a raw record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub source: PathBuf,
    pub line: u64,
}

/// An untyped input row. Column names are unique.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based position across all inputs, in read order.
    pub position: u64,
    pub origin: Option<Origin>,
    columns: Vec<(String, Value)>,
}

impl RawRecord {
    pub fn new(position: u64) -> Self {
        Self {
            position,
            origin: None,
            columns: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Builder-style [`RawRecord::set`].
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Insert or replace `name`; a replaced column keeps its place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.columns.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(idx).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub(crate) fn columns_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.columns.iter_mut().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A row conforming to one schema: one value per field, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    values: Vec<Value>,
}

impl ValidatedRecord {
    pub(crate) fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get<'a>(&'a self, schema: &Schema, field: &str) -> Option<&'a Value> {
        schema.index_of(field).and_then(|i| self.values.get(i))
    }

    /// Turn back into a raw record keyed by `schema`'s field names, keeping
    /// the typed values. Null fields are left out.
    pub fn to_raw(&self, schema: &Schema, position: u64) -> RawRecord {
        schema
            .fields()
            .iter()
            .zip(&self.values)
            .filter(|(_, v)| !v.is_null())
            .fold(RawRecord::new(position), |rec, (f, v)| {
                rec.with(f.name.clone(), v.clone())
            })
    }
}

/// Ordered validated records sharing one schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Arc<Schema>,
    records: Vec<ValidatedRecord>,
}

impl Dataset {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            records: Vec::new(),
        }
    }

    /// Append a record. Its arity must match the schema.
    pub(crate) fn push(&mut self, record: ValidatedRecord) {
        debug_assert_eq!(record.values.len(), self.schema.len());
        self.records.push(record);
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn records(&self) -> &[ValidatedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
