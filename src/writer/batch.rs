// src/writer/batch.rs

use arrow::{
    array::{
        ArrayRef, BooleanBuilder, Date32Builder, Decimal128Builder, Float64Builder, Int64Builder,
        StringBuilder, TimestampMicrosecondBuilder,
    },
    datatypes::SchemaRef,
    error::ArrowError,
    record_batch::RecordBatch,
};
use chrono::Datelike;
use std::sync::Arc;

use crate::calculator::{ValidatedRecord, Value};
use crate::schema::{FieldType, Schema};

/// `NaiveDate::num_days_from_ce` of 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn mismatch(field: &str, ty: FieldType, value: &Value) -> ArrowError {
    ArrowError::InvalidArgumentError(format!(
        "column `{field}` is {ty} but holds {value:?}"
    ))
}

/// Build one Arrow column from the `index`-th value of every record.
fn build_column(
    records: &[ValidatedRecord],
    index: usize,
    name: &str,
    ty: FieldType,
) -> Result<ArrayRef, ArrowError> {
    let cells = records.iter().map(|r| &r.values()[index]);
    let len = records.len();

    // append each cell, or null, or bail out on a type mismatch
    macro_rules! fill {
        ($builder:expr, $($pat:pat => $val:expr),+ $(,)?) => {{
            let mut b = $builder;
            for cell in cells {
                match cell {
                    Value::Null => b.append_null(),
                    $($pat => b.append_value($val),)+
                    other => return Err(mismatch(name, ty, other)),
                }
            }
            Arc::new(b.finish()) as ArrayRef
        }};
    }

    let array = match ty {
        FieldType::Integer => fill!(Int64Builder::with_capacity(len), Value::Integer(v) => *v),
        FieldType::Decimal { precision, scale } => {
            let mut b = Decimal128Builder::with_capacity(len)
                .with_precision_and_scale(precision, scale as i8)?;
            for cell in cells {
                match cell {
                    Value::Null => b.append_null(),
                    Value::Decimal(d) => match d.rescale(scale) {
                        Some(d) => b.append_value(d.mantissa),
                        None => return Err(mismatch(name, ty, cell)),
                    },
                    other => return Err(mismatch(name, ty, other)),
                }
            }
            Arc::new(b.finish()) as ArrayRef
        }
        FieldType::Float => fill!(Float64Builder::with_capacity(len), Value::Float(v) => *v),
        FieldType::String => fill!(
            StringBuilder::with_capacity(len, len * 16),
            Value::Text(s) => s.as_str()
        ),
        FieldType::Boolean => fill!(BooleanBuilder::with_capacity(len), Value::Boolean(v) => *v),
        FieldType::Date => fill!(
            Date32Builder::with_capacity(len),
            Value::Date(d) => d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE
        ),
        FieldType::DateTime => fill!(
            TimestampMicrosecondBuilder::with_capacity(len),
            Value::DateTime(dt) => dt.and_utc().timestamp_micros()
        ),
    };
    Ok(array)
}

/// Convert a slice of validated records into one `RecordBatch` laid out as
/// `arrow_schema`, which must be the Arrow mirror of `schema`.
pub fn records_to_batch(
    schema: &Schema,
    arrow_schema: &SchemaRef,
    records: &[ValidatedRecord],
) -> Result<RecordBatch, ArrowError> {
    let columns = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| build_column(records, i, &f.name, f.ty))
        .collect::<Result<Vec<_>, _>>()?;
    RecordBatch::try_new(Arc::clone(arrow_schema), columns)
}
