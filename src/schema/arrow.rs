// src/schema/arrow.rs

use arrow::datatypes::{DataType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use std::{collections::HashMap, sync::Arc};

use super::types::{FieldType, Schema};

/// Key under which the schema name is stored in the output file metadata.
pub const SCHEMA_NAME_KEY: &str = "sales_etl.schema";

/// Map a declared field type onto its Arrow storage type.
///
/// - integer        → Int64
/// - decimal(p, s)  → Decimal128(p, s)
/// - float          → Float64
/// - string         → Utf8
/// - boolean        → Boolean
/// - date           → Date32
/// - datetime       → Timestamp(µs, no zone)
pub fn map_to_arrow_type(ty: FieldType) -> DataType {
    match ty {
        FieldType::Integer => DataType::Int64,
        FieldType::Decimal { precision, scale } => DataType::Decimal128(precision, scale as i8),
        FieldType::Float => DataType::Float64,
        FieldType::String => DataType::Utf8,
        FieldType::Boolean => DataType::Boolean,
        FieldType::Date => DataType::Date32,
        FieldType::DateTime => DataType::Timestamp(TimeUnit::Microsecond, None),
    }
}

/// Build an ArrowSchema (inside an Arc) mirroring `schema` column for column.
pub fn build_arrow_schema(schema: &Schema) -> Arc<ArrowSchema> {
    let fields: Vec<ArrowField> = schema
        .fields()
        .iter()
        .map(|f| ArrowField::new(&f.name, map_to_arrow_type(f.ty), f.nullable))
        .collect();

    let metadata = HashMap::from([(SCHEMA_NAME_KEY.to_string(), schema.name().to_string())]);
    Arc::new(ArrowSchema::new_with_metadata(fields, metadata))
}
