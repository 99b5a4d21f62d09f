pub mod arrow;
pub mod registry;
pub mod types;

pub use self::arrow::{build_arrow_schema, map_to_arrow_type};
pub use registry::SchemaRegistry;
pub use types::{Field, FieldType, Schema, SchemaDef};
