// src/schema/types.rs

use serde::Deserialize;
use std::{collections::HashSet, fmt};

use crate::error::{EtlError, Result};

const MAX_DECIMAL_PRECISION: u8 = 38;
const DEFAULT_PRECISION: u8 = 18;
const DEFAULT_SCALE: u8 = 2;

/// Declared type of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Integer,
    /// Fixed point: `precision` significant digits, `scale` of them fractional.
    Decimal { precision: u8, scale: u8 },
    Float,
    String,
    Boolean,
    Date,
    DateTime,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Integer => f.write_str("integer"),
            FieldType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            FieldType::Float => f.write_str("float"),
            FieldType::String => f.write_str("string"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Date => f.write_str("date"),
            FieldType::DateTime => f.write_str("datetime"),
        }
    }
}

/// A single validated field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable,
        }
    }
}

/// Type names accepted in definition files.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TypeName {
    #[serde(alias = "int", alias = "int64", alias = "bigint")]
    Integer,
    #[serde(alias = "numeric")]
    Decimal,
    #[serde(alias = "double", alias = "float64", alias = "float32")]
    Float,
    #[serde(alias = "str", alias = "utf8", alias = "varchar")]
    String,
    #[serde(alias = "bool")]
    Boolean,
    Date,
    #[serde(alias = "timestamp")]
    Datetime,
}

/// One field as written in a schema definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    ty: TypeName,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub precision: Option<u8>,
    #[serde(default)]
    pub scale: Option<u8>,
}

/// A schema definition file: `{name, countries?, fields}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDef {
    pub name: String,
    #[serde(default)]
    pub countries: Vec<String>,
    pub fields: Vec<FieldDef>,
}

impl SchemaDef {
    pub fn from_yaml_str(text: &str, origin: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| EtlError::schema(origin, e.to_string()))
    }

    pub fn from_json_str(text: &str, origin: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EtlError::schema(origin, e.to_string()))
    }
}

/// Named, ordered, immutable collection of field declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    name: String,
    countries: Vec<String>,
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, enforcing: at least one field, unique non-empty names,
    /// decimal precision in 1..=38 and scale no larger than precision.
    pub fn new(name: impl Into<String>, countries: Vec<String>, fields: Vec<Field>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(EtlError::schema("<unnamed>", "schema name is empty"));
        }
        if fields.is_empty() {
            return Err(EtlError::schema(&name, "schema declares no fields"));
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(EtlError::schema(&name, "field with empty name"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(EtlError::schema(
                    &name,
                    format!("field `{}` declared more than once", field.name),
                ));
            }
            if let FieldType::Decimal { precision, scale } = field.ty {
                if precision == 0 || precision > MAX_DECIMAL_PRECISION {
                    return Err(EtlError::schema(
                        &name,
                        format!("field `{}`: precision {precision} outside 1..=38", field.name),
                    ));
                }
                if scale > precision {
                    return Err(EtlError::schema(
                        &name,
                        format!(
                            "field `{}`: scale {scale} exceeds precision {precision}",
                            field.name
                        ),
                    ));
                }
            }
        }

        let countries = countries
            .into_iter()
            .map(|c| c.trim().to_ascii_uppercase())
            .collect();

        Ok(Self {
            name,
            countries,
            fields,
        })
    }

    pub fn from_def(def: SchemaDef) -> Result<Self> {
        let fields = def
            .fields
            .into_iter()
            .map(|fd| {
                let ty = match fd.ty {
                    TypeName::Integer => FieldType::Integer,
                    TypeName::Decimal => FieldType::Decimal {
                        precision: fd.precision.unwrap_or(DEFAULT_PRECISION),
                        scale: fd.scale.unwrap_or(DEFAULT_SCALE),
                    },
                    TypeName::Float => FieldType::Float,
                    TypeName::String => FieldType::String,
                    TypeName::Boolean => FieldType::Boolean,
                    TypeName::Date => FieldType::Date,
                    TypeName::Datetime => FieldType::DateTime,
                };
                if !matches!(ty, FieldType::Decimal { .. })
                    && (fd.precision.is_some() || fd.scale.is_some())
                {
                    return Err(EtlError::schema(
                        &def.name,
                        format!("field `{}`: precision/scale only apply to decimals", fd.name),
                    ));
                }
                Ok(Field::new(fd.name, ty, fd.nullable))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(def.name, def.countries, fields)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Country codes this schema is the default for (upper-case).
    pub fn countries(&self) -> &[String] {
        &self.countries
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;

    #[test]
    fn test_parse_definition() -> anyhow::Result<()> {
        let def = SchemaDef::from_yaml_str(
            r#"
name: sales_us
countries: [us]
fields:
  - { name: order_id, type: integer }
  - { name: amount, type: decimal, scale: 3 }
  - { name: note, type: str, nullable: true }
"#,
            "inline",
        )?;
        let schema = Schema::from_def(def)?;
        assert_eq!(schema.name(), "sales_us");
        assert_eq!(schema.countries(), ["US"]);
        assert_eq!(schema.len(), 3);
        assert_eq!(
            schema.field("amount").map(|f| f.ty),
            Some(FieldType::Decimal {
                precision: 18,
                scale: 3
            })
        );
        assert!(!schema.fields()[0].nullable);
        assert!(schema.fields()[2].nullable);
        assert_eq!(schema.index_of("note"), Some(2));
        Ok(())
    }

    #[test]
    fn test_zero_fields_rejected() {
        let err = Schema::new("empty", vec![], vec![]).unwrap_err();
        assert!(matches!(err, EtlError::SchemaValidation { .. }));
        assert_eq!(err.stage(), Stage::Schema);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let err = Schema::new(
            "dup",
            vec![],
            vec![
                Field::new("a", FieldType::Integer, false),
                Field::new("a", FieldType::String, true),
            ],
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_bad_decimal_rejected() {
        let err = Schema::new(
            "dec",
            vec![],
            vec![Field::new(
                "amount",
                FieldType::Decimal {
                    precision: 4,
                    scale: 6,
                },
                false,
            )],
        )
        .unwrap_err();
        assert!(err.to_string().contains("scale 6"));
    }

    #[test]
    fn test_unknown_type_name_rejected() {
        let err = SchemaDef::from_yaml_str(
            "name: x\nfields:\n  - { name: a, type: money }\n",
            "inline",
        )
        .unwrap_err();
        assert!(matches!(err, EtlError::SchemaValidation { .. }));
    }

    #[test]
    fn test_scale_on_string_rejected() {
        let def = SchemaDef::from_yaml_str(
            "name: x\nfields:\n  - { name: a, type: string, scale: 2 }\n",
            "inline",
        )
        .unwrap();
        assert!(Schema::from_def(def).is_err());
    }
}
