// src/config/types.rs

use serde::{Deserialize, Deserializer};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// Columnar format of the output artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Parquet,
    #[serde(alias = "ipc", alias = "arrow")]
    ArrowIpc,
}

impl OutputFormat {
    /// File extension used for generated file names.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Parquet => "parquet",
            OutputFormat::ArrowIpc => "arrow",
        }
    }
}

/// What happens to a record that fails validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRecordPolicy {
    /// Skip the record, count it, keep going.
    #[default]
    Drop,
    /// Stop the run at the first invalid record.
    Abort,
}

/// How a header naming the same column twice is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateColumnPolicy {
    /// The right-most occurrence supplies the value.
    #[default]
    LastWins,
    /// The left-most occurrence supplies the value.
    FirstWins,
    /// The input is unreadable.
    Error,
}

/// How raw columns the schema does not declare are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownColumnPolicy {
    #[default]
    Ignore,
    Reject,
}

/// Parquet page compression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    Uncompressed,
    #[default]
    Snappy,
    Zstd,
    Brotli,
}

macro_rules! display_as_debug_snake {
    ($($ty:ty),*) => {$(
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let name = format!("{self:?}");
                let mut out = String::with_capacity(name.len() + 4);
                for (i, ch) in name.chars().enumerate() {
                    if ch.is_ascii_uppercase() && i > 0 {
                        out.push('_');
                    }
                    out.push(ch.to_ascii_lowercase());
                }
                f.write_str(&out)
            }
        }
    )*};
}

display_as_debug_snake!(
    OutputFormat,
    InvalidRecordPolicy,
    DuplicateColumnPolicy,
    UnknownColumnPolicy,
    Compression
);

/// Country-specific transform parameters. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TransformParams {
    /// Raw column name → schema field name.
    pub rename: BTreeMap<String, String>,
    /// Raw columns removed before anything else happens.
    pub drop: Vec<String>,
    /// Values used when a field is absent or null, keyed by schema field name.
    pub defaults: BTreeMap<String, String>,
    /// Fields normalised to upper-case three-letter currency codes.
    pub currency_columns: Vec<String>,
    /// Raw tokens read as null.
    pub null_values: Vec<String>,
    /// `chrono` format for `date` fields.
    pub date_format: String,
    /// `chrono` format for `datetime` fields.
    pub datetime_format: String,
    pub decimal_separator: char,
    pub thousands_separator: Option<char>,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            rename: BTreeMap::new(),
            drop: Vec::new(),
            defaults: BTreeMap::new(),
            currency_columns: Vec::new(),
            null_values: vec![String::new(), "NA".into(), "NULL".into()],
            date_format: "%Y-%m-%d".into(),
            datetime_format: "%Y-%m-%d %H:%M:%S".into(),
            decimal_separator: '.',
            thousands_separator: None,
        }
    }
}

impl TransformParams {
    pub fn is_null_token(&self, s: &str) -> bool {
        self.null_values.iter().any(|n| n == s)
    }
}

/// Sources and target of the product sales index. Each source accepts the
/// same forms as `input_path`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexConfig {
    #[serde(deserialize_with = "one_or_many")]
    pub orders: Vec<PathBuf>,
    #[serde(deserialize_with = "one_or_many")]
    pub customers: Vec<PathBuf>,
    #[serde(deserialize_with = "one_or_many")]
    pub order_items: Vec<PathBuf>,
    #[serde(deserialize_with = "one_or_many")]
    pub order_reviews: Vec<PathBuf>,
    /// A single file, or a directory of `product_id=<id>` partitions.
    pub output_path: PathBuf,
    /// Product ids to keep. Empty keeps every product.
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub partition_by_product: bool,
}

/// `input_path` accepts a single path or a list of paths.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged, expecting = "a path or a list of paths")]
    enum OneOrMany {
        One(PathBuf),
        Many(Vec<PathBuf>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(p) => vec![p],
        OneOrMany::Many(ps) => ps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_display() {
        assert_eq!(InvalidRecordPolicy::Drop.to_string(), "drop");
        assert_eq!(DuplicateColumnPolicy::LastWins.to_string(), "last_wins");
        assert_eq!(OutputFormat::ArrowIpc.to_string(), "arrow_ipc");
        assert_eq!(OutputFormat::ArrowIpc.extension(), "arrow");
    }

    #[test]
    fn test_index_sources_accept_one_or_many() -> anyhow::Result<()> {
        let index: IndexConfig = serde_yaml::from_str(
            "orders: o.csv\ncustomers: [c1.csv, c2.csv]\norder_items: i.zip\norder_reviews: r.csv\noutput_path: out\n",
        )?;
        assert_eq!(index.orders, vec![PathBuf::from("o.csv")]);
        assert_eq!(index.customers.len(), 2);
        assert!(index.products.is_empty());
        assert!(!index.partition_by_product);
        Ok(())
    }

    #[test]
    fn test_transform_defaults() -> anyhow::Result<()> {
        let params: TransformParams = serde_yaml::from_str("decimal_separator: ','")?;
        assert_eq!(params.decimal_separator, ',');
        assert_eq!(params.date_format, "%Y-%m-%d");
        assert!(params.is_null_token(""));
        assert!(params.is_null_token("NA"));
        assert!(!params.is_null_token("na"));
        Ok(())
    }
}
