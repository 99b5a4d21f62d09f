//! Run configuration: a YAML document parsed once at startup into an
//! immutable, statically validated [`Configuration`].

pub mod types;

use chrono::format::{Item, StrftimeItems};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

use crate::error::{EtlError, Result};
use crate::schema::{FieldType, Schema};
pub use types::{
    Compression, DuplicateColumnPolicy, IndexConfig, InvalidRecordPolicy, OutputFormat,
    TransformParams, UnknownColumnPolicy,
};

/// Environment variable naming the configuration document.
pub const CONFIG_ENV: &str = "ETL_CONFIG";
/// Configuration document used when neither a flag nor `ETL_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

static COUNTRY_CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2,3}$").unwrap());

fn default_delimiter() -> char {
    ','
}

fn default_batch_size() -> usize {
    8192
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Upper-cased after load; selects the default schema.
    pub country_code: String,
    #[serde(deserialize_with = "types::one_or_many")]
    pub input_path: Vec<PathBuf>,
    pub output_path: PathBuf,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub schema_name: Option<String>,
    #[serde(default)]
    pub on_invalid_record: InvalidRecordPolicy,
    #[serde(default)]
    pub duplicate_columns: DuplicateColumnPolicy,
    #[serde(default)]
    pub unknown_columns: UnknownColumnPolicy,
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub compression: Compression,
    /// Schema field → accepted raw values. Records outside the list are filtered.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub transform: TransformParams,
    /// Optional weekly product sales index over the marketplace datasets.
    #[serde(default)]
    pub index: Option<IndexConfig>,
}

impl Configuration {
    /// Read and validate the document at `path`. Relative paths inside it are
    /// resolved against the document's directory.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| EtlError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml_str(&text, &path.display().to_string(), base_dir)
    }

    /// Parse a document. `origin` names it in error messages.
    pub fn from_yaml_str(text: &str, origin: &str, base_dir: &Path) -> Result<Self> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(text).map_err(|e| EtlError::ConfigParse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;

        match value {
            serde_yaml::Value::Mapping(_) => {}
            serde_yaml::Value::Null => {
                return Err(EtlError::ConfigValidation(format!("{origin} is empty")))
            }
            _ => {
                return Err(EtlError::ConfigValidation(format!(
                    "{origin} must be a mapping of options"
                )))
            }
        }

        let mut config: Configuration = serde_yaml::from_value(value)
            .map_err(|e| EtlError::ConfigValidation(format!("{origin}: {e}")))?;
        config.validate()?;
        config.resolve_paths(base_dir);
        debug!(
            country = %config.country_code,
            inputs = config.input_path.len(),
            output = %config.output_path.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn validate(&mut self) -> Result<()> {
        let invalid = |msg: String| Err(EtlError::ConfigValidation(msg));

        self.country_code = self.country_code.trim().to_ascii_uppercase();
        if !COUNTRY_CODE.is_match(&self.country_code) {
            return invalid(format!(
                "country_code {:?} must be two or three letters",
                self.country_code
            ));
        }
        if self.input_path.is_empty() {
            return invalid("input_path lists no inputs".into());
        }
        if self.input_path.iter().any(|p| p.as_os_str().is_empty()) {
            return invalid("input_path contains an empty path".into());
        }
        if self.output_path.as_os_str().is_empty() {
            return invalid("output_path is empty".into());
        }
        if self.schema_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return invalid("schema_name is empty".into());
        }
        if self.batch_size == 0 {
            return invalid("batch_size must be positive".into());
        }
        if !self.delimiter.is_ascii() {
            return invalid(format!("delimiter {:?} is not ASCII", self.delimiter));
        }

        let t = &self.transform;
        if Some(t.decimal_separator) == t.thousands_separator {
            return invalid("decimal_separator and thousands_separator are identical".into());
        }
        if t.decimal_separator.is_ascii_digit() || t.decimal_separator == '-' {
            return invalid(format!(
                "decimal_separator {:?} is not usable",
                t.decimal_separator
            ));
        }
        for (key, fmt) in [
            ("date_format", &t.date_format),
            ("datetime_format", &t.datetime_format),
        ] {
            if fmt.is_empty() || StrftimeItems::new(fmt).any(|i| matches!(i, Item::Error)) {
                return invalid(format!("transform.{key} {fmt:?} is not a valid format"));
            }
        }

        if let Some(index) = &self.index {
            for (key, paths) in [
                ("orders", &index.orders),
                ("customers", &index.customers),
                ("order_items", &index.order_items),
                ("order_reviews", &index.order_reviews),
            ] {
                if paths.is_empty() || paths.iter().any(|p| p.as_os_str().is_empty()) {
                    return invalid(format!("index.{key} needs at least one non-empty path"));
                }
            }
            if index.output_path.as_os_str().is_empty() {
                return invalid("index.output_path is empty".into());
            }
            if index.products.iter().any(|p| p.trim().is_empty()) {
                return invalid("index.products contains an empty id".into());
            }
        }

        let mut targets = HashSet::new();
        for (from, to) in &t.rename {
            if to.trim().is_empty() {
                return invalid(format!("transform.rename maps `{from}` to an empty name"));
            }
            if !targets.insert(to) {
                return invalid(format!(
                    "transform.rename maps several columns onto `{to}`"
                ));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        let resolve = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base_dir.join(p)
            }
        };
        self.input_path = self.input_path.iter().map(|p| resolve(p)).collect();
        self.output_path = resolve(&self.output_path);
        self.schema_dir = self.schema_dir.as_deref().map(resolve);
        if let Some(index) = self.index.as_mut() {
            for paths in [
                &mut index.orders,
                &mut index.customers,
                &mut index.order_items,
                &mut index.order_reviews,
            ] {
                *paths = paths.iter().map(|p| resolve(p)).collect();
            }
            index.output_path = resolve(&index.output_path);
        }
    }

    /// Reject transform parameters that name fields `schema` does not declare.
    pub fn check_against(&self, schema: &Schema) -> Result<()> {
        let unknown = |key: &str, field: &str| {
            Err(EtlError::ConfigValidation(format!(
                "{key} refers to `{field}`, which schema `{}` does not declare",
                schema.name()
            )))
        };

        for target in self.transform.rename.values() {
            if schema.field(target).is_none() {
                return unknown("transform.rename", target);
            }
        }
        for field in self.transform.defaults.keys() {
            if schema.field(field).is_none() {
                return unknown("transform.defaults", field);
            }
        }
        for field in self.filters.keys() {
            if schema.field(field).is_none() {
                return unknown("filters", field);
            }
        }
        for field in &self.transform.currency_columns {
            match schema.field(field) {
                None => return unknown("transform.currency_columns", field),
                Some(f) if f.ty != FieldType::String => {
                    return Err(EtlError::ConfigValidation(format!(
                        "transform.currency_columns: `{field}` is {}, not string",
                        f.ty
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}
