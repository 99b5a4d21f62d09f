//! Error taxonomy for the sales ETL pipeline.
//!
//! Every fatal failure is an [`EtlError`]. Each variant belongs to one pipeline
//! [`Stage`], which the runner uses when it reports a failed run. Record-level
//! validation problems are [`RecordError`]s; they only become fatal (as
//! [`EtlError::InvalidRecord`]) under the `abort` policy.

use std::{fmt, path::PathBuf};
use thiserror::Error;

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Schema,
    Load,
    Transform,
    Write,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Config => "config",
            Stage::Schema => "schema",
            Stage::Load => "load",
            Stage::Transform => "transform",
            Stage::Write => "write",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal pipeline errors.
#[derive(Debug, Error)]
pub enum EtlError {
    /// The configuration document is not well-formed YAML.
    #[error("cannot parse configuration {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// The configuration parsed but is missing keys or holds bad values.
    #[error("invalid configuration: {0}")]
    ConfigValidation(String),

    /// No schema is registered under the requested key.
    #[error("no schema registered for `{0}`")]
    SchemaNotFound(String),

    /// A schema definition is unusable.
    #[error("invalid schema `{schema}`: {message}")]
    SchemaValidation { schema: String, message: String },

    /// An input location does not exist or cannot be opened.
    #[error("input source not found: {path}: {message}")]
    SourceNotFound { path: PathBuf, message: String },

    /// An input could not be parsed into rows.
    #[error("cannot read rows from {path}: {message}")]
    SourceFormat { path: PathBuf, message: String },

    /// A record failed validation while `on_invalid_record` is `abort`.
    #[error("record {position} rejected: {error}")]
    InvalidRecord { position: u64, error: RecordError },

    /// The output location cannot be written.
    #[error("cannot write output {path}: {message}")]
    WriteTarget { path: PathBuf, message: String },
}

impl EtlError {
    pub fn stage(&self) -> Stage {
        match self {
            EtlError::ConfigParse { .. } | EtlError::ConfigValidation(_) => Stage::Config,
            EtlError::SchemaNotFound(_) | EtlError::SchemaValidation { .. } => Stage::Schema,
            EtlError::SourceNotFound { .. } | EtlError::SourceFormat { .. } => Stage::Load,
            EtlError::InvalidRecord { .. } => Stage::Transform,
            EtlError::WriteTarget { .. } => Stage::Write,
        }
    }

    pub(crate) fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::SchemaValidation {
            schema: schema.into(),
            message: message.into(),
        }
    }

    pub(crate) fn source_format(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        EtlError::SourceFormat {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn write_target(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        EtlError::WriteTarget {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// Why a single field failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// A non-nullable field is absent from the record.
    Missing,
    /// A non-nullable field holds a null token.
    Null,
    /// No lossless conversion exists from the value to the declared type.
    Unconvertible { value: String, target: String },
    /// A currency column does not hold a three-letter code.
    BadCurrency(String),
    /// The record carries a column the schema does not declare.
    UnknownColumn,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Missing => f.write_str("required field is missing"),
            RejectReason::Null => f.write_str("required field is null"),
            RejectReason::Unconvertible { value, target } => {
                write!(f, "cannot convert {value:?} to {target}")
            }
            RejectReason::BadCurrency(v) => write!(f, "{v:?} is not a currency code"),
            RejectReason::UnknownColumn => f.write_str("column is not declared by the schema"),
        }
    }
}

/// First failing field of a rejected record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}`: {reason}")]
pub struct RecordError {
    pub field: String,
    pub reason: RejectReason,
}

impl RecordError {
    pub fn new(field: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            field: field.into(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
