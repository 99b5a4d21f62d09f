//! Columnar output. A [`Dataset`] is converted in bounded record batches and
//! written to a hidden temporary file beside the target, which is renamed
//! over the target only once the file is complete.

pub mod batch;

use arrow::{datatypes::Schema as ArrowSchema, ipc::writer::FileWriter};
use parquet::{
    arrow::ArrowWriter,
    basic::{BrotliLevel, Compression as ParquetCompression, ZstdLevel},
    file::{metadata::KeyValue, properties::WriterProperties},
};
use std::{
    collections::BTreeMap,
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, instrument};

use crate::calculator::{Dataset, Value};
use crate::config::{Compression, Configuration, OutputFormat};
use crate::error::{EtlError, Result};
use crate::schema::build_arrow_schema;
pub use batch::records_to_batch;

/// Metadata key holding the run's country code.
pub const COUNTRY_CODE_KEY: &str = "sales_etl.country_code";

/// Directory value used for a null partition key.
pub const NULL_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOptions {
    /// Maximum rows per record batch (and per Parquet row group).
    pub batch_size: usize,
    pub compression: Compression,
    /// Extra key/value pairs stored in the file metadata.
    pub metadata: BTreeMap<String, String>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            batch_size: 8192,
            compression: Compression::default(),
            metadata: BTreeMap::new(),
        }
    }
}

impl WriteOptions {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            batch_size: config.batch_size,
            compression: config.compression,
            metadata: BTreeMap::from([(
                COUNTRY_CODE_KEY.to_string(),
                config.country_code.clone(),
            )]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub path: PathBuf,
    pub rows: usize,
    pub bytes: u64,
}

fn parquet_compression(c: Compression) -> std::result::Result<ParquetCompression, String> {
    Ok(match c {
        Compression::Uncompressed => ParquetCompression::UNCOMPRESSED,
        Compression::Snappy => ParquetCompression::SNAPPY,
        Compression::Zstd => {
            ParquetCompression::ZSTD(ZstdLevel::try_new(3).map_err(|e| e.to_string())?)
        }
        Compression::Brotli => {
            ParquetCompression::BROTLI(BrotliLevel::try_new(5).map_err(|e| e.to_string())?)
        }
    })
}

/// Write `dataset` to `output` in `format`.
///
/// Missing parent directories are created. Nothing is visible at `output`
/// until the whole file has been written and synced; on failure the
/// temporary file is removed and any previous file at `output` is left as is.
#[instrument(
    level = "info",
    skip_all,
    fields(path = %output.display(), format = %format, rows = dataset.len())
)]
pub fn write(
    dataset: &Dataset,
    output: &Path,
    format: OutputFormat,
    options: &WriteOptions,
) -> Result<WriteReport> {
    let fail = |e: &dyn std::fmt::Display| EtlError::write_target(output, e);

    if output.is_dir() {
        return Err(fail(&"path is a directory"));
    }
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| fail(&"path has no file name"))?;
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|e| fail(&e))?;

    let tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| fail(&e))?;
    debug!(tmp = %tmp.path().display(), "writing to temporary file");

    let schema = dataset.schema();
    let arrow_schema = with_metadata(&build_arrow_schema(schema), &options.metadata);
    let batch_size = options.batch_size.max(1);

    let mut batches = dataset
        .records()
        .chunks(batch_size)
        .map(|chunk| batch::records_to_batch(schema, &arrow_schema, chunk));

    match format {
        OutputFormat::Parquet => {
            let kv = arrow_schema
                .metadata()
                .iter()
                .map(|(k, v)| KeyValue::new(k.clone(), v.clone()))
                .collect();
            let props = WriterProperties::builder()
                .set_compression(parquet_compression(options.compression).map_err(|e| fail(&e))?)
                .set_dictionary_enabled(true)
                .set_max_row_group_size(batch_size)
                .set_key_value_metadata(Some(kv))
                .build();

            let sink = BufWriter::new(tmp.as_file());
            let mut writer = ArrowWriter::try_new(sink, Arc::clone(&arrow_schema), Some(props))
                .map_err(|e| fail(&e))?;
            for batch in &mut batches {
                let batch = batch.map_err(|e| fail(&e))?;
                writer.write(&batch).map_err(|e| fail(&e))?;
            }
            let mut sink = writer.into_inner().map_err(|e| fail(&e))?;
            sink.flush().map_err(|e| fail(&e))?;
        }
        OutputFormat::ArrowIpc => {
            let sink = BufWriter::new(tmp.as_file());
            let mut writer = FileWriter::try_new(sink, &arrow_schema).map_err(|e| fail(&e))?;
            for batch in &mut batches {
                let batch = batch.map_err(|e| fail(&e))?;
                writer.write(&batch).map_err(|e| fail(&e))?;
            }
            writer.finish().map_err(|e| fail(&e))?;
            let mut sink = writer.into_inner().map_err(|e| fail(&e))?;
            sink.flush().map_err(|e| fail(&e))?;
        }
    }

    tmp.as_file().sync_all().map_err(|e| fail(&e))?;
    tmp.persist(output).map_err(|e| fail(&e.error))?;

    let bytes = fs::metadata(output).map(|m| m.len()).map_err(|e| fail(&e))?;
    info!(rows = dataset.len(), bytes, "output written");
    Ok(WriteReport {
        path: output.to_path_buf(),
        rows: dataset.len(),
        bytes,
    })
}

/// Write `dataset` as one file per distinct value of `column`, each at
/// `dir/<column>=<value>/part-0.<ext>`.
///
/// Partition directories of `column` already under `dir` are removed first so
/// the directory describes this dataset only. Other entries are left alone.
#[instrument(
    level = "info",
    skip_all,
    fields(dir = %dir.display(), column = %column, rows = dataset.len())
)]
pub fn write_partitioned(
    dataset: &Dataset,
    dir: &Path,
    column: &str,
    format: OutputFormat,
    options: &WriteOptions,
) -> Result<Vec<WriteReport>> {
    let fail = |e: &dyn std::fmt::Display| EtlError::write_target(dir, e);

    let schema = dataset.schema();
    let key = schema
        .index_of(column)
        .ok_or_else(|| fail(&format!("schema `{}` has no column `{column}`", schema.name())))?;
    if dir.is_file() {
        return Err(fail(&"path is a file"));
    }
    fs::create_dir_all(dir).map_err(|e| fail(&e))?;

    let prefix = format!("{column}=");
    for entry in fs::read_dir(dir).map_err(|e| fail(&e))? {
        let entry = entry.map_err(|e| fail(&e))?;
        let stale = entry.file_name().to_string_lossy().starts_with(&prefix);
        if stale && entry.path().is_dir() {
            debug!(path = %entry.path().display(), "removing stale partition");
            fs::remove_dir_all(entry.path()).map_err(|e| fail(&e))?;
        }
    }

    let mut parts: BTreeMap<String, Dataset> = BTreeMap::new();
    for record in dataset.records() {
        let value = match &record.values()[key] {
            Value::Null => NULL_PARTITION.to_string(),
            v => partition_value(&v.to_string()),
        };
        parts
            .entry(value)
            .or_insert_with(|| Dataset::new(Arc::clone(schema)))
            .push(record.clone());
    }

    let file_name = format!("part-0.{}", format.extension());
    let reports = parts
        .iter()
        .map(|(value, part)| {
            let target = dir.join(format!("{prefix}{value}")).join(&file_name);
            write(part, &target, format, options)
        })
        .collect::<Result<Vec<_>>>()?;
    info!(partitions = reports.len(), "partitioned output written");
    Ok(reports)
}

/// Percent-encode everything but ASCII letters, digits, `-` and `_`.
fn partition_value(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn with_metadata(
    schema: &Arc<ArrowSchema>,
    extra: &BTreeMap<String, String>,
) -> Arc<ArrowSchema> {
    let mut metadata = schema.metadata().clone();
    metadata.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    Arc::new(schema.as_ref().clone().with_metadata(metadata))
}
