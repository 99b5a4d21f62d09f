// src/calculator/source.rs

use csv::{ReaderBuilder, StringRecord};
use std::{
    collections::{HashMap, VecDeque},
    fs::{self, File},
    io::{Cursor, Read},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};
use zip::ZipArchive;

use super::record::{Origin, RawRecord, Value};
use crate::config::{Configuration, DuplicateColumnPolicy};
use crate::error::{EtlError, Result};

/// Upper bound on the buffer reserved from an archive's declared entry size.
const ENTRY_PREALLOC_LIMIT: u64 = 1 << 20;

/// One CSV stream: a file on disk or a `.csv` entry inside a zip archive.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Unit {
    File(PathBuf),
    ZipEntry {
        archive: PathBuf,
        index: usize,
        name: String,
    },
}

impl Unit {
    fn label(&self) -> PathBuf {
        match self {
            Unit::File(path) => path.clone(),
            Unit::ZipEntry { archive, name, .. } => archive.join(name),
        }
    }
}

struct OpenUnit {
    label: PathBuf,
    reader: csv::Reader<Box<dyn Read>>,
    /// Column name and the header index that supplies its value.
    columns: Vec<(String, usize)>,
    record: StringRecord,
}

/// Forward-only stream of raw records across every configured input, in
/// configured order. Positions are 1-based and global. After the first error
/// the stream ends.
pub struct RecordSource {
    units: VecDeque<Unit>,
    current: Option<OpenUnit>,
    delimiter: u8,
    duplicates: DuplicateColumnPolicy,
    next_position: u64,
    failed: bool,
}

/// Resolve every input location and return a lazy record stream.
///
/// All locations are checked before the first record is produced: a missing
/// file, a glob without matches or an unreadable archive fails here.
#[instrument(level = "info", skip_all, fields(inputs = config.input_path.len()))]
pub fn load(config: &Configuration) -> Result<RecordSource> {
    let mut units = VecDeque::new();
    for input in &config.input_path {
        units.extend(expand_input(input)?);
    }
    info!(streams = units.len(), "inputs resolved");

    Ok(RecordSource {
        units,
        current: None,
        // validated as ASCII when the configuration was loaded
        delimiter: config.delimiter as u8,
        duplicates: config.duplicate_columns,
        next_position: 1,
        failed: false,
    })
}

fn is_glob(path: &Path) -> bool {
    path.to_string_lossy().contains(|c| matches!(c, '*' | '?' | '['))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn not_found(path: &Path, message: impl ToString) -> EtlError {
    EtlError::SourceNotFound {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn expand_input(input: &Path) -> Result<Vec<Unit>> {
    if !is_glob(input) {
        return expand_path(input);
    }

    let pattern = input.to_string_lossy();
    let mut matches = glob::glob(&pattern)
        .map_err(|e| not_found(input, format!("invalid pattern: {e}")))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| not_found(input, e))?;
    if matches.is_empty() {
        return Err(not_found(input, "pattern matches no files"));
    }
    matches.sort();

    let mut units = Vec::new();
    for path in matches {
        units.extend(expand_path(&path)?);
    }
    Ok(units)
}

fn expand_path(path: &Path) -> Result<Vec<Unit>> {
    let meta = fs::metadata(path).map_err(|e| not_found(path, e))?;

    if meta.is_dir() {
        let mut files = fs::read_dir(path)
            .map_err(|e| not_found(path, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && (has_extension(p, "csv") || has_extension(p, "zip")))
            .collect::<Vec<_>>();
        files.sort();
        debug!(dir = %path.display(), files = files.len(), "expanded input directory");

        let mut units = Vec::new();
        for file in files {
            units.extend(expand_path(&file)?);
        }
        return Ok(units);
    }

    if has_extension(path, "zip") {
        return list_zip_entries(path);
    }
    Ok(vec![Unit::File(path.to_path_buf())])
}

fn list_zip_entries(path: &Path) -> Result<Vec<Unit>> {
    let file = File::open(path).map_err(|e| not_found(path, e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| EtlError::source_format(path, e))?;

    let mut units = Vec::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| EtlError::source_format(path, e))?;
        let name = entry.name().to_string();
        if entry.is_file() && name.to_lowercase().ends_with(".csv") {
            units.push(Unit::ZipEntry {
                archive: path.to_path_buf(),
                index,
                name,
            });
        }
    }
    debug!(archive = %path.display(), entries = units.len(), "listed csv entries");
    Ok(units)
}

/// Resolve repeated header names to one source index each, in order of first
/// appearance. Empty header names (index columns) are skipped.
fn plan_columns(
    headers: &StringRecord,
    policy: DuplicateColumnPolicy,
    label: &Path,
) -> Result<Vec<(String, usize)>> {
    let mut columns: Vec<(String, usize)> = Vec::with_capacity(headers.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for (index, name) in headers.iter().enumerate() {
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        match (seen.get(name), policy) {
            (None, _) => {
                seen.insert(name.to_string(), columns.len());
                columns.push((name.to_string(), index));
            }
            (Some(&slot), DuplicateColumnPolicy::LastWins) => columns[slot].1 = index,
            (Some(_), DuplicateColumnPolicy::FirstWins) => {}
            (Some(_), DuplicateColumnPolicy::Error) => {
                return Err(EtlError::source_format(
                    label,
                    format!("duplicate column `{name}`"),
                ))
            }
        }
    }
    Ok(columns)
}

impl RecordSource {
    fn open(&self, unit: Unit) -> Result<OpenUnit> {
        let label = unit.label();
        let input: Box<dyn Read> = match unit {
            Unit::File(path) => Box::new(File::open(&path).map_err(|e| not_found(&path, e))?),
            Unit::ZipEntry { archive, index, .. } => {
                let file = File::open(&archive).map_err(|e| not_found(&archive, e))?;
                let mut zip =
                    ZipArchive::new(file).map_err(|e| EtlError::source_format(&archive, e))?;
                let mut entry = zip
                    .by_index(index)
                    .map_err(|e| EtlError::source_format(&label, e))?;
                let reserve = entry.size().min(ENTRY_PREALLOC_LIMIT) as usize;
                let mut buf = Vec::with_capacity(reserve);
                entry
                    .read_to_end(&mut buf)
                    .map_err(|e| EtlError::source_format(&label, e))?;
                Box::new(Cursor::new(buf))
            }
        };

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(false)
            .from_reader(input);
        let headers = reader
            .headers()
            .map_err(|e| EtlError::source_format(&label, e))?
            .clone();
        let columns = plan_columns(&headers, self.duplicates, &label)?;
        debug!(source = %label.display(), columns = columns.len(), "opened csv stream");

        Ok(OpenUnit {
            label,
            reader,
            columns,
            record: StringRecord::new(),
        })
    }

    fn fail(&mut self, err: EtlError) -> Option<Result<RawRecord>> {
        self.failed = true;
        self.current = None;
        self.units.clear();
        Some(Err(err))
    }
}

impl Iterator for RecordSource {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                let unit = self.units.pop_front()?;
                match self.open(unit) {
                    Ok(opened) => self.current = Some(opened),
                    Err(e) => return self.fail(e),
                }
            }
            let Some(open) = self.current.as_mut() else {
                continue;
            };

            match open.reader.read_record(&mut open.record) {
                Ok(true) => {
                    let line = open.record.position().map_or(0, |p| p.line());
                    let origin = Origin {
                        source: open.label.clone(),
                        line,
                    };
                    let record = open.columns.iter().fold(
                        RawRecord::new(self.next_position).with_origin(origin),
                        |rec, (name, index)| {
                            let cell = open.record.get(*index).unwrap_or_default();
                            rec.with(name.clone(), Value::Text(cell.to_string()))
                        },
                    );
                    self.next_position += 1;
                    return Some(Ok(record));
                }
                Ok(false) => self.current = None,
                Err(e) => {
                    let err = EtlError::source_format(&open.label, e);
                    return self.fail(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use anyhow::Result;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn config_for(inputs: &[PathBuf], extra: &str) -> Configuration {
        let list = inputs
            .iter()
            .map(|p| format!("{:?}", p.display().to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        let doc = format!(
            "country_code: US\ninput_path: [{list}]\noutput_path: out.parquet\n{extra}"
        );
        Configuration::from_yaml_str(&doc, "test.yml", Path::new("/")).unwrap()
    }

    fn text(rec: &RawRecord, name: &str) -> Option<String> {
        rec.get(name).map(|v| v.to_string())
    }

    #[test]
    fn test_reads_rows_in_order_across_files() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "order_id,amount,currency\n1,10.50,USD\nx,5,USD\n")?;
        fs::write(&b, "order_id,amount,currency\n3,1,EUR\n")?;

        let records = load(&config_for(&[a.clone(), b], ""))?.collect::<crate::error::Result<Vec<_>>>()?;
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.position).collect::<Vec<_>>(),
            [1, 2, 3]
        );
        assert_eq!(text(&records[0], "amount").as_deref(), Some("10.50"));
        assert_eq!(text(&records[2], "currency").as_deref(), Some("EUR"));
        let origin = records[1].origin.as_ref().unwrap();
        assert_eq!(origin.source, a);
        assert_eq!(origin.line, 3);
        Ok(())
    }

    #[test]
    fn test_missing_input_fails_before_reading() -> Result<()> {
        let dir = tempdir()?;
        let present = dir.path().join("a.csv");
        fs::write(&present, "a\n1\n")?;
        let err = load(&config_for(&[present, dir.path().join("nope.csv")], ""))
            .err()
            .unwrap();
        assert!(matches!(err, EtlError::SourceNotFound { .. }), "{err}");
        assert_eq!(err.stage(), Stage::Load);

        let err = load(&config_for(&[dir.path().join("*.tsv")], "")).err().unwrap();
        assert!(err.to_string().contains("matches no files"), "{err}");
        Ok(())
    }

    #[test]
    fn test_empty_and_header_only_inputs() -> Result<()> {
        let dir = tempdir()?;
        let empty = dir.path().join("empty.csv");
        let header = dir.path().join("header.csv");
        fs::write(&empty, "")?;
        fs::write(&header, "order_id,amount\n")?;
        assert_eq!(load(&config_for(&[empty, header], ""))?.count(), 0);
        Ok(())
    }

    #[test]
    fn test_glob_and_directory_are_sorted() -> Result<()> {
        let dir = tempdir()?;
        for name in ["b.csv", "a.csv", "c.txt"] {
            fs::write(dir.path().join(name), format!("file\n{name}\n"))?;
        }
        let names = |source: RecordSource| -> crate::error::Result<Vec<String>> {
            source
                .map(|r| r.map(|rec| rec.get("file").unwrap().to_string()))
                .collect()
        };

        let by_glob = names(load(&config_for(&[dir.path().join("*.csv")], ""))?)?;
        assert_eq!(by_glob, ["a.csv", "b.csv"]);
        let by_dir = names(load(&config_for(&[dir.path().to_path_buf()], ""))?)?;
        assert_eq!(by_dir, ["a.csv", "b.csv"]);
        Ok(())
    }

    #[test]
    fn test_zip_entries_and_delimiter() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sales.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&path)?);
            let options = SimpleFileOptions::default();
            zip.start_file("part1.csv", options)?;
            zip.write_all(b"order_id;amount\n1;2,50\n")?;
            zip.start_file("readme.txt", options)?;
            zip.write_all(b"ignored")?;
            zip.start_file("part2.csv", options)?;
            zip.write_all(b"order_id;amount\n2;3\n")?;
            zip.finish()?;
        }
        let records = load(&config_for(&[path.clone()], "delimiter: ';'\n"))?
            .collect::<crate::error::Result<Vec<_>>>()?;
        assert_eq!(records.len(), 2);
        assert_eq!(text(&records[0], "amount").as_deref(), Some("2,50"));
        assert_eq!(records[1].origin.as_ref().unwrap().source, path.join("part2.csv"));
        Ok(())
    }

    #[test]
    fn test_zip_entry_size_header_is_not_trusted() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("inflated.zip");
        {
            let mut zip = zip::ZipWriter::new(File::create(&path)?);
            let options =
                SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
            zip.start_file("part.csv", options)?;
            zip.write_all(b"order_id\n1\n")?;
            zip.finish()?;
        }
        // claim a ~2 GiB uncompressed size in the local and central headers
        let mut bytes = fs::read(&path)?;
        let claimed = 0x7FFF_FFF0u32.to_le_bytes();
        for (signature, offset) in [(b"PK\x03\x04", 22), (b"PK\x01\x02", 24)] {
            let at = bytes.windows(4).position(|w| w == signature).unwrap();
            bytes[at + offset..at + offset + 4].copy_from_slice(&claimed);
        }
        fs::write(&path, &bytes)?;

        let first = load(&config_for(&[path], "")).and_then(|mut source| source.next().transpose());
        match first {
            Ok(Some(rec)) => assert_eq!(text(&rec, "order_id").as_deref(), Some("1")),
            Ok(None) => panic!("expected a record or a format error"),
            Err(err) => assert!(matches!(err, EtlError::SourceFormat { .. }), "{err}"),
        }
        Ok(())
    }

    #[test]
    fn test_ragged_row_is_format_error_and_fuses() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("ragged.csv");
        fs::write(&path, "a,b\n1,2\n3\n4,5\n")?;
        let mut source = load(&config_for(&[path], ""))?;
        assert!(source.next().unwrap().is_ok());
        let err = source.next().unwrap().unwrap_err();
        assert!(matches!(err, EtlError::SourceFormat { .. }), "{err}");
        assert!(source.next().is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_utf8_is_format_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("latin1.csv");
        fs::write(&path, b"city\nS\xe3o Paulo\n")?;
        let err = load(&config_for(&[path], ""))?.next().unwrap().unwrap_err();
        assert!(matches!(err, EtlError::SourceFormat { .. }), "{err}");
        Ok(())
    }

    #[test]
    fn test_duplicate_column_policies() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dup.csv");
        fs::write(&path, "id,amount,amount\n1,first,last\n")?;
        let inputs = [path];

        let last = load(&config_for(&inputs, ""))?.next().unwrap()?;
        assert_eq!(text(&last, "amount").as_deref(), Some("last"));
        assert_eq!(last.len(), 2);

        let first = load(&config_for(&inputs, "duplicate_columns: first_wins\n"))?
            .next()
            .unwrap()?;
        assert_eq!(text(&first, "amount").as_deref(), Some("first"));

        let err = load(&config_for(&inputs, "duplicate_columns: error\n"))?
            .next()
            .unwrap()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate column `amount`"), "{err}");
        Ok(())
    }
}
