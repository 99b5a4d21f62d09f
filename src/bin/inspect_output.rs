use anyhow::{bail, Context, Result};
use arrow::{datatypes::Schema as ArrowSchema, ipc::reader::FileReader as IpcReader};
use clap::Parser;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::metadata::RowGroupMetaData;
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    process::ExitCode,
};

/// Print row count, schema and metadata of a Parquet or Arrow IPC file.
#[derive(Parser, Debug)]
#[command(name = "inspect_output", version, about)]
struct Args {
    path: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match inspect(&args.path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Format {
    Parquet,
    ArrowIpc,
}

/// Tell the formats apart by their leading magic bytes.
fn sniff(path: &Path) -> Result<Format> {
    let mut magic = [0u8; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .with_context(|| format!("reading header of {}", path.display()))?;
    if magic.starts_with(b"PAR1") {
        Ok(Format::Parquet)
    } else if &magic == b"ARROW1" {
        Ok(Format::ArrowIpc)
    } else {
        bail!("{} is neither Parquet nor Arrow IPC", path.display())
    }
}

fn inspect(path: &Path) -> Result<()> {
    let size = std::fs::metadata(path)?.len();
    match sniff(path)? {
        Format::Parquet => inspect_parquet(path, size),
        Format::ArrowIpc => inspect_ipc(path, size),
    }
}

fn inspect_parquet(path: &Path, size: u64) -> Result<()> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("opening parquet file {}", path.display()))?;
    let meta = builder.metadata();
    let file_meta = meta.file_metadata();

    println!("=== Parquet File: {} ===", path.display());
    println!(
        "Created by:           {}",
        file_meta.created_by().unwrap_or("<unknown>")
    );
    println!("Total rows:           {}", file_meta.num_rows());
    println!("Number of row groups: {}", meta.num_row_groups());
    println!("File-size on disk:    {size} bytes");
    println!();

    print_schema(builder.schema());

    println!("=== Key/Value Metadata ===");
    for kv in file_meta.key_value_metadata().into_iter().flatten() {
        // the encoded arrow schema is large and already printed above
        if kv.key == "ARROW:schema" {
            continue;
        }
        println!("{} = {}", kv.key, kv.value.as_deref().unwrap_or(""));
    }
    println!();

    for (idx, rg) in meta.row_groups().iter().enumerate() {
        print_row_group(idx, rg);
    }
    Ok(())
}

fn inspect_ipc(path: &Path, size: u64) -> Result<()> {
    let file = File::open(path)?;
    let reader = IpcReader::try_new(file, None)
        .with_context(|| format!("opening arrow ipc file {}", path.display()))?;
    let schema = reader.schema();
    let batches = reader.num_batches();

    let mut rows = 0usize;
    for batch in reader {
        rows += batch.context("reading record batch")?.num_rows();
    }

    println!("=== Arrow IPC File: {} ===", path.display());
    println!("Total rows:           {rows}");
    println!("Number of batches:    {batches}");
    println!("File-size on disk:    {size} bytes");
    println!();

    print_schema(&schema);

    println!("=== Key/Value Metadata ===");
    let mut metadata: Vec<_> = schema.metadata().iter().collect();
    metadata.sort();
    for (k, v) in metadata {
        println!("{k} = {v}");
    }
    Ok(())
}

fn print_schema(schema: &ArrowSchema) {
    println!("=== Schema ===");
    for field in schema.fields() {
        println!(
            "- {:<30} | {:<28} | {}",
            field.name(),
            field.data_type().to_string(),
            if field.is_nullable() { "nullable" } else { "required" }
        );
    }
    println!();
}

fn print_row_group(idx: usize, rg_md: &RowGroupMetaData) {
    println!("--- Row Group {idx} ---");
    println!("  Rows in this RG:        {}", rg_md.num_rows());
    println!("  Uncompressed size (RG): {} bytes", rg_md.total_byte_size());
    for col in rg_md.columns() {
        println!(
            "  > {:<28} {:?}, {} -> {} bytes",
            col.column_descr().name(),
            col.compression(),
            col.uncompressed_size(),
            col.compressed_size()
        );
    }
    println!();
}
