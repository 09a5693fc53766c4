use anyhow::{Context, Result};
use arrow::util::pretty::pretty_format_batches;
use bytes::Bytes;
use cdcscraper::{process::encode::read_parquet, storage::StorageProvider, PipelineConfig};
use clap::Parser;
use parquet::file::{
    metadata::RowGroupMetaData,
    reader::{FileReader, SerializedFileReader},
};
use std::path::PathBuf;

/// Print schema, row groups and a preview of a refined Parquet object.
#[derive(Parser, Debug)]
struct Args {
    /// Local Parquet file; when absent the configured refined object is read
    #[arg(long)]
    file: Option<PathBuf>,

    #[arg(long, env = "CDC_CONFIG")]
    config: Option<PathBuf>,

    /// Refined key to read instead of the configured one
    #[arg(long)]
    key: Option<String>,

    /// Rows to print
    #[arg(long, default_value_t = 10)]
    rows: usize,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (label, bytes) = match &args.file {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            (path.display().to_string(), Bytes::from(data))
        }
        None => {
            let config = PipelineConfig::load(args.config.as_deref())?;
            let key = args.key.clone().unwrap_or(config.refined_key.clone());
            let store = StorageProvider::for_bucket(&config.storage, &config.refined_bucket)?;
            let data = store.get(&key).await?;
            (store.location(&key).to_string(), data)
        }
    };

    inspect(&label, bytes, args.rows)
}

fn inspect(label: &str, bytes: Bytes, rows: usize) -> Result<()> {
    let size = bytes.len();
    let reader = SerializedFileReader::new(bytes.clone()).context("opening parquet")?;
    let meta = reader.metadata();
    let file_meta = meta.file_metadata();

    println!("=== Parquet File: {} ===", label);
    println!(
        "Created by:           {}",
        file_meta.created_by().unwrap_or("<unknown>")
    );
    println!("Total rows:           {}", file_meta.num_rows());
    println!("Number of row groups: {}", meta.num_row_groups());
    println!("Size:                 {} bytes", size);
    println!();

    println!("=== Columns ===");
    for col in file_meta.schema_descr().columns() {
        let logical = col
            .logical_type()
            .as_ref()
            .map_or("<none>".to_string(), |lt| format!("{:?}", lt));
        println!(
            "- {:<20} | Physical: {:<10} | Logical: {}",
            col.name(),
            format!("{:?}", col.physical_type()),
            logical
        );
    }
    println!();

    for (idx, rg) in meta.row_groups().iter().enumerate() {
        print_row_group(idx, rg);
    }

    let batches = read_parquet(bytes)?;
    let mut remaining = rows;
    let mut preview = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(batch.num_rows());
        preview.push(batch.slice(0, take));
        remaining -= take;
    }
    println!("=== First {} rows ===", rows - remaining);
    println!("{}", pretty_format_batches(&preview)?);
    Ok(())
}

fn print_row_group(idx: usize, rg: &RowGroupMetaData) {
    println!("--- Row Group {} ---", idx);
    println!("  Rows: {}", rg.num_rows());
    for col in rg.columns() {
        let nulls = col
            .statistics()
            .and_then(|s| s.null_count_opt())
            .map_or("?".to_string(), |n| n.to_string());
        println!(
            "  > {:<20} {:?}, {} → {} bytes, nulls: {}",
            col.column_descr().name(),
            col.compression(),
            col.uncompressed_size(),
            col.compressed_size(),
            nulls
        );
    }
    println!();
}
