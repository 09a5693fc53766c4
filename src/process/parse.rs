use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{io::Cursor, sync::Arc};
use tracing::{debug, warn};

use crate::error::ParseError;

/// Rows decoded per Arrow batch before concatenation.
const BATCH_ROWS: usize = 8192;

/// Decode a CSV payload with a header row into one all-`Utf8` batch.
///
/// Column names are kept exactly as they appear in the header. Empty cells
/// become nulls.
pub fn parse_csv(payload: &[u8]) -> Result<RecordBatch, ParseError> {
    let (header, _) = Format::default()
        .with_header(true)
        .infer_schema(Cursor::new(payload), Some(0))?;
    if header.fields().is_empty() {
        return Err(ParseError::MissingHeader);
    }

    // Everything stays text until the schema mapping casts it
    let fields: Vec<Field> = header
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), DataType::Utf8, true))
        .collect();
    let schema = Arc::new(Schema::new(fields));

    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .with_batch_size(BATCH_ROWS)
        .build(Cursor::new(payload))?;

    let batches = reader.collect::<Result<Vec<_>, _>>().map_err(|e| {
        let lines: Vec<&str> = std::str::from_utf8(payload)
            .map(|s| s.lines().take(3).collect())
            .unwrap_or_default();
        warn!("CSV parsing failed. First few lines: {:?}", lines);
        e
    })?;

    let batch = concat_batches(&schema, &batches)?;
    debug!(
        columns = batch.num_columns(),
        rows = batch.num_rows(),
        "parsed raw CSV"
    );
    Ok(batch)
}
