use arrow::{
    array::{Array, BooleanArray, StringArray},
    compute::filter_record_batch,
    error::ArrowError,
    record_batch::RecordBatch,
};
use tracing::{debug, warn};

/// Drop rows whose `column` is null, empty or whitespace.
///
/// A batch without `column` is returned unchanged.
pub fn drop_missing_values(batch: &RecordBatch, column: &str) -> Result<RecordBatch, ArrowError> {
    let Ok(idx) = batch.schema().index_of(column) else {
        warn!(column, "value column not present, skipping filter");
        return Ok(batch.clone());
    };

    let values = batch.column(idx);
    let keep: BooleanArray = match values.as_any().downcast_ref::<StringArray>() {
        Some(sarr) => sarr
            .iter()
            .map(|v| Some(v.is_some_and(|s| !s.trim().is_empty())))
            .collect(),
        None => (0..values.len()).map(|i| Some(values.is_valid(i))).collect(),
    };

    let filtered = filter_record_batch(batch, &keep)?;
    debug!(
        column,
        before = batch.num_rows(),
        after = filtered.num_rows(),
        "dropped rows with missing values"
    );
    Ok(filtered)
}
