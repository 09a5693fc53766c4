use arrow::{
    datatypes::{Field, Schema},
    record_batch::RecordBatch,
};
use std::{collections::HashMap, sync::Arc};

use crate::error::ParseError;

/// Lower-case, spaces to underscores, parentheses removed.
///
/// `"Data_Value (Percent)"` becomes `"data_value_percent"`.
pub fn normalize_column_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_").replace(['(', ')'], "")
}

/// Rename every column of `batch` to its normalized name, keeping order.
pub fn normalize_columns(batch: &RecordBatch) -> Result<RecordBatch, ParseError> {
    let schema = batch.schema();
    let mut seen: HashMap<String, &str> = HashMap::with_capacity(schema.fields().len());
    let mut fields = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let normalized = normalize_column_name(field.name());
        if let Some(first) = seen.get(&normalized) {
            return Err(ParseError::ColumnCollision {
                first: first.to_string(),
                second: field.name().clone(),
                normalized,
            });
        }
        seen.insert(normalized.clone(), field.name());
        fields.push(Field::new(
            normalized,
            field.data_type().clone(),
            field.is_nullable(),
        ));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), batch.columns().to_vec())
        .map_err(ParseError::from)
}
