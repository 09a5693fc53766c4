use arrow::{
    array::{Array, ArrayRef, AsArray, Float64Builder, Int32Builder},
    compute::cast,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::{
    collections::{HashMap, HashSet},
    str::FromStr,
    sync::Arc,
};
use tracing::debug;

use crate::config::{ColumnMapping, OutputType, UnmappedColumns};
use crate::error::CastError;

/// Arrow type a mapped column is written as.
pub fn arrow_type(ty: OutputType) -> DataType {
    match ty {
        OutputType::String => DataType::Utf8,
        OutputType::Integer => DataType::Int32,
        OutputType::Double => DataType::Float64,
    }
}

/// Every mapping key must name a column of `schema`.
pub fn validate_mapping(schema: &Schema, mapping: &[ColumnMapping]) -> Result<(), CastError> {
    for m in mapping {
        if schema.index_of(&m.source).is_err() {
            return Err(CastError::UnmatchedMappingKey {
                key: m.source.clone(),
                available: schema.fields().iter().map(|f| f.name().clone()).collect(),
            });
        }
    }
    Ok(())
}

/// Rename and type-cast the mapped columns of a normalized batch.
///
/// With [`UnmappedColumns::Drop`] the output holds the mapped columns in
/// mapping order; with [`UnmappedColumns::Keep`] every input column survives
/// in input order, mapped ones renamed and cast in place. An empty mapping
/// returns the batch unchanged.
pub fn apply_schema_mapping(
    batch: &RecordBatch,
    mapping: &[ColumnMapping],
    mode: UnmappedColumns,
) -> Result<RecordBatch, CastError> {
    if mapping.is_empty() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    validate_mapping(&schema, mapping)?;

    let mut out: Vec<(Field, ArrayRef)> = Vec::with_capacity(schema.fields().len());
    match mode {
        UnmappedColumns::Drop => {
            for m in mapping {
                let idx = schema.index_of(&m.source)?;
                out.push(cast_column(batch.column(idx), m)?);
            }
        }
        UnmappedColumns::Keep => {
            let by_source: HashMap<&str, &ColumnMapping> =
                mapping.iter().map(|m| (m.source.as_str(), m)).collect();
            for (field, arr) in schema.fields().iter().zip(batch.columns()) {
                match by_source.get(field.name().as_str()) {
                    Some(m) => out.push(cast_column(arr, m)?),
                    None => out.push((field.as_ref().clone(), arr.clone())),
                }
            }
        }
    }

    let mut names = HashSet::with_capacity(out.len());
    for (field, _) in &out {
        if !names.insert(field.name().clone()) {
            return Err(CastError::DuplicateTarget {
                name: field.name().clone(),
            });
        }
    }

    let (fields, columns): (Vec<Field>, Vec<ArrayRef>) = out.into_iter().unzip();
    let cast_batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?;
    debug!(
        columns = cast_batch.num_columns(),
        rows = cast_batch.num_rows(),
        ?mode,
        "applied schema mapping"
    );
    Ok(cast_batch)
}

fn cast_column(arr: &ArrayRef, m: &ColumnMapping) -> Result<(Field, ArrayRef), CastError> {
    let text = cast(arr, &DataType::Utf8)?;
    let sarr = text.as_string::<i32>();

    let col: ArrayRef = match m.target_type {
        OutputType::String => text.clone(),
        OutputType::Integer => {
            let mut b = Int32Builder::with_capacity(sarr.len());
            for (row, v) in sarr.iter().enumerate() {
                b.append_option(parse_value::<i32>(v, row, m)?);
            }
            Arc::new(b.finish())
        }
        OutputType::Double => {
            let mut b = Float64Builder::with_capacity(sarr.len());
            for (row, v) in sarr.iter().enumerate() {
                b.append_option(parse_value::<f64>(v, row, m)?);
            }
            Arc::new(b.finish())
        }
    };

    let field = Field::new(&m.target, arrow_type(m.target_type), true);
    Ok((field, col))
}

/// Null and blank cells stay null; anything else must parse.
fn parse_value<T: FromStr>(
    raw: Option<&str>,
    row: usize,
    m: &ColumnMapping,
) -> Result<Option<T>, CastError> {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    s.parse::<T>()
        .map(Some)
        .map_err(|_| CastError::InvalidValue {
            column: m.source.clone(),
            row,
            value: s.to_string(),
            target: m.target_type,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_schema_mapping;
    use crate::process::{normalize::normalize_columns, parse::parse_csv};
    use arrow::array::{Array, Float64Array, Int32Array, StringArray};

    const SAMPLE: &str = "YearStart,LocationDesc,Data_Value,Question,Stratification1\n\
                          2020,Ohio,34.5,Percent of adults who have obesity,Total\n\
                          2021,Iowa,36.1,Percent of adults who have obesity,Female\n";

    fn normalized(csv: &str) -> RecordBatch {
        normalize_columns(&parse_csv(csv.as_bytes()).unwrap()).unwrap()
    }

    fn names(batch: &RecordBatch) -> Vec<String> {
        batch.schema().fields().iter().map(|f| f.name().clone()).collect()
    }

    #[test]
    fn test_strict_mode_keeps_only_mapped_columns() {
        let out = apply_schema_mapping(
            &normalized(SAMPLE),
            &default_schema_mapping(),
            UnmappedColumns::Drop,
        )
        .unwrap();

        assert_eq!(names(&out), ["year", "state", "obesity_rate", "metric_type"]);
        assert_eq!(out.schema().field(0).data_type(), &DataType::Int32);
        assert_eq!(out.schema().field(2).data_type(), &DataType::Float64);

        let years = out.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(years.iter().collect::<Vec<_>>(), vec![Some(2020), Some(2021)]);
        let rates = out.column(2).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(rates.value(0), 34.5);
        let states = out.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(states.value(1), "Iowa");
    }

    #[test]
    fn test_passthrough_mode_keeps_unmapped_in_place() {
        let mapping = vec![ColumnMapping::new("data_value", "obesity_rate", OutputType::Double)];
        let out =
            apply_schema_mapping(&normalized(SAMPLE), &mapping, UnmappedColumns::Keep).unwrap();

        assert_eq!(
            names(&out),
            ["yearstart", "locationdesc", "obesity_rate", "question", "stratification1"]
        );
        assert_eq!(out.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(out.schema().field(2).data_type(), &DataType::Float64);
    }

    #[test]
    fn test_unnormalized_mapping_key_is_rejected() {
        // "yearstart" never matches the normalized "year_start" header
        let csv = "Year Start,Data_Value\n2020,34.5\n";
        let err = apply_schema_mapping(
            &normalized(csv),
            &default_schema_mapping(),
            UnmappedColumns::Drop,
        )
        .unwrap_err();

        match err {
            CastError::UnmatchedMappingKey { key, available } => {
                assert_eq!(key, "yearstart");
                assert!(available.contains(&"year_start".to_string()));
            }
            other => panic!("expected unmatched key, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_value_names_column_and_row() {
        let csv = "YearStart,Data_Value\n2020,34.5\n2021,n/a\n";
        let mapping = vec![ColumnMapping::new("data_value", "obesity_rate", OutputType::Double)];
        let err =
            apply_schema_mapping(&normalized(csv), &mapping, UnmappedColumns::Drop).unwrap_err();

        match err {
            CastError::InvalidValue {
                column,
                row,
                value,
                target,
            } => {
                assert_eq!(column, "data_value");
                assert_eq!(row, 1);
                assert_eq!(value, "n/a");
                assert_eq!(target, OutputType::Double);
            }
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn test_integer_rejects_fractions_and_keeps_nulls() {
        let mapping = vec![ColumnMapping::new("yearstart", "year", OutputType::Integer)];

        let ok = apply_schema_mapping(
            &normalized("YearStart,x\n 2020 ,1\n,2\n"),
            &mapping,
            UnmappedColumns::Drop,
        )
        .unwrap();
        let years = ok.column(0).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!(years.value(0), 2020);
        assert!(years.is_null(1));

        let err = apply_schema_mapping(
            &normalized("YearStart\n2020.5\n"),
            &mapping,
            UnmappedColumns::Drop,
        )
        .unwrap_err();
        assert!(matches!(err, CastError::InvalidValue { row: 0, .. }));
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let mapping = vec![ColumnMapping::new("locationdesc", "question", OutputType::String)];
        let err = apply_schema_mapping(&normalized(SAMPLE), &mapping, UnmappedColumns::Keep)
            .unwrap_err();
        assert!(matches!(err, CastError::DuplicateTarget { name } if name == "question"));
    }

    #[test]
    fn test_empty_mapping_is_identity() {
        let batch = normalized(SAMPLE);
        let out = apply_schema_mapping(&batch, &[], UnmappedColumns::Drop).unwrap();
        assert_eq!(out, batch);
    }
}
