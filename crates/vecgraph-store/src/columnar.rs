//! Parquet reader for embedding files.
//!
//! Expected columns: `id`, optional `doc_id`, optional `text`, and the
//! embedding under `vector` or `emb`. Ids may be strings or integers;
//! embeddings may be List, LargeList or FixedSizeList of Float16/32/64.

use std::fs::File;
use std::path::Path;

use arrow_array::cast::AsArray;
use arrow_array::types::{Float16Type, Float32Type, Float64Type, Int32Type, Int64Type};
use arrow_array::{Array, ArrayRef, RecordBatch};
use arrow_schema::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::debug;
use vecgraph_core::Record;

use crate::error::{Result, StoreError};

const VECTOR_COLUMNS: [&str; 2] = ["vector", "emb"];
const BATCH_SIZE: usize = 8192;

/// Read every record of a Parquet embedding file.
pub fn read_parquet(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?
        .with_batch_size(BATCH_SIZE)
        .build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        let offset = records.len();
        records.extend(records_from_batch(&batch, offset)?);
    }

    debug!(
        path = %path.display(),
        records = records.len(),
        "Read Parquet embedding file"
    );
    Ok(records)
}

/// Convert one Arrow record batch into records. `offset` is the number of
/// rows already read, used for error positions.
pub fn records_from_batch(batch: &RecordBatch, offset: usize) -> Result<Vec<Record>> {
    let ids = string_column(required(batch, &["id"])?, "id")?;
    let doc_ids = batch
        .column_by_name("doc_id")
        .map(|c| string_column(c, "doc_id"))
        .transpose()?;
    let texts = batch
        .column_by_name("text")
        .map(|c| string_column(c, "text"))
        .transpose()?;
    let vectors = required(batch, &VECTOR_COLUMNS)?;

    let mut records = Vec::with_capacity(batch.num_rows());
    for (row, id) in ids.into_iter().enumerate() {
        let id = id.ok_or_else(|| StoreError::Parse {
            line: offset + row + 1,
            message: "null id".to_string(),
        })?;
        let vector = match vector_at(vectors, row, offset + row + 1)? {
            Some(v) if !v.is_empty() => v,
            _ => return Err(StoreError::EmptyVector(id)),
        };
        let doc_id = doc_ids
            .as_ref()
            .and_then(|c| c[row].clone())
            .unwrap_or_else(|| id.clone());
        let text = texts
            .as_ref()
            .and_then(|c| c[row].clone())
            .unwrap_or_default();

        records.push(Record {
            id,
            doc_id,
            text,
            vector,
        });
    }
    Ok(records)
}

fn required<'a>(batch: &'a RecordBatch, names: &[&str]) -> Result<&'a ArrayRef> {
    names
        .iter()
        .find_map(|name| batch.column_by_name(name))
        .ok_or_else(|| StoreError::MissingColumn(names.join(" or ")))
}

fn unsupported(column: &str, data_type: &DataType) -> StoreError {
    StoreError::UnsupportedType {
        column: column.to_string(),
        data_type: data_type.to_string(),
    }
}

fn string_column(array: &ArrayRef, column: &str) -> Result<Vec<Option<String>>> {
    let values = match array.data_type() {
        DataType::Utf8 => array
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::LargeUtf8 => array
            .as_string::<i64>()
            .iter()
            .map(|v| v.map(str::to_string))
            .collect(),
        DataType::Int64 => array
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(|n| n.to_string()))
            .collect(),
        DataType::Int32 => array
            .as_primitive::<Int32Type>()
            .iter()
            .map(|v| v.map(|n| n.to_string()))
            .collect(),
        other => return Err(unsupported(column, other)),
    };
    Ok(values)
}

fn vector_at(array: &ArrayRef, row: usize, line: usize) -> Result<Option<Vec<f32>>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let values = match array.data_type() {
        DataType::List(_) => array.as_list::<i32>().value(row),
        DataType::LargeList(_) => array.as_list::<i64>().value(row),
        DataType::FixedSizeList(_, _) => array.as_fixed_size_list().value(row),
        other => return Err(unsupported("vector", other)),
    };
    floats(&values, line).map(Some)
}

/// Elements of one embedding. `line` is the 1-based row for errors.
fn floats(values: &ArrayRef, line: usize) -> Result<Vec<f32>> {
    if values.null_count() > 0 {
        return Err(StoreError::Parse {
            line,
            message: format!("vector has {} null elements", values.null_count()),
        });
    }
    match values.data_type() {
        DataType::Float32 => Ok(values.as_primitive::<Float32Type>().values().to_vec()),
        DataType::Float64 => Ok(values
            .as_primitive::<Float64Type>()
            .values()
            .iter()
            .map(|v| *v as f32)
            .collect()),
        DataType::Float16 => Ok(values
            .as_primitive::<Float16Type>()
            .values()
            .iter()
            .map(|v| v.to_f32())
            .collect()),
        other => Err(unsupported("vector", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arrow_array::{FixedSizeListArray, Int64Array, ListArray, StringArray};
    use parquet::arrow::ArrowWriter;

    fn write_batch(path: &Path, batch: &RecordBatch) {
        let file = File::create(path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_read_parquet_list_column_named_emb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.parquet");

        let ids = StringArray::from(vec!["r1", "r2"]);
        let doc_ids = StringArray::from(vec!["d1", "d1"]);
        let texts = StringArray::from(vec![Some("first"), None]);
        let emb = ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
            Some(vec![Some(1.0), Some(0.0)]),
            Some(vec![Some(0.0), Some(1.0)]),
        ]);
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("doc_id", Arc::new(doc_ids) as ArrayRef),
            ("text", Arc::new(texts) as ArrayRef),
            ("emb", Arc::new(emb) as ArrayRef),
        ])
        .unwrap();
        write_batch(&path, &batch);

        let records = read_parquet(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "r1");
        assert_eq!(records[0].doc_id, "d1");
        assert_eq!(records[0].text, "first");
        assert_eq!(records[1].text, "");
        assert_eq!(records[1].vector, vec![0.0, 1.0]);
    }

    #[test]
    fn test_read_parquet_fixed_size_list_and_integer_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixed.parquet");

        let ids = Int64Array::from(vec![7, 8]);
        let vectors = FixedSizeListArray::from_iter_primitive::<Float64Type, _, _>(
            vec![
                Some(vec![Some(0.5), Some(0.25), Some(0.0)]),
                Some(vec![Some(1.0), Some(1.0), Some(1.0)]),
            ],
            3,
        );
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("vector", Arc::new(vectors) as ArrayRef),
        ])
        .unwrap();
        write_batch(&path, &batch);

        let records = read_parquet(&path).unwrap();
        assert_eq!(records[0].id, "7");
        assert_eq!(records[0].doc_id, "7");
        assert_eq!(records[0].vector, vec![0.5, 0.25, 0.0]);
        assert_eq!(records[1].dimension(), 3);
    }

    #[test]
    fn test_missing_vector_column() {
        let ids = StringArray::from(vec!["a"]);
        let batch = RecordBatch::try_from_iter(vec![("id", Arc::new(ids) as ArrayRef)]).unwrap();
        let err = records_from_batch(&batch, 0).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn(ref c) if c == "vector or emb"));
    }

    #[test]
    fn test_null_vector_rejected() {
        let ids = StringArray::from(vec!["a", "b"]);
        let emb = ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
            Some(vec![Some(1.0)]),
            None,
        ]);
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("emb", Arc::new(emb) as ArrayRef),
        ])
        .unwrap();
        let err = records_from_batch(&batch, 0).unwrap_err();
        assert!(matches!(err, StoreError::EmptyVector(ref id) if id == "b"));
    }

    #[test]
    fn test_null_vector_element_rejected() {
        let ids = StringArray::from(vec!["a", "b"]);
        let emb = ListArray::from_iter_primitive::<Float32Type, _, _>(vec![
            Some(vec![Some(1.0), Some(0.0)]),
            Some(vec![Some(1.0), None]),
        ]);
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(ids) as ArrayRef),
            ("emb", Arc::new(emb) as ArrayRef),
        ])
        .unwrap();
        let err = records_from_batch(&batch, 10).unwrap_err();
        assert!(matches!(err, StoreError::Parse { line: 12, .. }), "unexpected error: {err}");
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.parquet");
        std::fs::write(&path, b"not parquet").unwrap();
        assert!(matches!(
            read_parquet(&path).unwrap_err(),
            StoreError::Parquet(_)
        ));
    }
}
