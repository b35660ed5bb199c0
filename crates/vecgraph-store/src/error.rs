use thiserror::Error;
use vecgraph_core::VecgraphError;

/// Errors raised while loading datasets, queries or judgments.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("missing column '{0}'")]
    MissingColumn(String),

    #[error("column '{column}' has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },

    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("record '{id}' has dimension {found}, expected {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        found: usize,
    },

    #[error("duplicate record id '{0}'")]
    DuplicateId(String),

    #[error("record '{0}' has an empty or null vector")]
    EmptyVector(String),

    #[error("embedding set is empty")]
    Empty,

    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl From<parquet::errors::ParquetError> for StoreError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        StoreError::Parquet(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for StoreError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        StoreError::Parquet(err.to_string())
    }
}

impl From<StoreError> for VecgraphError {
    fn from(err: StoreError) -> Self {
        VecgraphError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
