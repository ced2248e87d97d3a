use shisetsu_core::codec::CodecError;
use shisetsu_core::{Column, FieldError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "duckdb")]
    #[error("duckdb error: {0}")]
    DuckDb(#[from] ::duckdb::Error),

    #[error("scope column {0} is not stored here")]
    ScopeColumnMissing(Column),

    #[error("stored columns [{found}] differ from requested [{expected}]")]
    ColumnMismatch { expected: String, found: String },

    #[error("line {line}: {source}")]
    Codec {
        line: usize,
        #[source]
        source: CodecError,
    },

    #[error("row {row}: {source}")]
    Field {
        row: usize,
        #[source]
        source: FieldError,
    },

    #[error("no results for query")]
    NoResults,

    #[error("{0}")]
    Other(String),
}
