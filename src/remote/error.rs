use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when exchanging tables with the remote service
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Bad or missing credentials, or a call made without a login
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Unknown table, project or row on the remote side
    #[error("Not found: {0}")]
    NotFound(String),

    /// A named column is absent from a dataset
    #[error("Column '{0}' not found in table")]
    MissingColumn(String),

    /// A column's type cannot be mapped to a remote column type
    #[error("Cannot infer column type for '{column}' from {dtype}")]
    SchemaInference { column: String, dtype: String },

    /// A table needs at least one column to be stored
    #[error("Cannot store a table without columns")]
    EmptySchema,

    /// Upload or download failure
    #[error("Transfer of '{path}' failed: {reason}")]
    Transfer { path: PathBuf, reason: String },

    /// A row position beyond the end of the dataset
    #[error("Row {row} is out of range for a table with {rows} rows")]
    RowOutOfRange { row: usize, rows: usize },

    /// Tables concatenated column-wise must have the same height
    #[error("Table {index} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// A column name appears in more than one concatenated table
    #[error("Duplicate column '{0}'")]
    DuplicateColumn(String),

    /// Concatenation of an empty list of tables
    #[error("No tables to concatenate")]
    NoTables,

    /// Configuration error (missing env vars, invalid URIs, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Column values could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(String),

    /// gRPC protocol error not covered by a more specific variant
    #[error("gRPC error: {0}")]
    Grpc(Box<tonic::Status>),

    /// gRPC transport error
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Table error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tonic::Status> for ExchangeError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated | tonic::Code::PermissionDenied => {
                ExchangeError::Auth(status.message().to_string())
            }
            tonic::Code::NotFound => ExchangeError::NotFound(status.message().to_string()),
            _ => ExchangeError::Grpc(Box::new(status)),
        }
    }
}

/// Type alias for Results using ExchangeError
pub type Result<T> = std::result::Result<T, ExchangeError>;
