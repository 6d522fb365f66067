//! The remote table service as seen by the exchange operations
//!
//! `TableService` is the seam between the exchange operations and the hosted
//! service. `GrpcTableService` talks to a real server; tests use
//! `MemoryTableService`.

use super::error::Result;
use super::files::{FileHandle, FileInfo};
use super::schema::{ColumnSpec, TableSchema};
use super::session::Credentials;
use polars::prelude::DataFrame;
use std::fmt;
use std::path::Path;

/// Query against a single remote table
///
/// Only the "select all rows" form is ever issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
    table_id: String,
}

impl TableQuery {
    pub fn select_all(table_id: impl Into<String>) -> Self {
        TableQuery {
            table_id: table_id.into(),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }
}

impl fmt::Display for TableQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT * FROM {}", self.table_id)
    }
}

/// Remote identity of a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRef {
    pub row_id: i64,
    pub version: i64,
}

/// Materialized query result
///
/// `row_refs[i]` identifies the row at position `i` of `data`.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub data: DataFrame,
    pub row_refs: Vec<RowRef>,
}

impl QueryResult {
    /// Remote identity of the row at `position`
    ///
    /// Falls back to the position itself (version 0) when the server sent no
    /// row references.
    pub fn row_ref(&self, position: usize) -> RowRef {
        self.row_refs.get(position).copied().unwrap_or(RowRef {
            row_id: position as i64,
            version: 0,
        })
    }
}

/// Rows to append to an existing remote table
#[derive(Debug, Clone)]
pub struct RowSet {
    pub table_id: String,
    pub columns: Vec<ColumnSpec>,
    pub rows: DataFrame,
}

impl RowSet {
    /// All columns of `schema`, rows taken from `rows`
    pub fn for_schema(schema: &TableSchema, rows: DataFrame) -> Self {
        RowSet {
            table_id: schema.id.clone(),
            columns: schema.columns.clone(),
            rows,
        }
    }
}

/// Operations offered by the hosted table service
///
/// Every call is a single blocking round trip from the caller's point of view;
/// implementations do not retry.
#[allow(async_fn_in_trait)]
pub trait TableService {
    /// Log in with explicit credentials or a cached session token
    async fn login(&mut self, credentials: &Credentials) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;

    async fn get_schema(&mut self, table_id: &str) -> Result<TableSchema>;

    async fn query(&mut self, query: &TableQuery) -> Result<QueryResult>;

    /// Download the file referenced by `column` in the given row into `dest_dir`
    ///
    /// Returns `None` when the service reports no file info for the cell.
    async fn download_table_file(
        &mut self,
        schema: &TableSchema,
        row: RowRef,
        column: &str,
        dest_dir: &Path,
    ) -> Result<Option<FileInfo>>;

    /// Create a table from a schema, returning the schema with its new id
    async fn store_schema(&mut self, schema: TableSchema) -> Result<TableSchema>;

    async fn store_rows(&mut self, rows: &RowSet) -> Result<()>;

    async fn upload_file(&mut self, path: &Path) -> Result<FileHandle>;

    /// Create a table and fill it with `data`
    async fn store_table(&mut self, schema: TableSchema, data: &DataFrame) -> Result<TableSchema> {
        let stored = self.store_schema(schema).await?;
        self.store_rows(&RowSet::for_schema(&stored, data.clone()))
            .await?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    #[test]
    fn test_select_all_query_text() {
        assert_eq!(TableQuery::select_all("t12").to_string(), "SELECT * FROM t12");
    }

    #[test]
    fn test_row_ref_falls_back_to_position() {
        let result = QueryResult {
            data: df! { "a" => [1i64, 2, 3] }.unwrap(),
            row_refs: vec![RowRef {
                row_id: 40,
                version: 2,
            }],
        };

        assert_eq!(result.row_ref(0), RowRef { row_id: 40, version: 2 });
        assert_eq!(result.row_ref(2), RowRef { row_id: 2, version: 0 });
    }
}
