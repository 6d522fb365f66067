//! In-process table service
//!
//! Keeps tables and files in memory and pushes every stored row set through the
//! wire codec, so it behaves like a server for the exchange operations. Used by
//! the test suites of this crate and of downstream callers.

use super::error::{ExchangeError, Result};
use super::files::{self, FileHandle, FileInfo, DEFAULT_CHUNK_SIZE};
use super::schema::TableSchema;
use super::service::{QueryResult, RowRef, RowSet, TableQuery, TableService};
use super::session::Credentials;
use super::table_convert;
use futures::StreamExt;
use polars::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::io::AsyncWriteExt;

struct StoredTable {
    schema: TableSchema,
    data: DataFrame,
    row_refs: Vec<RowRef>,
}

struct StoredFile {
    name: String,
    content: Vec<u8>,
}

#[derive(Default)]
pub struct MemoryTableService {
    users: HashMap<String, String>,
    cached_login: bool,
    logged_in: bool,
    projects: HashSet<String>,
    tables: HashMap<String, StoredTable>,
    files: HashMap<String, StoredFile>,
    next_id: u64,
    downloads: usize,
}

impl MemoryTableService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password.to_string());
        self
    }

    /// Accept `Credentials::Cached`
    pub fn with_cached_login(mut self) -> Self {
        self.cached_login = true;
        self
    }

    pub fn with_project(mut self, project_id: &str) -> Self {
        self.projects.insert(project_id.to_string());
        self
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Create a table directly, without a session; returns its id
    pub fn seed_table(&mut self, schema: TableSchema, data: DataFrame) -> Result<String> {
        let stored = self.create_table(schema)?;
        self.append_rows(&RowSet::for_schema(&stored, data))?;
        Ok(stored.id)
    }

    /// Add a file as if it had been uploaded; returns its handle id
    pub fn seed_file(&mut self, name: &str, content: &[u8]) -> String {
        let id = self.next_id("file");
        self.files.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                content: content.to_vec(),
            },
        );
        id
    }

    pub fn table(&self, table_id: &str) -> Option<&DataFrame> {
        self.tables.get(table_id).map(|t| &t.data)
    }

    pub fn table_schema(&self, table_id: &str) -> Option<&TableSchema> {
        self.tables.get(table_id).map(|t| &t.schema)
    }

    pub fn file_content(&self, handle_id: &str) -> Option<&[u8]> {
        self.files.get(handle_id).map(|f| f.content.as_slice())
    }

    /// Number of files served by `download_table_file`
    pub fn download_count(&self) -> usize {
        self.downloads
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn ensure_logged_in(&self) -> Result<()> {
        if self.logged_in {
            Ok(())
        } else {
            Err(ExchangeError::Auth("Not logged in".into()))
        }
    }

    fn stored(&self, table_id: &str) -> Result<&StoredTable> {
        self.tables
            .get(table_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("Table {}", table_id)))
    }

    fn create_table(&mut self, mut schema: TableSchema) -> Result<TableSchema> {
        if !self.projects.contains(&schema.parent_id) {
            return Err(ExchangeError::NotFound(format!("Project {}", schema.parent_id)));
        }
        if schema.columns.is_empty() {
            return Err(tonic::Status::invalid_argument("Schema has no columns").into());
        }

        schema.id = self.next_id("t");
        let data = schema.empty_frame()?;
        self.tables.insert(
            schema.id.clone(),
            StoredTable {
                schema: schema.clone(),
                data,
                row_refs: Vec::new(),
            },
        );
        Ok(schema)
    }

    fn append_rows(&mut self, rows: &RowSet) -> Result<()> {
        // Same path as over the wire: encode, then decode on the "server"
        let wire = table_convert::dataframe_to_table(&rows.rows, &rows.columns)?;
        let decoded = table_convert::table_to_dataframe(&wire)?;

        let table = self
            .tables
            .get_mut(&rows.table_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("Table {}", rows.table_id)))?;

        if rows.columns != table.schema.columns {
            return Err(tonic::Status::invalid_argument(format!(
                "Row columns do not match schema of {}",
                rows.table_id
            ))
            .into());
        }

        let first_row_id = table.row_refs.len() as i64 + 1;
        table.row_refs.extend((0..decoded.height() as i64).map(|i| RowRef {
            row_id: first_row_id + i,
            version: 1,
        }));
        table.data.vstack_mut(&decoded)?;
        Ok(())
    }
}

impl TableService for MemoryTableService {
    async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let accepted = match credentials {
            Credentials::UserPassword { username, password } => {
                self.users.get(username) == Some(password)
            }
            Credentials::Cached => self.cached_login,
        };

        if !accepted {
            return Err(ExchangeError::Auth("Invalid credentials".into()));
        }
        self.logged_in = true;
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        self.logged_in = false;
        Ok(())
    }

    async fn get_schema(&mut self, table_id: &str) -> Result<TableSchema> {
        self.ensure_logged_in()?;
        Ok(self.stored(table_id)?.schema.clone())
    }

    async fn query(&mut self, query: &TableQuery) -> Result<QueryResult> {
        self.ensure_logged_in()?;
        let table = self.stored(query.table_id())?;
        Ok(QueryResult {
            data: table.data.clone(),
            row_refs: table.row_refs.clone(),
        })
    }

    async fn download_table_file(
        &mut self,
        schema: &TableSchema,
        row: RowRef,
        column: &str,
        dest_dir: &Path,
    ) -> Result<Option<FileInfo>> {
        self.ensure_logged_in()?;
        let table = self.stored(&schema.id)?;

        let position = table
            .row_refs
            .iter()
            .position(|r| r.row_id == row.row_id)
            .ok_or_else(|| ExchangeError::NotFound(format!("Row {} of {}", row.row_id, schema.id)))?;
        let cell = table
            .data
            .column(column)
            .map_err(|_| ExchangeError::NotFound(format!("Column {} of {}", column, schema.id)))?
            .get(position)?;

        let handle_id = match cell {
            AnyValue::String(s) => s.to_string(),
            AnyValue::StringOwned(s) => s.to_string(),
            _ => return Ok(None),
        };
        let Some(file) = self.files.get(&handle_id) else {
            return Ok(None);
        };

        let fallback = format!("row{}_{}", row.row_id, column);
        let (path, mut local) = files::create_download_file(dest_dir, &file.name, &fallback).await?;
        local
            .write_all(&file.content)
            .await
            .map_err(|e| files::transfer_error(&path, e))?;
        local
            .flush()
            .await
            .map_err(|e| files::transfer_error(&path, e))?;

        let size = file.content.len() as u64;
        self.downloads += 1;
        Ok(Some(FileInfo { path, size }))
    }

    async fn store_schema(&mut self, schema: TableSchema) -> Result<TableSchema> {
        self.ensure_logged_in()?;
        self.create_table(schema)
    }

    async fn store_rows(&mut self, rows: &RowSet) -> Result<()> {
        self.ensure_logged_in()?;
        self.append_rows(rows)
    }

    async fn upload_file(&mut self, path: &Path) -> Result<FileHandle> {
        self.ensure_logged_in()?;

        let (requests, read_failure) = files::upload_stream(path, DEFAULT_CHUNK_SIZE).await?;
        let requests: Vec<_> = requests.collect().await;
        read_failure.check()?;

        let name = requests
            .first()
            .and_then(|r| r.metadata.as_ref())
            .map(|m| m.file_name.clone())
            .unwrap_or_default();
        let content: Vec<u8> = requests.into_iter().flat_map(|r| r.chunk).collect();

        let id = self.seed_file(&name, &content);
        Ok(FileHandle {
            id,
            local_path: path.to_path_buf(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::schema::{derive_columns, ColumnSpec, ColumnType};

    fn logged_in() -> MemoryTableService {
        let mut service = MemoryTableService::new().with_project("p1").with_cached_login();
        service.logged_in = true;
        service
    }

    #[tokio::test]
    async fn test_calls_require_login() {
        let mut service = MemoryTableService::new();
        let err = service.get_schema("t1").await.unwrap_err();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_store_schema_under_unknown_project() {
        let mut service = logged_in();
        let schema = TableSchema::new("x", "p9", vec![ColumnSpec::new("a", ColumnType::String)]);
        let err = service.store_schema(schema).await.unwrap_err();
        assert!(matches!(err, ExchangeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_store_table_then_query() {
        let mut service = logged_in();
        let df = df! { "a" => ["x", "y"], "b" => [1.0, 2.0] }.unwrap();
        let schema = TableSchema::new("t", "p1", derive_columns(&df).unwrap());

        let stored = service.store_table(schema, &df).await.unwrap();
        let result = service.query(&TableQuery::select_all(&stored.id)).await.unwrap();

        assert!(result.data.equals(&df));
        assert_eq!(result.row_refs.len(), 2);
        assert_eq!(result.row_refs[0].row_id, 1);
    }

    #[tokio::test]
    async fn test_rows_must_match_schema() {
        let mut service = logged_in();
        let schema = TableSchema::new("t", "p1", vec![ColumnSpec::new("a", ColumnType::String)]);
        let stored = service.store_schema(schema).await.unwrap();

        let rows = RowSet {
            table_id: stored.id.clone(),
            columns: vec![ColumnSpec::new("b", ColumnType::String)],
            rows: df! { "b" => ["x"] }.unwrap(),
        };
        let err = service.store_rows(&rows).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Grpc(_)));
    }

    #[tokio::test]
    async fn test_download_of_unknown_handle_reports_no_file_info() {
        let mut service = logged_in();
        let columns = vec![ColumnSpec::new("audio", ColumnType::FileHandleId)];
        let data = df! { "audio" => ["file999"] }.unwrap();
        let id = service
            .seed_table(TableSchema::new("t", "p1", columns), data)
            .unwrap();
        let schema = service.table_schema(&id).unwrap().clone();

        let dir = tempfile::tempdir().unwrap();
        let info = service
            .download_table_file(&schema, RowRef { row_id: 1, version: 1 }, "audio", dir.path())
            .await
            .unwrap();
        assert!(info.is_none());
    }
}
