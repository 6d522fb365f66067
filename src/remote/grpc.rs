//! `TableService` over gRPC

use super::client::{proto, RemoteClient};
use super::error::{ExchangeError, Result};
use super::files::{self, FileHandle, FileInfo};
use super::schema::TableSchema;
use super::service::{QueryResult, RowRef, RowSet, TableQuery, TableService};
use super::session::Credentials;
use super::table_convert;
use crate::config::ExchangeConfig;
use polars::prelude::*;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

pub struct GrpcTableService {
    client: RemoteClient,
    cached_token: Option<String>,
    chunk_size: usize,
}

impl GrpcTableService {
    pub fn new(client: RemoteClient, cached_token: Option<String>, chunk_size: usize) -> Self {
        GrpcTableService {
            client,
            cached_token,
            chunk_size,
        }
    }

    /// Connect to the configured endpoint
    pub async fn connect(config: &ExchangeConfig) -> Result<Self> {
        let client = RemoteClient::connect(&config.service_uri).await?;
        Ok(Self::new(client, config.token.clone(), config.upload_chunk_size))
    }
}

impl TableService for GrpcTableService {
    async fn login(&mut self, credentials: &Credentials) -> Result<()> {
        let token = match credentials {
            Credentials::UserPassword { username, password } => {
                let mut user_service = self.client.login_service();
                let response = user_service
                    .login(proto::ReqLogin {
                        username: username.clone(),
                        password: password.clone(),
                    })
                    .await?;
                response.into_inner().token
            }
            Credentials::Cached => self.cached_token.clone().ok_or_else(|| {
                ExchangeError::Auth("No cached session token; log in with username and password".into())
            })?,
        };

        if token.is_empty() {
            return Err(ExchangeError::Auth("Server returned an empty session token".into()));
        }

        self.client.set_token(Some(token));
        Ok(())
    }

    async fn logout(&mut self) -> Result<()> {
        if self.client.is_authenticated() {
            let mut user_service = self.client.user_service()?;
            user_service.logout(proto::ReqLogout {}).await?;
            self.client.set_token(None);
        }
        Ok(())
    }

    async fn get_schema(&mut self, table_id: &str) -> Result<TableSchema> {
        let mut table_service = self.client.table_service()?;
        let response = table_service
            .get_schema(proto::ReqGetSchema {
                table_id: table_id.to_string(),
            })
            .await?;

        TableSchema::from_proto(response.into_inner())
    }

    async fn query(&mut self, query: &TableQuery) -> Result<QueryResult> {
        let schema = self.get_schema(query.table_id()).await?;
        let mut table_service = self.client.table_service()?;

        let pages = table_service
            .query(proto::ReqQuery {
                sql: query.to_string(),
            })
            .await?
            .into_inner();

        collect_pages(pages, &schema).await
    }

    async fn download_table_file(
        &mut self,
        schema: &TableSchema,
        row: RowRef,
        column: &str,
        dest_dir: &Path,
    ) -> Result<Option<FileInfo>> {
        let mut file_service = self.client.file_service()?;

        let chunks = file_service
            .download_table_file(proto::ReqDownloadTableFile {
                table_id: schema.id.clone(),
                row_id: row.row_id,
                version_number: row.version,
                column: column.to_string(),
            })
            .await?
            .into_inner();

        let fallback = format!("row{}_{}", row.row_id, column);
        write_download(chunks, dest_dir, &fallback).await
    }

    async fn store_schema(&mut self, schema: TableSchema) -> Result<TableSchema> {
        let mut table_service = self.client.table_service()?;
        let response = table_service.create_schema(schema.to_proto()).await?;
        TableSchema::from_proto(response.into_inner())
    }

    async fn store_rows(&mut self, rows: &RowSet) -> Result<()> {
        let table = table_convert::dataframe_to_table(&rows.rows, &rows.columns)?;

        let mut table_service = self.client.table_service()?;
        let response = table_service
            .store_rows(proto::ReqStoreRows {
                table_id: rows.table_id.clone(),
                columns: rows.columns.iter().map(|c| c.to_proto()).collect(),
                rows: Some(table),
            })
            .await?;

        debug!(
            table_id = %rows.table_id,
            rows = response.into_inner().rows_written,
            "stored rows"
        );
        Ok(())
    }

    async fn upload_file(&mut self, path: &Path) -> Result<FileHandle> {
        let (requests, read_failure) = files::upload_stream(path, self.chunk_size).await?;

        let mut file_service = self.client.file_service()?;
        let response = file_service.upload(requests).await;
        read_failure.check()?;

        let handle = response
            .map_err(|status| match ExchangeError::from(status) {
                ExchangeError::Grpc(status) => files::transfer_error(path, status.message()),
                other => other,
            })?
            .into_inner();

        debug!(path = %path.display(), id = %handle.id, "uploaded file");
        Ok(FileHandle {
            id: handle.id,
            local_path: path.to_path_buf(),
        })
    }
}

/// Row references of one query page, `None` when the page carries none
fn page_row_refs(page: &proto::RespQueryPage, rows: usize) -> Result<Option<Vec<RowRef>>> {
    if page.row_ids.is_empty() && page.row_versions.is_empty() {
        return Ok(None);
    }
    if page.row_ids.len() != rows {
        return Err(ExchangeError::Codec(format!(
            "Query page has {} rows but {} row ids",
            rows,
            page.row_ids.len()
        )));
    }
    if !page.row_versions.is_empty() && page.row_versions.len() != rows {
        return Err(ExchangeError::Codec(format!(
            "Query page has {} rows but {} row versions",
            rows,
            page.row_versions.len()
        )));
    }

    let versions = page.row_versions.iter().copied().chain(std::iter::repeat(0));
    Ok(Some(
        page.row_ids
            .iter()
            .zip(versions)
            .map(|(&row_id, version)| RowRef { row_id, version })
            .collect(),
    ))
}

/// Combine streamed query pages into one result
///
/// Either every row comes with a row reference or none does. Without any
/// rows the result still has the columns of `schema`.
async fn collect_pages<St>(mut pages: St, schema: &TableSchema) -> Result<QueryResult>
where
    St: Stream<Item = std::result::Result<proto::RespQueryPage, tonic::Status>> + Unpin,
{
    let mut data: Option<DataFrame> = None;
    let mut row_refs = Vec::new();
    let mut with_row_refs: Option<bool> = None;

    while let Some(page) = pages.next().await {
        let page = page?;
        let page_df = match page.table.as_ref() {
            Some(table) => table_convert::table_to_dataframe(table)?,
            None => DataFrame::empty(),
        };
        let page_refs = page_row_refs(&page, page_df.height())?;
        if page_df.height() == 0 {
            continue;
        }
        debug!(rows = page_df.height(), "received query page");

        if *with_row_refs.get_or_insert(page_refs.is_some()) != page_refs.is_some() {
            return Err(ExchangeError::Codec(
                "Query pages disagree on whether rows carry row ids".into(),
            ));
        }
        row_refs.extend(page_refs.unwrap_or_default());

        match data.as_mut() {
            Some(acc) => {
                acc.vstack_mut(&page_df)?;
            }
            None => data = Some(page_df),
        }
    }

    let data = match data {
        Some(data) => data,
        None => schema.empty_frame()?,
    };
    Ok(QueryResult { data, row_refs })
}

/// Write a streamed table file into `dest_dir`
///
/// A stream that opens without file metadata has no file: `None`.
async fn write_download<St>(mut chunks: St, dest_dir: &Path, fallback: &str) -> Result<Option<FileInfo>>
where
    St: Stream<Item = std::result::Result<proto::RespDownloadChunk, tonic::Status>> + Unpin,
{
    let Some(first) = chunks.next().await else {
        return Ok(None);
    };
    let first = first?;
    let Some(metadata) = first.metadata.as_ref() else {
        return Ok(None);
    };

    let (path, mut file) = files::create_download_file(dest_dir, &metadata.file_name, fallback).await?;
    let mut chunk = first.chunk;
    let mut size = 0u64;

    loop {
        file.write_all(&chunk)
            .await
            .map_err(|e| files::transfer_error(&path, e))?;
        size += chunk.len() as u64;

        match chunks.next().await {
            Some(next) => chunk = next?.chunk,
            None => break,
        }
    }

    file.flush()
        .await
        .map_err(|e| files::transfer_error(&path, e))?;
    debug!(path = %path.display(), size, "downloaded table file");
    Ok(Some(FileInfo { path, size }))
}
