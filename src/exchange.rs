//! Table exchange operations
//!
//! Each operation runs start to finish on a session the caller has opened:
//! query or upload, then store. Nothing is retried and nothing is rolled back;
//! the first failure aborts the operation, leaving behind whatever files were
//! already downloaded and whatever remote objects were already created.

use crate::config::{CopyOptions, FetchOptions, UploadOptions};
use crate::remote::files;
use crate::remote::schema::{derive_columns, ColumnSpec, ColumnType, TableSchema};
use crate::remote::service::{RowSet, TableQuery, TableService};
use crate::remote::session::Session;
use crate::remote::{ExchangeError, FileHandle, Result};
use polars::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A fetched remote table and the files downloaded for it
#[derive(Debug, Clone)]
pub struct FetchedTable {
    pub data: DataFrame,

    /// One entry per requested file column, one element per resolved row.
    /// `None` marks a row without a file; an empty path marks a download for
    /// which the service reported no file info.
    pub downloaded_files: Vec<Vec<Option<PathBuf>>>,
}

#[derive(Debug, Clone)]
pub struct CopiedTable {
    /// Table contents after column removal
    pub data: DataFrame,
    pub table_name: String,
    pub project_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone)]
pub struct UploadedTable {
    pub table_id: String,
    pub project_id: String,
    /// Handles in upload order, one per table row
    pub handles: Vec<FileHandle>,
}

#[derive(Debug, Clone)]
pub struct ConcatenatedTable {
    pub data: DataFrame,
    pub project_id: String,
    pub table_id: String,
}

/// Read a remote table, downloading the files referenced in `file_columns`
///
/// Files are resolved for rows `0..row_limit` (all rows by default) of every
/// requested column, one download at a time, into `output_directory`.
pub async fn fetch_table_and_files<S: TableService>(
    session: &mut Session<S>,
    table_id: &str,
    options: &FetchOptions,
) -> Result<FetchedTable> {
    let service = session.service();

    let schema = service.get_schema(table_id).await?;
    let result = service.query(&TableQuery::select_all(table_id)).await?;
    let rows = result.data.height();

    let mut downloaded_files = Vec::with_capacity(options.file_columns.len());

    if !options.file_columns.is_empty() {
        let row_limit = options.row_limit.unwrap_or(rows);
        if row_limit > rows {
            return Err(ExchangeError::RowOutOfRange { row: rows, rows });
        }

        for column_name in &options.file_columns {
            let column = result
                .data
                .column(column_name)
                .map_err(|_| ExchangeError::MissingColumn(column_name.clone()))?;

            let mut files_per_column = Vec::with_capacity(row_limit);
            for row in 0..row_limit {
                if files::is_missing(&column.get(row)?) {
                    files_per_column.push(None);
                    continue;
                }

                let info = service
                    .download_table_file(
                        &schema,
                        result.row_ref(row),
                        column_name,
                        &options.output_directory,
                    )
                    .await?;
                debug!(column = %column_name, row, ?info, "resolved table file");

                files_per_column.push(Some(info.map(|i| i.path).unwrap_or_default()));
            }
            downloaded_files.push(files_per_column);
        }
    }

    info!(
        table_id,
        rows,
        columns = result.data.width(),
        file_columns = downloaded_files.len(),
        "fetched table"
    );

    Ok(FetchedTable {
        data: result.data,
        downloaded_files,
    })
}

/// Copy a remote table into a new table under `dest_project_id`
///
/// Columns named in `remove_columns` are dropped; every one of them must
/// exist. Removing all columns fails with `EmptySchema` before anything is
/// stored. Remaining columns keep their source types, so file handle columns
/// stay file handle columns. The new table carries no row id/version columns.
pub async fn copy_table<S: TableService>(
    session: &mut Session<S>,
    source_table_id: &str,
    dest_project_id: &str,
    options: &CopyOptions,
) -> Result<CopiedTable> {
    let service = session.service();

    let source = service.get_schema(source_table_id).await?;
    let mut data = service
        .query(&TableQuery::select_all(source_table_id))
        .await?
        .data;

    for name in &options.remove_columns {
        data.drop_in_place(name)
            .map_err(|_| ExchangeError::MissingColumn(name.clone()))?;
    }

    // Remote types of the source win over the ones derived from dtypes
    let columns = derive_columns(&data)?
        .into_iter()
        .map(|derived| source.column(&derived.name).cloned().unwrap_or(derived))
        .collect();
    let schema = TableSchema::new(&options.table_name, dest_project_id, columns)
        .without_row_id_and_version();
    let stored = service.store_table(schema, &data).await?;

    info!(
        source_table_id,
        table_id = %stored.id,
        removed = options.remove_columns.len(),
        "copied table"
    );

    Ok(CopiedTable {
        data,
        table_name: stored.name,
        project_id: stored.parent_id,
        table_id: stored.id,
    })
}

/// Store a local table as a new remote table
///
/// Returns the stored schema, which carries the new table id.
pub async fn write_table<S: TableService>(
    session: &mut Session<S>,
    table_data: &DataFrame,
    dest_project_id: &str,
    table_name: &str,
) -> Result<TableSchema> {
    let schema = TableSchema::new(table_name, dest_project_id, derive_columns(table_data)?)
        .without_row_id_and_version();
    let stored = session.service().store_table(schema, table_data).await?;

    info!(table_id = %stored.id, rows = table_data.height(), "wrote table");
    Ok(stored)
}

/// Upload local files and store their handles as a new single-column table
///
/// Always creates a new table, one row per file in input order. Any failed
/// upload aborts the batch before the table is created.
pub async fn upload_files_as_table<S: TableService, P: AsRef<Path>>(
    session: &mut Session<S>,
    file_paths: &[P],
    dest_project_id: &str,
    options: &UploadOptions,
) -> Result<UploadedTable> {
    let service = session.service();

    let mut handles = Vec::with_capacity(file_paths.len());
    for path in file_paths {
        let handle = service.upload_file(path.as_ref()).await?;
        debug!(path = %path.as_ref().display(), id = %handle.id, "uploaded");
        handles.push(handle);
    }

    let column = ColumnSpec::new(&options.file_column_name, ColumnType::FileHandleId);
    let schema = service
        .store_schema(TableSchema::new(
            &options.table_name,
            dest_project_id,
            vec![column.clone()],
        ))
        .await?;

    let ids: Vec<&str> = handles.iter().map(|h| h.id.as_str()).collect();
    let rows = DataFrame::new(vec![Series::new(column.name.as_str().into(), ids).into_column()])?;
    service
        .store_rows(&RowSet {
            table_id: schema.id.clone(),
            columns: vec![column],
            rows,
        })
        .await?;

    info!(table_id = %schema.id, files = handles.len(), "uploaded files as table");

    Ok(UploadedTable {
        table_id: schema.id,
        project_id: schema.parent_id,
        handles,
    })
}

/// Join tables side by side and store the result as a new remote table
///
/// Rows are aligned by position, see [`concatenate_columns`].
pub async fn concatenate_and_store<S: TableService>(
    session: &mut Session<S>,
    tables: &[DataFrame],
    dest_project_id: &str,
    table_name: &str,
) -> Result<ConcatenatedTable> {
    let data = concatenate_columns(tables)?;

    let schema = TableSchema::new(table_name, dest_project_id, derive_columns(&data)?);
    let stored = session.service().store_table(schema, &data).await?;

    info!(
        table_id = %stored.id,
        tables = tables.len(),
        columns = data.width(),
        "stored concatenated table"
    );

    Ok(ConcatenatedTable {
        data,
        project_id: stored.parent_id,
        table_id: stored.id,
    })
}

/// Column-wise concatenation of tables with equal row counts
///
/// Row `i` of the result is row `i` of every input. Column names must be
/// unique across all inputs.
pub fn concatenate_columns(tables: &[DataFrame]) -> Result<DataFrame> {
    let (first, rest) = tables.split_first().ok_or(ExchangeError::NoTables)?;
    let expected = first.height();

    let mut seen = HashSet::new();
    for (index, table) in tables.iter().enumerate() {
        if table.height() != expected {
            return Err(ExchangeError::RowCountMismatch {
                index,
                expected,
                actual: table.height(),
            });
        }
        for name in table.get_column_names() {
            if !seen.insert(name.to_string()) {
                return Err(ExchangeError::DuplicateColumn(name.to_string()));
            }
        }
    }

    let mut data = first.clone();
    for table in rest {
        data.hstack_mut(table.get_columns())?;
    }
    Ok(data)
}
