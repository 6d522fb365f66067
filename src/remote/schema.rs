//! Remote table schemas
//!
//! A schema names a table, its parent project and its column definitions.
//! Column definitions for a local table are derived from the DataFrame dtypes.

use super::client::proto;
use super::error::{ExchangeError, Result};
use polars::prelude::*;

/// Column types understood by the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Double,
    Integer,
    Boolean,
    /// Reference to an uploaded file
    FileHandleId,
}

impl ColumnType {
    /// Wire name of the column type
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "string",
            ColumnType::Double => "double",
            ColumnType::Integer => "integer",
            ColumnType::Boolean => "boolean",
            ColumnType::FileHandleId => "filehandleid",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "string" => Ok(ColumnType::String),
            "double" => Ok(ColumnType::Double),
            "integer" => Ok(ColumnType::Integer),
            "boolean" => Ok(ColumnType::Boolean),
            "filehandleid" => Ok(ColumnType::FileHandleId),
            other => Err(ExchangeError::Codec(format!("Unknown column type: {}", other))),
        }
    }

    /// Polars dtype of a column of this type
    pub fn dtype(&self) -> DataType {
        match self {
            ColumnType::String | ColumnType::FileHandleId => DataType::String,
            ColumnType::Double => DataType::Float64,
            ColumnType::Integer => DataType::Int64,
            ColumnType::Boolean => DataType::Boolean,
        }
    }

    /// Infer the remote column type from a Polars DataType
    ///
    /// Maps Polars types to remote types:
    /// - String → string
    /// - Float32/Float64 → double
    /// - any integer → integer
    /// - Boolean → boolean
    pub fn from_dtype(dtype: &DataType) -> Option<Self> {
        match dtype {
            DataType::String => Some(ColumnType::String),
            DataType::Boolean => Some(ColumnType::Boolean),
            dt if dt.is_float() => Some(ColumnType::Double),
            dt if dt.is_integer() => Some(ColumnType::Integer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnSpec {
            name: name.into(),
            column_type,
        }
    }

    pub fn to_proto(&self) -> proto::ColumnSchema {
        proto::ColumnSchema {
            name: self.name.clone(),
            column_type: self.column_type.as_str().to_string(),
        }
    }

    pub fn from_proto(column: &proto::ColumnSchema) -> Result<Self> {
        Ok(ColumnSpec::new(
            column.name.clone(),
            ColumnType::parse(&column.column_type)?,
        ))
    }
}

/// Definition of a remote table
///
/// `id` is empty until the schema has been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub id: String,
    pub name: String,
    pub parent_id: String,
    pub columns: Vec<ColumnSpec>,
    pub include_row_id_and_version: bool,
}

impl TableSchema {
    /// New, not yet stored schema under the given project
    pub fn new(name: impl Into<String>, parent_id: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        TableSchema {
            id: String::new(),
            name: name.into(),
            parent_id: parent_id.into(),
            columns,
            include_row_id_and_version: true,
        }
    }

    /// Don't expose row id and version columns on the created table
    pub fn without_row_id_and_version(mut self) -> Self {
        self.include_row_id_and_version = false;
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Zero-row DataFrame with one typed column per definition
    pub fn empty_frame(&self) -> Result<DataFrame> {
        let columns = self
            .columns
            .iter()
            .map(|spec| Series::new_empty(spec.name.as_str().into(), &spec.column_type.dtype()).into_column())
            .collect();
        Ok(DataFrame::new(columns)?)
    }

    pub fn to_proto(&self) -> proto::TableSchema {
        proto::TableSchema {
            id: self.id.clone(),
            name: self.name.clone(),
            parent_id: self.parent_id.clone(),
            columns: self.columns.iter().map(ColumnSpec::to_proto).collect(),
            include_row_id_and_version: self.include_row_id_and_version,
        }
    }

    pub fn from_proto(schema: proto::TableSchema) -> Result<Self> {
        let columns = schema
            .columns
            .iter()
            .map(ColumnSpec::from_proto)
            .collect::<Result<Vec<_>>>()?;

        Ok(TableSchema {
            id: schema.id,
            name: schema.name,
            parent_id: schema.parent_id,
            columns,
            include_row_id_and_version: schema.include_row_id_and_version,
        })
    }
}

/// Derive remote column definitions from a DataFrame
///
/// Fails with `EmptySchema` for a table without columns and with
/// `SchemaInference` for a column whose dtype has no remote counterpart.
pub fn derive_columns(df: &DataFrame) -> Result<Vec<ColumnSpec>> {
    if df.width() == 0 {
        return Err(ExchangeError::EmptySchema);
    }

    df.get_columns()
        .iter()
        .map(|col| {
            let column_type =
                ColumnType::from_dtype(col.dtype()).ok_or_else(|| ExchangeError::SchemaInference {
                    column: col.name().to_string(),
                    dtype: format!("{:?}", col.dtype()),
                })?;
            Ok(ColumnSpec::new(col.name().to_string(), column_type))
        })
        .collect()
}
