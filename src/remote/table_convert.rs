//! DataFrame <-> wire Table conversion
//!
//! Column values travel as TSON lists (see https://github.com/tercen/rustson).
//! The remote column type decides both the encoding and the Polars dtype a
//! decoded column gets:
//! - string, filehandleid → LST of STR/NULL → String
//! - double → LST of F64/NULL → Float64
//! - integer → LSTI64 + null positions → Int64
//! - boolean → LST of BOOL/NULL → Boolean

use super::client::proto;
use super::error::{ExchangeError, Result};
use super::schema::{ColumnSpec, ColumnType};
use polars::prelude::*;
use rustson::Value as TsonValue;

/// Convert a Polars DataFrame to a wire Table
///
/// `columns` gives the remote type of every DataFrame column, in order.
pub fn dataframe_to_table(df: &DataFrame, columns: &[ColumnSpec]) -> Result<proto::Table> {
    if df.width() != columns.len() {
        return Err(ExchangeError::Codec(format!(
            "Table has {} columns but {} column definitions were given",
            df.width(),
            columns.len()
        )));
    }

    let nrows = wire_row_count(df.height())?;
    let mut encoded = Vec::with_capacity(columns.len());

    for (col, spec) in df.get_columns().iter().zip(columns) {
        if col.name().as_str() != spec.name {
            return Err(ExchangeError::Codec(format!(
                "Column '{}' does not match definition '{}'",
                col.name(),
                spec.name
            )));
        }

        let series = col.as_materialized_series();
        let (values, null_rows) = encode_column_values(series, spec.column_type)?;

        encoded.push(proto::Column {
            name: spec.name.clone(),
            r#type: spec.column_type.as_str().to_string(),
            values,
            null_rows,
        });
    }

    Ok(proto::Table {
        n_rows: nrows,
        columns: encoded,
    })
}

fn wire_row_count(rows: usize) -> Result<i32> {
    i32::try_from(rows).map_err(|_| {
        ExchangeError::Codec(format!("Table has {} rows, more than a wire table holds", rows))
    })
}

/// Convert a wire Table back to a Polars DataFrame
pub fn table_to_dataframe(table: &proto::Table) -> Result<DataFrame> {
    if table.columns.is_empty() {
        return Ok(DataFrame::empty());
    }

    let mut columns = Vec::with_capacity(table.columns.len());
    for column in &table.columns {
        let column_type = ColumnType::parse(&column.r#type)?;
        let series = decode_column_values(column, column_type)?;

        if series.len() != table.n_rows as usize {
            return Err(ExchangeError::Codec(format!(
                "Column '{}' has {} values, table has {} rows",
                column.name,
                series.len(),
                table.n_rows
            )));
        }
        columns.push(series.into_column());
    }

    Ok(DataFrame::new(columns)?)
}

fn encode_column_values(series: &Series, column_type: ColumnType) -> Result<(Vec<u8>, Vec<u32>)> {
    let mut null_rows = Vec::new();

    let tson_data = match column_type {
        ColumnType::String => {
            let strings = series.cast(&DataType::String)?;
            let values: Vec<TsonValue> = strings
                .str()?
                .into_iter()
                .map(|opt| {
                    opt.map(|s| TsonValue::STR(s.to_string()))
                        .unwrap_or(TsonValue::NULL)
                })
                .collect();
            TsonValue::LST(values)
        }
        ColumnType::FileHandleId => {
            let values = (0..series.len())
                .map(|i| Ok(file_handle_cell(&series.get(i)?)))
                .collect::<Result<Vec<_>>>()?;
            TsonValue::LST(values)
        }
        ColumnType::Double => {
            let doubles = series.cast(&DataType::Float64)?;
            let values: Vec<TsonValue> = doubles
                .f64()?
                .into_iter()
                .map(|opt| opt.map(TsonValue::F64).unwrap_or(TsonValue::NULL))
                .collect();
            TsonValue::LST(values)
        }
        ColumnType::Integer => {
            let integers = series.strict_cast(&DataType::Int64)?;
            let values: Vec<i64> = integers
                .i64()?
                .into_iter()
                .enumerate()
                .map(|(i, opt)| {
                    if opt.is_none() {
                        null_rows.push(i as u32);
                    }
                    opt.unwrap_or(0)
                })
                .collect();
            TsonValue::LSTI64(values)
        }
        ColumnType::Boolean => {
            let values: Vec<TsonValue> = series
                .bool()?
                .into_iter()
                .map(|opt| opt.map(TsonValue::BOOL).unwrap_or(TsonValue::NULL))
                .collect();
            TsonValue::LST(values)
        }
    };

    let bytes = rustson::encode(&tson_data)
        .map_err(|e| ExchangeError::Codec(format!("Failed to encode TSON: {:?}", e)))?;

    Ok((bytes, null_rows))
}

/// File handle ids are sent as strings; a null or NaN cell means "no file"
fn file_handle_cell(value: &AnyValue) -> TsonValue {
    match value {
        AnyValue::Null => TsonValue::NULL,
        AnyValue::String(s) => TsonValue::STR(s.to_string()),
        AnyValue::StringOwned(s) => TsonValue::STR(s.to_string()),
        numeric => numeric
            .extract::<i64>()
            .map(|id| TsonValue::STR(id.to_string()))
            .unwrap_or(TsonValue::NULL),
    }
}

fn decode_column_values(column: &proto::Column, column_type: ColumnType) -> Result<Series> {
    let name = column.name.as_str();

    if column.values.is_empty() {
        return Ok(Series::new_empty(name.into(), &column_type.dtype()));
    }

    let tson_value = rustson::decode_bytes(&column.values).map_err(|e| {
        ExchangeError::Codec(format!("Failed to decode column '{}': {:?}", name, e))
    })?;

    let series = match (column_type, &tson_value) {
        (ColumnType::String | ColumnType::FileHandleId, TsonValue::LSTSTR(strvec)) => {
            let strings = strvec.try_to_vec().map_err(|e| {
                ExchangeError::Codec(format!("Failed to parse LSTSTR for '{}': {:?}", name, e))
            })?;
            Series::new(name.into(), strings)
        }
        (ColumnType::String | ColumnType::FileHandleId, TsonValue::LST(values)) => {
            let strings = values
                .iter()
                .map(|v| match v {
                    TsonValue::NULL => Ok(None),
                    TsonValue::STR(s) => Ok(Some(s.clone())),
                    other => Err(unexpected(name, other)),
                })
                .collect::<Result<Vec<Option<String>>>>()?;
            Series::new(name.into(), strings)
        }
        (ColumnType::Double, TsonValue::LSTF64(values)) => Series::new(name.into(), values.as_slice()),
        (ColumnType::Double, TsonValue::LST(values)) => {
            let doubles = values
                .iter()
                .map(|v| match v {
                    TsonValue::NULL => Ok(None),
                    TsonValue::F64(f) => Ok(Some(*f)),
                    TsonValue::I32(i) => Ok(Some(*i as f64)),
                    other => Err(unexpected(name, other)),
                })
                .collect::<Result<Vec<Option<f64>>>>()?;
            Series::new(name.into(), doubles)
        }
        (ColumnType::Integer, TsonValue::LSTI64(values)) => {
            let integers = with_null_rows(values.iter().copied(), &column.null_rows);
            Series::new(name.into(), integers)
        }
        (ColumnType::Integer, TsonValue::LSTI32(values)) => {
            let integers = with_null_rows(values.iter().map(|&v| v as i64), &column.null_rows);
            Series::new(name.into(), integers)
        }
        (ColumnType::Boolean, TsonValue::LST(values)) => {
            let flags = values
                .iter()
                .map(|v| match v {
                    TsonValue::NULL => Ok(None),
                    TsonValue::BOOL(b) => Ok(Some(*b)),
                    other => Err(unexpected(name, other)),
                })
                .collect::<Result<Vec<Option<bool>>>>()?;
            Series::new(name.into(), flags)
        }
        (_, other) => return Err(unexpected(name, other)),
    };

    Ok(series)
}

/// Typed integer lists have no null; `null_rows` lists the positions that are
fn with_null_rows(values: impl Iterator<Item = i64>, null_rows: &[u32]) -> Vec<Option<i64>> {
    let mut integers: Vec<Option<i64>> = values.map(Some).collect();
    for &row in null_rows {
        if let Some(cell) = integers.get_mut(row as usize) {
            *cell = None;
        }
    }
    integers
}

fn unexpected(column: &str, value: &TsonValue) -> ExchangeError {
    ExchangeError::Codec(format!(
        "Unexpected TSON value in column '{}': {:?}",
        column, value
    ))
}
