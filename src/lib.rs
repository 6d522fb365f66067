//! Table exchange with a hosted table service
//!
//! Reads remote tables into Polars DataFrames (optionally downloading the files
//! their cells reference), writes DataFrames back as new remote tables, and
//! uploads local files as a table of file handles.

pub mod config;
pub mod exchange;
pub mod remote;
