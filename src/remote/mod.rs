//! Remote table service client
//!
//! Structure:
//! - `client.rs`: gRPC channel and authentication
//! - `grpc.rs`: `TableService` over gRPC
//! - `memory.rs`: in-process `TableService`
//! - `service.rs`: the `TableService` trait and its request/response types
//! - `session.rs`: credentials and login sessions
//! - `schema.rs`: table schemas and schema derivation
//! - `table_convert.rs`: DataFrame <-> wire table codec
//! - `files.rs`: file handles, downloads and upload chunking
//! - `error.rs`: Error types

pub mod client;
pub mod error;
pub mod files;
pub mod grpc;
pub mod memory;
pub mod schema;
pub mod service;
pub mod session;
pub mod table_convert;

// Re-exports for convenience
pub use error::{ExchangeError, Result};
pub use files::{FileHandle, FileInfo};
pub use grpc::GrpcTableService;
pub use memory::MemoryTableService;
pub use schema::{ColumnSpec, ColumnType, TableSchema};
pub use service::{QueryResult, RowRef, RowSet, TableQuery, TableService};
pub use session::{Credentials, Session};
