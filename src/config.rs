//! Exchange configuration
//!
//! Connection settings come from an optional JSON file, then from environment
//! variables, then from command-line flags; each layer overrides the previous one.
//! Per-operation settings live in the option structs below, with the defaults
//! the operations have always used.

use crate::remote::files::DEFAULT_CHUNK_SIZE;
use crate::remote::{Credentials, ExchangeError, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable names
pub const ENV_CONFIG: &str = "TABLE_EXCHANGE_CONFIG";
pub const ENV_URI: &str = "TABLE_EXCHANGE_URI";
pub const ENV_TOKEN: &str = "TABLE_EXCHANGE_TOKEN";
pub const ENV_USERNAME: &str = "TABLE_EXCHANGE_USERNAME";
pub const ENV_PASSWORD: &str = "TABLE_EXCHANGE_PASSWORD";
pub const ENV_CHUNK_SIZE: &str = "TABLE_EXCHANGE_CHUNK_SIZE";

const DEFAULT_URI: &str = "http://127.0.0.1:50051";

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Table service endpoint, e.g. https://tables.example.org:5400
    pub service_uri: String,

    /// Cached session token, used when no username/password is given
    pub token: Option<String>,

    pub username: String,

    pub password: String,

    /// Bytes per upload message
    pub upload_chunk_size: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            service_uri: DEFAULT_URI.to_string(),
            token: None,
            username: String::new(),
            password: String::new(),
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("service_uri", &self.service_uri)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("upload_chunk_size", &self.upload_chunk_size)
            .finish()
    }
}

impl ExchangeConfig {
    /// Parse a JSON config file; missing fields keep their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ExchangeError::Config(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            ExchangeError::Config(format!("Invalid config '{}': {}", path.display(), e))
        })
    }

    /// A JSON config file, overridden by the individual `TABLE_EXCHANGE_*`
    /// variables
    pub fn from_file_and_env(path: &Path) -> Result<Self> {
        Self::from_file(path)?.with_vars(|name| std::env::var(name).ok())
    }

    /// Defaults, overridden by `TABLE_EXCHANGE_CONFIG` (a JSON file) and then
    /// by the individual `TABLE_EXCHANGE_*` variables
    pub fn from_env() -> Result<Self> {
        match std::env::var(ENV_CONFIG) {
            Ok(path) => Self::from_file_and_env(Path::new(&path)),
            Err(_) => Self::default().with_vars(|name| std::env::var(name).ok()),
        }
    }

    fn with_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(uri) = var(ENV_URI) {
            self.service_uri = uri;
        }
        if let Some(token) = var(ENV_TOKEN).filter(|t| !t.is_empty()) {
            self.token = Some(token);
        }
        if let Some(username) = var(ENV_USERNAME) {
            self.username = username;
        }
        if let Some(password) = var(ENV_PASSWORD) {
            self.password = password;
        }
        if let Some(size) = var(ENV_CHUNK_SIZE) {
            self.upload_chunk_size = size.parse().map_err(|_| {
                ExchangeError::Config(format!("{} must be a byte count, got '{}'", ENV_CHUNK_SIZE, size))
            })?;
        }

        if self.upload_chunk_size == 0 {
            return Err(ExchangeError::Config("Upload chunk size must be positive".into()));
        }
        Ok(self)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::from_parts(&self.username, &self.password)
    }
}

/// Settings for fetching a table and its file attachments
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Columns holding file handles to download; empty downloads nothing
    pub file_columns: Vec<String>,

    /// Resolve files for the first `n` rows only (None = all rows)
    pub row_limit: Option<usize>,

    /// Directory downloaded files are written to; must exist
    pub output_directory: PathBuf,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            file_columns: Vec::new(),
            row_limit: None,
            output_directory: PathBuf::from("."),
        }
    }
}

/// Settings for copying a remote table
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub table_name: String,

    /// Columns dropped from the copy
    pub remove_columns: Vec<String>,
}

/// Settings for uploading files as a table
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub table_name: String,

    /// Header of the file handle column
    pub file_column_name: String,
}

impl Default for UploadOptions {
    fn default() -> Self {
        UploadOptions {
            table_name: String::new(),
            file_column_name: "fileID".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.service_uri, DEFAULT_URI);
        assert_eq!(config.upload_chunk_size, 5 * 1024 * 1024);
        assert_eq!(config.credentials(), Credentials::Cached);

        assert_eq!(UploadOptions::default().file_column_name, "fileID");
        assert_eq!(FetchOptions::default().output_directory, PathBuf::from("."));
        assert!(FetchOptions::default().row_limit.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let config = ExchangeConfig::default()
            .with_vars(vars(&[
                (ENV_URI, "https://tables.example.org:5400"),
                (ENV_USERNAME, "arno"),
                (ENV_PASSWORD, "secret"),
                (ENV_CHUNK_SIZE, "1024"),
                (ENV_TOKEN, ""),
            ]))
            .unwrap();

        assert_eq!(config.service_uri, "https://tables.example.org:5400");
        assert_eq!(config.upload_chunk_size, 1024);
        assert!(config.token.is_none());
        assert!(matches!(config.credentials(), Credentials::UserPassword { .. }));
    }

    #[test]
    fn test_invalid_chunk_size() {
        let err = ExchangeConfig::default()
            .with_vars(vars(&[(ENV_CHUNK_SIZE, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)));

        let err = ExchangeConfig::default()
            .with_vars(vars(&[(ENV_CHUNK_SIZE, "0")]))
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)));
    }

    #[test]
    fn test_from_file_keeps_missing_fields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.json");
        std::fs::write(&path, r#"{"service_uri": "http://10.0.0.5:50051", "token": "abc"}"#).unwrap();

        let config = ExchangeConfig::from_file(&path).unwrap();
        assert_eq!(config.service_uri, "http://10.0.0.5:50051");
        assert_eq!(config.token.as_deref(), Some("abc"));
        assert_eq!(config.upload_chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_file_values_are_overridden_by_vars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.json");
        std::fs::write(&path, r#"{"service_uri": "http://10.0.0.5:50051", "upload_chunk_size": 0}"#).unwrap();

        let config = ExchangeConfig::from_file(&path)
            .unwrap()
            .with_vars(vars(&[(ENV_CHUNK_SIZE, "2048")]))
            .unwrap();
        assert_eq!(config.service_uri, "http://10.0.0.5:50051");
        assert_eq!(config.upload_chunk_size, 2048);
    }

    #[test]
    fn test_from_file_and_env_validates_chunk_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exchange.json");
        std::fs::write(&path, r#"{"upload_chunk_size": 0}"#).unwrap();

        let err = ExchangeConfig::from_file_and_env(&path).unwrap_err();
        assert!(matches!(err, ExchangeError::Config(_)));
    }
}
