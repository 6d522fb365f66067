//! Authenticated sessions
//!
//! A `Session` is opened by the caller, handed to any number of exchange
//! operations, and closed by the caller when done.

use super::error::Result;
use super::service::TableService;
use std::fmt;
use tracing::{debug, instrument};

/// How to log in to the remote service
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    UserPassword { username: String, password: String },
    /// Use the session token the service client already holds
    Cached,
}

impl Credentials {
    /// Username/password when both are non-empty, cached login otherwise
    pub fn from_parts(username: &str, password: &str) -> Self {
        if !username.is_empty() && !password.is_empty() {
            Credentials::UserPassword {
                username: username.to_string(),
                password: password.to_string(),
            }
        } else {
            Credentials::Cached
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::UserPassword { username, .. } => f
                .debug_struct("UserPassword")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Credentials::Cached => f.write_str("Cached"),
        }
    }
}

/// An authenticated session against a table service
pub struct Session<S: TableService> {
    service: S,
}

impl<S: TableService> Session<S> {
    /// Log in and return the open session
    #[instrument(skip_all, err)]
    pub async fn open(mut service: S, credentials: &Credentials) -> Result<Self> {
        debug!(?credentials, "logging in");
        service.login(credentials).await?;
        Ok(Session { service })
    }

    pub fn service(&mut self) -> &mut S {
        &mut self.service
    }

    /// Log out and hand back the underlying service
    pub async fn close(mut self) -> Result<S> {
        self.service.logout().await?;
        debug!("session closed");
        Ok(self.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::error::ExchangeError;
    use crate::remote::memory::MemoryTableService;

    #[test]
    fn test_credentials_from_parts() {
        assert_eq!(Credentials::from_parts("", ""), Credentials::Cached);
        assert_eq!(Credentials::from_parts("arno", ""), Credentials::Cached);
        assert_eq!(
            Credentials::from_parts("arno", "secret"),
            Credentials::UserPassword {
                username: "arno".into(),
                password: "secret".into()
            }
        );
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::from_parts("arno", "secret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("arno"));
        assert!(!printed.contains("secret"));
    }

    #[tokio::test]
    async fn test_open_and_close() {
        let service = MemoryTableService::new().with_user("arno", "secret");
        let creds = Credentials::from_parts("arno", "secret");

        let session = Session::open(service, &creds).await.unwrap();
        let service = session.close().await.unwrap();
        assert!(!service.is_logged_in());
    }

    #[tokio::test]
    async fn test_open_with_bad_password_fails() {
        let service = MemoryTableService::new().with_user("arno", "secret");
        let creds = Credentials::from_parts("arno", "wrong");

        let err = Session::open(service, &creds).await.err().unwrap();
        assert!(matches!(err, ExchangeError::Auth(_)));
    }

    #[tokio::test]
    async fn test_cached_login_requires_cached_token() {
        let err = Session::open(MemoryTableService::new(), &Credentials::Cached)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ExchangeError::Auth(_)));

        let service = MemoryTableService::new().with_cached_login();
        assert!(Session::open(service, &Credentials::Cached).await.is_ok());
    }
}
