use super::error::{ExchangeError, Result};
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::transport::{Channel, ClientTlsConfig};
use tonic::{Request, Status};

// Include the generated protobuf code
#[allow(
    dead_code,
    unused_imports,
    clippy::large_enum_variant,
    clippy::enum_variant_names
)]
pub mod proto {
    tonic::include_proto!("table_exchange");
}

use proto::file_service_client::FileServiceClient;
use proto::table_service_client::TableServiceClient;
use proto::user_service_client::UserServiceClient;

pub type AuthChannel = tonic::service::interceptor::InterceptedService<Channel, AuthInterceptor>;

/// Type alias for authenticated TableService client
pub type AuthTableServiceClient = TableServiceClient<AuthChannel>;

/// Type alias for authenticated FileService client
pub type AuthFileServiceClient = FileServiceClient<AuthChannel>;

/// Type alias for authenticated UserService client
pub type AuthUserServiceClient = UserServiceClient<AuthChannel>;

/// Interceptor that adds token authentication to all requests
#[derive(Clone)]
pub struct AuthInterceptor {
    token: MetadataValue<tonic::metadata::Ascii>,
}

impl AuthInterceptor {
    fn new(token: &str) -> Result<Self> {
        let token = token
            .parse()
            .map_err(|e| ExchangeError::Auth(format!("Invalid token format: {}", e)))?;

        Ok(AuthInterceptor { token })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        request
            .metadata_mut()
            .insert("authorization", self.token.clone());
        Ok(request)
    }
}

/// gRPC connection to the table service
///
/// Holds the channel and, once logged in, the session token.
pub struct RemoteClient {
    channel: Channel,
    token: Option<String>,
}

impl RemoteClient {
    /// Connect to the specified endpoint; no login happens here
    pub async fn connect(endpoint: &str) -> Result<Self> {
        // Configure TLS only for https:// endpoints
        let use_tls = endpoint.starts_with("https://");

        let mut channel_builder = Channel::from_shared(endpoint.to_string())
            .map_err(|e| ExchangeError::Config(format!("Invalid endpoint '{}': {}", endpoint, e)))?;

        if use_tls {
            let tls = ClientTlsConfig::new().with_native_roots();
            channel_builder = channel_builder.tls_config(tls).map_err(|e| {
                ExchangeError::Config(format!("Failed to configure TLS for '{}': {}", endpoint, e))
            })?;
        }

        let channel = channel_builder.connect().await.map_err(|e| {
            ExchangeError::Connection(format!("Failed to connect to '{}': {}", endpoint, e))
        })?;

        Ok(RemoteClient {
            channel,
            token: None,
        })
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn interceptor(&self) -> Result<AuthInterceptor> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ExchangeError::Auth("Not logged in".into()))?;
        AuthInterceptor::new(token)
    }

    /// Get a UserService client without authentication, for logging in
    pub fn login_service(&self) -> UserServiceClient<Channel> {
        UserServiceClient::new(self.channel.clone())
    }

    /// Get a UserService client with authentication
    pub fn user_service(&self) -> Result<AuthUserServiceClient> {
        Ok(UserServiceClient::with_interceptor(
            self.channel.clone(),
            self.interceptor()?,
        ))
    }

    /// Get a TableService client with authentication
    pub fn table_service(&self) -> Result<AuthTableServiceClient> {
        Ok(TableServiceClient::with_interceptor(
            self.channel.clone(),
            self.interceptor()?,
        ))
    }

    /// Get a FileService client with authentication
    pub fn file_service(&self) -> Result<AuthFileServiceClient> {
        Ok(FileServiceClient::with_interceptor(
            self.channel.clone(),
            self.interceptor()?,
        ))
    }
}
