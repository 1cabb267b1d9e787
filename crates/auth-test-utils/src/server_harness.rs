//! Test server harness for E2E testing
//!
//! Provides [`TestAuthServer`] for spawning the real `auth.Auth` gRPC service
//! in-process, backed by a real [`KeyStore`] pointed at a mock provider.

use auth_service::auth::{KeyStore, KeyStoreConfig, TokenVerifier};
use auth_service::grpc::AuthGrpcService;
use proto_gen::auth::auth_client::AuthClient;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};

/// Test harness running the auth service on a random local port.
///
/// The server task is aborted when the harness is dropped.
///
/// # Example
/// ```rust,ignore
/// let provider = MockKeyProvider::start().await;
/// provider.serve_keys(&key_set_a(), Some(3600)).await;
///
/// let server = TestAuthServer::spawn(&provider.keys_url()).await?;
/// let mut client = server.client().await?;
/// ```
pub struct TestAuthServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestAuthServer {
    /// Spawn the service with a key store fetching from `keys_url`.
    ///
    /// # Returns
    /// * `Ok(TestAuthServer)` - Running server instance
    /// * `Err(anyhow::Error)` - If the initial key fetch or bind fails
    pub async fn spawn(keys_url: &str) -> Result<Self, anyhow::Error> {
        let key_store = KeyStore::new(KeyStoreConfig::new(keys_url))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create key store: {}", e))?;

        Self::spawn_with_verifier(TokenVerifier::new(Arc::new(key_store))).await
    }

    /// Spawn the service around a preconfigured verifier.
    pub async fn spawn_with_verifier(verifier: TokenVerifier) -> Result<Self, anyhow::Error> {
        let service = AuthGrpcService::new(Arc::new(verifier));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = Server::builder()
                .add_service(service.into_server())
                .serve_with_incoming(TcpListenerStream::new(listener))
                .await
            {
                eprintln!("Test auth server error: {}", e);
            }
        });

        Ok(Self { addr, handle })
    }

    /// Get the socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the `http://` URL of the server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Connect a generated `auth.Auth` client.
    pub async fn client(&self) -> Result<AuthClient<Channel>, anyhow::Error> {
        AuthClient::connect(self.url())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to test server: {}", e))
    }
}

impl Drop for TestAuthServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
