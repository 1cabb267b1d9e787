//! Remote-verifying authentication interceptor.
//!
//! # Flow
//!
//! 1. Read the `authorization` metadata entry. The value is the raw token;
//!    no scheme prefix is stripped.
//! 2. Missing, empty, non-ASCII or oversized values are rejected locally,
//!    without a remote call.
//! 3. `auth.Auth/Verify` is called over one long-lived channel, bounded by
//!    the verify timeout regardless of the inbound call's own deadline.
//! 4. Any failure (timeout, unreachable service, rejected token) is
//!    `UNAUTHENTICATED`; the wrapped handler is not invoked.
//! 5. On success the [`VerifiedIdentity`] is inserted into the request
//!    extensions for downstream handlers.
//!
//! Dropping the inbound call drops the in-flight verification with it.

use crate::errors::{InterceptorError, AUTHENTICATION_FAILED};
use common::identity::VerifiedIdentity;
use common::jwt::MAX_JWT_SIZE_BYTES;
use common::secret::{ExposeSecret, SecretString};
use proto_gen::auth::auth_client::AuthClient;
use proto_gen::auth::Token;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tower::{Layer, Service};
use tracing::instrument;

/// Metadata key carrying the bearer token.
pub const AUTHORIZATION_KEY: &str = "authorization";

/// Default bound on one remote verification.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound on establishing the channel to the auth service.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Authentication interceptor backed by a remote `auth.Auth` service.
///
/// Cheap to clone; clones share the underlying channel.
#[derive(Clone)]
pub struct AuthInterceptor {
    endpoint: Endpoint,
    /// Created on first verification, inside the runtime serving the call.
    client: Arc<OnceCell<AuthClient<Channel>>>,
    verify_timeout: Duration,
}

impl fmt::Debug for AuthInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthInterceptor")
            .field("endpoint", self.endpoint.uri())
            .field("verify_timeout", &self.verify_timeout)
            .finish_non_exhaustive()
    }
}

impl AuthInterceptor {
    /// Create an interceptor for the auth service at `address`.
    ///
    /// `address` is `host:port` or an `http://` URI. The channel is created
    /// and connected on first use, so neither a Tokio runtime nor a running
    /// auth service is needed here.
    ///
    /// # Errors
    ///
    /// Returns `InterceptorError::InvalidEndpoint` if `address` is not a
    /// valid endpoint.
    pub fn new(address: &str) -> Result<Self, InterceptorError> {
        let uri = endpoint_uri(address)?;
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| InterceptorError::InvalidEndpoint(format!("{uri}: {e}")))?
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT);

        tracing::debug!(target: "auth.interceptor", endpoint = %uri, "Auth interceptor created");

        Ok(Self {
            endpoint,
            client: Arc::new(OnceCell::new()),
            verify_timeout: DEFAULT_VERIFY_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_verify_timeout(mut self, verify_timeout: Duration) -> Self {
        self.verify_timeout = verify_timeout;
        self
    }

    /// Set the connect timeout. Clones made before this call keep the old channel.
    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.endpoint = self.endpoint.connect_timeout(connect_timeout);
        self.client = Arc::new(OnceCell::new());
        self
    }

    pub fn verify_timeout(&self) -> Duration {
        self.verify_timeout
    }

    /// Authenticate a call from its metadata.
    ///
    /// # Errors
    ///
    /// `UNAUTHENTICATED` with a generic message for every failure.
    pub async fn authenticate(&self, metadata: &MetadataMap) -> Result<VerifiedIdentity, Status> {
        let token = token_from_header(
            metadata
                .get(AUTHORIZATION_KEY)
                .map(|value| value.to_str().ok()),
        )?;
        self.verify_remote(token).await
    }

    /// Authenticate a tonic request and attach the identity to it.
    ///
    /// For handlers that authenticate explicitly (e.g. streaming handlers)
    /// instead of sitting behind the layer.
    ///
    /// # Errors
    ///
    /// `UNAUTHENTICATED` with a generic message for every failure.
    pub async fn authorize<T>(&self, mut request: Request<T>) -> Result<Request<T>, Status> {
        let identity = self.authenticate(request.metadata()).await?;
        request.extensions_mut().insert(identity);
        Ok(request)
    }

    #[instrument(skip_all, name = "auth.interceptor.verify")]
    async fn verify_remote(&self, token: SecretString) -> Result<VerifiedIdentity, Status> {
        let start = Instant::now();
        let mut client = self
            .client
            .get_or_init(|| async { AuthClient::new(self.endpoint.connect_lazy()) })
            .await
            .clone();

        let mut request = Request::new(Token {
            token: token.expose_secret().to_owned(),
            user_id: None,
        });
        request.set_timeout(self.verify_timeout);

        let response = match tokio::time::timeout(self.verify_timeout, client.verify(request)).await
        {
            Ok(Ok(response)) => response.into_inner(),
            Ok(Err(status)) if status.code() == Code::Unauthenticated => {
                tracing::debug!(target: "auth.interceptor", "Token rejected by auth service");
                return Err(unauthenticated());
            }
            Ok(Err(status)) => {
                tracing::warn!(
                    target: "auth.interceptor",
                    code = ?status.code(),
                    error = %status.message(),
                    "Auth service call failed"
                );
                return Err(unauthenticated());
            }
            Err(_) => {
                tracing::warn!(
                    target: "auth.interceptor",
                    timeout_ms = self.verify_timeout.as_millis(),
                    "Auth service call timed out"
                );
                return Err(unauthenticated());
            }
        };

        match response.user_id {
            Some(subject) if !subject.is_empty() => {
                tracing::debug!(
                    target: "auth.interceptor",
                    elapsed_ms = start.elapsed().as_millis(),
                    "Call authenticated"
                );
                Ok(VerifiedIdentity::new(subject))
            }
            _ => {
                tracing::warn!(target: "auth.interceptor", "Auth service accepted token without a subject");
                Err(unauthenticated())
            }
        }
    }
}

/// Normalize `host:port` to an `http://` URI.
fn endpoint_uri(address: &str) -> Result<String, InterceptorError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(InterceptorError::InvalidEndpoint(
            "empty address".to_string(),
        ));
    }

    if address.starts_with("http://") {
        Ok(address.to_string())
    } else if address.contains("://") {
        Err(InterceptorError::InvalidEndpoint(format!(
            "only http:// endpoints are supported, got '{address}'"
        )))
    } else {
        Ok(format!("http://{address}"))
    }
}

/// Local checks on the `authorization` value.
///
/// `value` is `None` when the entry is absent and `Some(None)` when it is
/// not valid ASCII.
fn token_from_header(value: Option<Option<&str>>) -> Result<SecretString, Status> {
    let Some(value) = value else {
        tracing::debug!(target: "auth.interceptor", "Missing authorization metadata");
        return Err(unauthenticated());
    };

    let Some(token) = value else {
        tracing::debug!(target: "auth.interceptor", "Authorization metadata is not ASCII");
        return Err(unauthenticated());
    };

    if token.trim().is_empty() {
        tracing::debug!(target: "auth.interceptor", "Empty authorization metadata");
        return Err(unauthenticated());
    }

    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "auth.interceptor",
            token_size = token.len(),
            "Token exceeds size limit"
        );
        return Err(unauthenticated());
    }

    Ok(SecretString::from(token))
}

fn unauthenticated() -> Status {
    Status::unauthenticated(AUTHENTICATION_FAILED)
}

// =============================================================================
// Tower layer
// =============================================================================

impl<S> Layer<S> for AuthInterceptor {
    type Service = AuthInterceptorService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthInterceptorService {
            inner,
            interceptor: self.clone(),
        }
    }
}

/// Tower service produced by [`AuthInterceptor`] as a layer.
#[derive(Clone, Debug)]
pub struct AuthInterceptorService<S> {
    inner: S,
    interceptor: AuthInterceptor,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthInterceptorService<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: http::Request<ReqBody>) -> Self::Future {
        // The instance that was polled ready handles this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let interceptor = self.interceptor.clone();

        let token = token_from_header(
            req.headers()
                .get(http::header::AUTHORIZATION)
                .map(|value| value.to_str().ok()),
        );

        Box::pin(async move {
            let identity = match token {
                Ok(token) => interceptor.verify_remote(token).await,
                Err(status) => Err(status),
            };

            match identity {
                Ok(identity) => {
                    let (mut parts, body) = req.into_parts();
                    parts.extensions.insert(identity);
                    inner.call(http::Request::from_parts(parts, body)).await
                }
                Err(status) => Ok(status.into_http()),
            }
        })
    }
}
