//! Auth interceptor error types.
//!
//! Only construction can fail with an [`InterceptorError`]. Failures while
//! authenticating a call are `tonic::Status` values, always
//! `UNAUTHENTICATED` with a generic message.

use thiserror::Error;

/// Message returned to callers for every rejected call.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

#[derive(Debug, Error)]
pub enum InterceptorError {
    /// The auth service address is not a usable gRPC endpoint.
    #[error("Invalid auth service endpoint: {0}")]
    InvalidEndpoint(String),
}
