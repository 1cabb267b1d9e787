//! gRPC surface of the auth service.
//!
//! - `auth_service` - `auth.Auth/Verify`, delegating to [`TokenVerifier`](crate::auth::TokenVerifier)

pub mod auth_service;

pub use auth_service::AuthGrpcService;
