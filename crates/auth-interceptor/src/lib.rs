//! Authentication interceptor for tonic servers.
//!
//! Delegates verification of the `authorization` metadata entry of every
//! inbound call to a remote `auth.Auth` service.
//!
//! # Usage
//!
//! ```rust,ignore
//! use auth_interceptor::AuthInterceptor;
//! use common::identity::VerifiedIdentity;
//!
//! let interceptor = AuthInterceptor::new("auth-service:50053")?;
//!
//! Server::builder()
//!     .layer(interceptor)
//!     .add_service(MyServiceServer::new(my_service))
//!     .serve(addr)
//!     .await?;
//!
//! // In a handler:
//! let identity = request.extensions().get::<VerifiedIdentity>();
//! ```
//!
//! # Modules
//!
//! - [`interceptor`] - `AuthInterceptor` and its tower layer
//! - [`errors`] - Construction errors

pub mod errors;
pub mod interceptor;

pub use errors::InterceptorError;
pub use interceptor::{AuthInterceptor, AuthInterceptorService};
