//! Auth Service Library
//!
//! Verifies bearer tokens issued by a third-party identity provider and
//! exposes the check as the `auth.Auth/Verify` gRPC operation.
//!
//! # Architecture
//!
//! ```text
//! Verify RPC ──► AuthGrpcService ──► TokenVerifier ──► KeyStore ──► provider key endpoint
//!                                                      (lazy, Cache-Control driven)
//! ```
//!
//! # Modules
//!
//! - [`auth`] - Key cache and token verification
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and their gRPC status mapping
//! - [`grpc`] - gRPC service implementation
//! - [`observability`] - Tracing and Prometheus metrics

pub mod auth;
pub mod config;
pub mod errors;
pub mod grpc;
pub mod observability;
