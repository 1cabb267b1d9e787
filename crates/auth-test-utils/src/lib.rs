//! # Auth Test Utilities
//!
//! Shared test utilities for the auth service and the auth interceptor.
//!
//! This crate provides:
//! - Fixed RSA key fixtures (two key pairs, one certificate)
//! - Token builders (`TestTokenBuilder`, hostile `none`/HMAC tokens)
//! - A mock identity-provider key endpoint (`MockKeyProvider`)
//! - Server harnesses (`TestAuthServer` runs the real service,
//!   `MockAuthServer` a scriptable stand-in)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let provider = MockKeyProvider::start().await;
//!     provider.serve_keys(&key_set_a(), Some(3600)).await;
//!
//!     let server = TestAuthServer::spawn(&provider.keys_url()).await.unwrap();
//!     let token = TestTokenBuilder::new().subject("alice").sign();
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_auth;
pub mod mock_provider;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_auth::*;
pub use mock_provider::*;
pub use server_harness::*;
pub use token_builders::*;
