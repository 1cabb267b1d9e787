//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Bearer tokens are
//! wrapped in [`SecretString`] while they travel through the service so that
//! any struct deriving `Debug` around them stays safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct VerifyAttempt {
//!     method: String,
//!     token: SecretString,  // Safe: Debug shows "[REDACTED]"
//! }
//!
//! let attempt = VerifyAttempt {
//!     method: "/auth.Auth/Verify".to_string(),
//!     token: SecretString::from("eyJhbGciOiJSUzI1NiJ9.e30.sig"),
//! };
//!
//! assert!(!format!("{attempt:?}").contains("eyJhbGci"));
//!
//! // Reading the value requires an explicit call
//! let raw: &str = attempt.token.expose_secret();
//! assert!(raw.starts_with("eyJ"));
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};
