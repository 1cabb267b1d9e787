//! Token verification and provider key caching.
//!
//! - [`key_store`] - Self-refreshing cache of the provider's public keys
//! - [`jwt`] - Token verifier built on the key store
//! - [`claims`] - Claims read from a verified token

pub mod claims;
pub mod jwt;
pub mod key_store;

pub use claims::Claims;
pub use jwt::TokenVerifier;
pub use key_store::{KeyLookup, KeyStore, KeyStoreConfig};
