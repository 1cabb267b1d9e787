//! JWT utilities shared by the auth service and the interceptor.
//!
//! This module provides:
//! - Size limits for DoS prevention
//! - Clock skew bounds for temporal claim validation
//! - Unverified header inspection (`alg`, `kid`) used to select a key
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header inspection does NOT verify anything; the token MUST still be
//!   verified with the key selected by `kid`
//! - Error messages are generic to prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{decode_header_unverified, MAX_JWT_SIZE_BYTES};
//!
//! let header = decode_header_unverified(token)?;
//! if !header.alg.starts_with("RS") {
//!     return Err("unexpected signing method");
//! }
//! let kid = header.kid.ok_or("missing key ID")?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any base64 decoding or
/// cryptographic operations.
///
/// - Typical identity provider tokens are 800-1200 bytes (RS256 signature,
///   a dozen claims)
/// - 8KB leaves room for custom claims while preventing abuse
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default clock skew tolerance for `exp`/`nbf` validation.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Maximum allowed clock skew tolerance (10 minutes).
///
/// Caps configuration so a typo cannot turn expiry checks into a no-op.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a JWT header.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,
}

// =============================================================================
// Header Types
// =============================================================================

/// The parts of a JWT header needed to pick a verification key.
///
/// Both values are attacker-controlled until the signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtHeader {
    /// Declared signing algorithm, verbatim (e.g. `RS256`, `none`).
    pub alg: String,

    /// Key ID, if present as a non-empty string.
    pub kid: Option<String>,
}

// =============================================================================
// Functions
// =============================================================================

/// Decode a JWT header without verifying the signature.
///
/// Unlike `jsonwebtoken::decode_header`, unknown algorithms such as `none`
/// are returned verbatim instead of failing to parse, so callers can tell an
/// unsupported signing method apart from a structurally broken token.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - A `kid` that is empty or not a string is reported as absent
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds `MAX_JWT_SIZE_BYTES`
/// - `MalformedToken` - Not three dot-separated segments, bad base64, invalid
///   JSON, or `alg` missing / not a string
pub fn decode_header_unverified(token: &str) -> Result<JwtHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let mut parts = token.split('.');
    let (Some(header_part), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let alg = header
        .get("alg")
        .and_then(|v| v.as_str())
        .map(ToString::to_string)
        .ok_or_else(|| {
            tracing::debug!(target: "common.jwt", "JWT header has no string alg");
            JwtValidationError::MalformedToken
        })?;

    let kid = header
        .get("kid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string);

    Ok(JwtHeader { alg, kid })
}

// =============================================================================
// Tests
// =============================================================================
