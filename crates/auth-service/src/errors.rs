//! Auth service error types.
//!
//! Every verification failure maps to the same `UNAUTHENTICATED` status with a
//! generic message. The variant itself is only used for server-side logs and
//! metrics, so a caller can never tell an unknown key from an unreachable
//! provider or a bad signature.

use thiserror::Error;
use tonic::Status;

/// Generic message returned to callers for every verification failure.
pub const AUTHENTICATION_FAILED: &str = "authentication failed";

/// Errors from the provider key cache.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// Fetching or decoding the provider's key set failed.
    #[error("Key fetch failed: {0}")]
    Fetch(String),

    /// The requested key ID is not in the current key set.
    #[error("Key not found")]
    KeyNotFound,
}

/// Terminal `Invalid` states of token verification.
///
/// `Display` is identical for every variant; use [`VerifyError::reason`] for
/// the internal diagnostic label.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Token exceeds the size limit.
    #[error("authentication failed")]
    TokenTooLarge,

    /// Token is not a structurally valid JWT.
    #[error("authentication failed")]
    MalformedToken,

    /// Header declares a non-RSA signing algorithm (including `none`).
    #[error("authentication failed")]
    UnsupportedAlgorithm(String),

    /// Header has no usable `kid`.
    #[error("authentication failed")]
    MissingKeyId,

    /// Key unknown or provider unreachable.
    #[error("authentication failed")]
    KeyUnavailable,

    /// A cached key could not be parsed as an RSA public key.
    #[error("authentication failed")]
    InternalKeyParseFault,

    /// Signature, expiry, not-before or other claim checks failed.
    #[error("authentication failed")]
    SignatureOrClaims,
}

impl VerifyError {
    /// Internal diagnostic label. Bounded set, safe as a metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            VerifyError::TokenTooLarge => "token_too_large",
            VerifyError::MalformedToken => "malformed_token",
            VerifyError::UnsupportedAlgorithm(_) => "unexpected_signing_method",
            VerifyError::MissingKeyId => "missing_key_id",
            VerifyError::KeyUnavailable => "key_unavailable",
            VerifyError::InternalKeyParseFault => "internal_key_parse_fault",
            VerifyError::SignatureOrClaims => "signature_or_claims",
        }
    }
}

impl From<VerifyError> for Status {
    fn from(_: VerifyError) -> Self {
        Status::unauthenticated(AUTHENTICATION_FAILED)
    }
}
