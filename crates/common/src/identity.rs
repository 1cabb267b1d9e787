//! Verified caller identity.
//!
//! [`VerifiedIdentity`] is the only artifact handed back to callers once a
//! bearer token has been verified. The auth service produces it from the
//! token's `sub` claim, and the interceptor inserts it into request
//! extensions so downstream handlers can read who is calling.

use std::fmt;

/// Identity established by a successfully verified bearer token.
///
/// The subject is a user identifier and is redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    subject: String,
}

impl VerifiedIdentity {
    /// Create an identity for the given subject.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }

    /// The verified subject (`sub` claim).
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Consume the identity, returning the subject.
    #[must_use]
    pub fn into_subject(self) -> String {
        self.subject
    }
}

impl fmt::Debug for VerifiedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedIdentity")
            .field("subject", &"[REDACTED]")
            .finish()
    }
}
