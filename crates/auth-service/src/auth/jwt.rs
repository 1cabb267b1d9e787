//! Token verification.
//!
//! Verifies provider-issued ID tokens against the cached provider keys.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only the RSA PKCS#1 v1.5 family (RS256/RS384/RS512) is accepted; `none`,
//!   HMAC and every other method are rejected before any key lookup
//! - The key is selected by `kid` and the signature is verified with exactly
//!   the algorithm the header declared, which must be in the accepted family
//! - `exp` and `nbf` are validated with a bounded clock skew leeway
//! - Every failure surfaces to callers as the same generic error

use crate::auth::claims::Claims;
use crate::auth::key_store::KeyLookup;
use crate::errors::{KeyStoreError, VerifyError};
use crate::observability::metrics;
use common::identity::VerifiedIdentity;
use common::jwt::{decode_header_unverified, JwtValidationError, DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Token verifier backed by a provider key lookup.
pub struct TokenVerifier {
    /// Source of PEM-encoded provider keys.
    keys: Arc<dyn KeyLookup>,

    /// Leeway for `exp`, `nbf` and issued-at checks.
    clock_skew: Duration,

    /// Required `aud`, if configured.
    expected_audience: Option<String>,

    /// Required `iss`, if configured.
    expected_issuer: Option<String>,
}

impl TokenVerifier {
    /// Create a verifier with the default clock skew and no audience or
    /// issuer requirement.
    pub fn new(keys: Arc<dyn KeyLookup>) -> Self {
        Self {
            keys,
            clock_skew: DEFAULT_CLOCK_SKEW,
            expected_audience: None,
            expected_issuer: None,
        }
    }

    /// Set the clock skew leeway, capped at [`MAX_CLOCK_SKEW`].
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew.min(MAX_CLOCK_SKEW);
        self
    }

    #[must_use]
    pub fn with_expected_audience(mut self, audience: impl Into<String>) -> Self {
        self.expected_audience = Some(audience.into());
        self
    }

    #[must_use]
    pub fn with_expected_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.expected_issuer = Some(issuer.into());
        self
    }

    /// Verify a token and return the identity it asserts.
    ///
    /// # Security Checks
    ///
    /// 1. Size check - reject tokens > 8KB before parsing
    /// 2. Header decode - `alg` must be RS256, RS384 or RS512
    /// 3. `kid` must be present and known to the key lookup
    /// 4. Cached PEM must parse as an RSA public key
    /// 5. Signature, `exp` and `nbf` (with leeway), optional `aud`/`iss`
    /// 6. `sub` must be non-empty; `iat`/`auth_time` must not be in the future
    ///
    /// # Errors
    ///
    /// Returns the [`VerifyError`] variant naming the first failed check.
    /// All variants display the same generic message.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        let start = Instant::now();
        let result = self.verify_token(token).await;

        let outcome = match &result {
            Ok(_) => "valid",
            Err(e) => e.reason(),
        };
        metrics::record_verification(outcome, start.elapsed());

        result
    }

    async fn verify_token(&self, token: &str) -> Result<VerifiedIdentity, VerifyError> {
        // 1-2. Size check and header decode (common::jwt)
        let header = decode_header_unverified(token).map_err(|e| match e {
            JwtValidationError::TokenTooLarge => VerifyError::TokenTooLarge,
            JwtValidationError::MalformedToken => VerifyError::MalformedToken,
        })?;

        let Some(algorithm) = rsa_algorithm(&header.alg) else {
            tracing::debug!(
                target: "auth.jwt",
                alg = %header.alg,
                "Token rejected: unexpected signing method"
            );
            return Err(VerifyError::UnsupportedAlgorithm(header.alg));
        };

        // 3. Key lookup
        let Some(kid) = header.kid else {
            tracing::debug!(target: "auth.jwt", "Token rejected: missing key ID");
            return Err(VerifyError::MissingKeyId);
        };

        let pem = self.keys.lookup(&kid).await.map_err(|e| {
            match &e {
                KeyStoreError::KeyNotFound => {
                    tracing::debug!(target: "auth.jwt", kid = %kid, "Token signed with unknown key ID");
                }
                KeyStoreError::Fetch(_) => {
                    tracing::warn!(target: "auth.jwt", error = %e, "Provider keys unavailable");
                }
            }
            VerifyError::KeyUnavailable
        })?;

        // 4. Parse the cached key
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes()).map_err(|e| {
            tracing::error!(
                target: "auth.jwt",
                kid = %kid,
                error = %e,
                "Cached provider key is not a valid RSA public key"
            );
            VerifyError::InternalKeyParseFault
        })?;

        // 5. Signature and registered claims
        let validation = self.validation(algorithm);
        let claims = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "auth.jwt", error = %e, "Token verification failed");
                VerifyError::SignatureOrClaims
            })?
            .claims;

        // 6. Subject and issued-at sanity
        if claims.sub.is_empty() {
            tracing::debug!(target: "auth.jwt", "Token rejected: empty subject");
            return Err(VerifyError::SignatureOrClaims);
        }

        let latest_allowed = chrono::Utc::now()
            .timestamp()
            .saturating_add(self.skew_seconds());
        if claims.iat.is_some_and(|iat| iat > latest_allowed)
            || claims.auth_time.is_some_and(|t| t > latest_allowed)
        {
            tracing::debug!(
                target: "auth.jwt",
                iat = ?claims.iat,
                auth_time = ?claims.auth_time,
                "Token rejected: issued in the future"
            );
            return Err(VerifyError::SignatureOrClaims);
        }

        tracing::debug!(target: "auth.jwt", claims = ?claims, "Token verified");
        Ok(VerifiedIdentity::new(claims.sub))
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        match &self.expected_audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.expected_issuer {
            validation.set_issuer(&[issuer]);
        }

        validation
    }

    fn skew_seconds(&self) -> i64 {
        i64::try_from(self.clock_skew.as_secs()).unwrap_or(i64::MAX)
    }
}

/// Map a header `alg` to an accepted RSA algorithm.
fn rsa_algorithm(alg: &str) -> Option<Algorithm> {
    match alg {
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        _ => None,
    }
}
