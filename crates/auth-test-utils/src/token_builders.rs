//! Builder patterns for test tokens.
//!
//! Provides a fluent API for RSA-signed ID tokens plus helpers for the
//! hostile shapes a verifier must reject (`alg: none`, HMAC).

use crate::crypto_fixtures::{KEY_A_ID, KEY_A_PRIVATE_PEM};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Map, Value};

/// Builder for signed test tokens.
///
/// Defaults: subject `test-user`, key ID [`KEY_A_ID`], RS256, issued now,
/// expiring in one hour.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .subject("alice")
///     .expires_in(-60)
///     .sign();
/// ```
pub struct TestTokenBuilder {
    kid: Option<String>,
    algorithm: Algorithm,
    claims: Map<String, Value>,
}

impl TestTokenBuilder {
    /// Create a new token builder with defaults
    pub fn new() -> Self {
        let now = Utc::now();
        let mut claims = Map::new();
        claims.insert("sub".to_string(), json!("test-user"));
        claims.insert("iat".to_string(), json!(now.timestamp()));
        claims.insert("auth_time".to_string(), json!(now.timestamp()));
        claims.insert(
            "exp".to_string(),
            json!((now + Duration::seconds(3600)).timestamp()),
        );

        Self {
            kid: Some(KEY_A_ID.to_string()),
            algorithm: Algorithm::RS256,
            claims,
        }
    }

    /// Set the subject
    pub fn subject(self, subject: &str) -> Self {
        self.claim("sub", json!(subject))
    }

    /// Set the header key ID
    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    /// Omit the header key ID
    pub fn no_kid(mut self) -> Self {
        self.kid = None;
        self
    }

    /// Sign with an RSA algorithm other than RS256
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(self, seconds: i64) -> Self {
        self.claim("exp", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set not-before in seconds from now
    pub fn not_before_in(self, seconds: i64) -> Self {
        self.claim("nbf", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set issued-at in seconds from now
    pub fn issued_at_offset(self, seconds: i64) -> Self {
        self.claim("iat", json!((Utc::now() + Duration::seconds(seconds)).timestamp()))
    }

    /// Set the audience
    pub fn audience(self, audience: &str) -> Self {
        self.claim("aud", json!(audience))
    }

    /// Set the issuer
    pub fn issuer(self, issuer: &str) -> Self {
        self.claim("iss", json!(issuer))
    }

    /// Set an arbitrary claim
    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    /// Remove a claim, including the defaults
    pub fn remove_claim(mut self, name: &str) -> Self {
        self.claims.remove(name);
        self
    }

    /// Build the claims as a JSON value
    pub fn build_claims(&self) -> Value {
        Value::Object(self.claims.clone())
    }

    /// Sign with key A
    pub fn sign(self) -> String {
        self.sign_with(KEY_A_PRIVATE_PEM)
    }

    /// Sign with the given PKCS#8 RSA private key
    pub fn sign_with(self, private_pem: &str) -> String {
        let mut header = Header::new(self.algorithm);
        header.kid = self.kid.clone();

        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .expect("test private key should be a valid RSA PEM");
        encode(&header, &self.build_claims(), &key).expect("test token should encode")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_claims(subject: &str) -> Value {
    let now = Utc::now();
    json!({
        "sub": subject,
        "iat": now.timestamp(),
        "exp": (now + Duration::seconds(3600)).timestamp(),
    })
}

/// Token with header `{"alg":"none"}` and an empty signature.
pub fn unsigned_token(kid: &str, subject: &str) -> String {
    let header = json!({"alg": "none", "typ": "JWT", "kid": kid});
    let header_b64 = URL_SAFE_NO_PAD.encode(header.to_string());
    let claims_b64 = URL_SAFE_NO_PAD.encode(default_claims(subject).to_string());
    format!("{header_b64}.{claims_b64}.")
}

/// Token signed with HS256 using `secret`.
pub fn hs256_token(kid: &str, secret: &[u8], subject: &str) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(
        &header,
        &default_claims(subject),
        &EncodingKey::from_secret(secret),
    )
    .expect("HS256 token should encode")
}
