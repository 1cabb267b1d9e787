//! Provider signing key cache.
//!
//! The identity provider publishes its current signing keys as a JSON object
//! mapping key ID to a PEM-encoded RSA public key (or X.509 certificate), and
//! states how long that set may be trusted through `Cache-Control: max-age`.
//!
//! # Refresh model
//!
//! - Refresh is lazy: a lookup that finds the cache older than its TTL
//!   refreshes BEFORE answering, and fails if the refresh fails
//! - A missing or malformed `max-age` keeps the previous TTL; the initial
//!   TTL is zero, so a provider that never sends one is fetched on every lookup
//! - Readers clone an `Arc` snapshot, so they see the old or the new key set
//!   and TTL, never a mix
//! - Refreshes go through a single gate; a task that waited on the gate
//!   reuses the outcome of an attempt another task completed in the meantime:
//!   the new snapshot on success (generation check), the same error on failure
//!   (attempt epoch check). A lookup blocks for at most one fetch.

use crate::errors::KeyStoreError;
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CACHE_CONTROL};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default HTTP timeout for a key fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum cache age before a key-ID miss may force a refresh.
///
/// Stops a stream of tokens with made-up key IDs from turning into a stream
/// of provider fetches.
pub const MISS_REFRESH_MIN_AGE: Duration = Duration::from_secs(10);

/// Lookup of a PEM-encoded public key by key ID.
///
/// [`KeyStore`] is the production implementation. The trait exists so that
/// [`TokenVerifier`](crate::auth::TokenVerifier) can be driven by an
/// in-memory key set in tests.
#[async_trait]
pub trait KeyLookup: Send + Sync {
    /// Return the PEM for `kid`.
    ///
    /// # Errors
    ///
    /// `KeyNotFound` if the key set has no such key, `Fetch` if the key set
    /// had to be refreshed and the refresh failed.
    async fn lookup(&self, kid: &str) -> Result<String, KeyStoreError>;
}

/// Key store settings.
#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    /// Provider key endpoint.
    pub keys_url: String,

    /// HTTP timeout for a single fetch.
    pub fetch_timeout: Duration,

    /// Refresh once when a key ID is missing from a fresh cache.
    pub refresh_on_miss: bool,
}

impl KeyStoreConfig {
    /// Settings with the default timeout and `refresh_on_miss` disabled.
    pub fn new(keys_url: impl Into<String>) -> Self {
        Self {
            keys_url: keys_url.into(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            refresh_on_miss: false,
        }
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_on_miss(mut self, refresh_on_miss: bool) -> Self {
        self.refresh_on_miss = refresh_on_miss;
        self
    }
}

/// Immutable key set snapshot.
struct KeyCache {
    /// Key ID to PEM.
    keys: HashMap<String, String>,

    /// When the fetch that produced this snapshot completed.
    fetched_at: Instant,

    /// How long this snapshot may be trusted.
    ttl: Duration,

    /// Incremented by every successful refresh.
    generation: u64,
}

impl KeyCache {
    fn is_stale(&self) -> bool {
        self.fetched_at.elapsed() >= self.ttl
    }
}

/// Outcome of the most recent refresh attempt. Guarded by the refresh gate.
#[derive(Default)]
struct LastAttempt {
    /// Incremented by every completed attempt, successful or not.
    epoch: u64,

    /// Error of the most recent attempt, if it failed.
    failure: Option<KeyStoreError>,
}

/// Result of one provider fetch.
struct FetchedKeys {
    keys: HashMap<String, String>,
    max_age: Option<Duration>,
}

/// Self-refreshing cache of the provider's public signing keys.
pub struct KeyStore {
    /// URL of the provider key endpoint.
    keys_url: String,

    /// HTTP client with the fetch timeout applied.
    http_client: reqwest::Client,

    /// Current snapshot. The write lock is held only for the pointer swap.
    cache: RwLock<Arc<KeyCache>>,

    /// Serializes refreshes.
    refresh_gate: Mutex<LastAttempt>,

    /// Mirror of `LastAttempt::epoch`, readable without the gate.
    attempts: AtomicU64,

    refresh_on_miss: bool,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("keys_url", &self.keys_url)
            .field("refresh_on_miss", &self.refresh_on_miss)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Create a key store and perform the initial fetch.
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::Fetch` if the HTTP client cannot be built or
    /// the initial fetch fails. There is no key store without one successful
    /// fetch.
    #[instrument(skip_all, fields(keys_url = %config.keys_url))]
    pub async fn new(config: KeyStoreConfig) -> Result<Self, KeyStoreError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| {
                tracing::error!(target: "auth.keys", error = %e, "Failed to build HTTP client");
                KeyStoreError::Fetch(format!("failed to build HTTP client: {e}"))
            })?;

        let start = Instant::now();
        let fetched = fetch_keys(&http_client, &config.keys_url).await;
        metrics::record_key_refresh(fetched.is_ok(), start.elapsed());
        let fetched = fetched?;

        let cache = KeyCache {
            ttl: fetched.max_age.unwrap_or(Duration::ZERO),
            keys: fetched.keys,
            fetched_at: Instant::now(),
            generation: 1,
        };
        metrics::set_keys_cached(cache.keys.len());

        tracing::info!(
            target: "auth.keys",
            key_count = cache.keys.len(),
            ttl_secs = cache.ttl.as_secs(),
            "Initial key set fetched"
        );

        Ok(Self {
            keys_url: config.keys_url,
            http_client,
            cache: RwLock::new(Arc::new(cache)),
            refresh_gate: Mutex::new(LastAttempt::default()),
            attempts: AtomicU64::new(0),
            refresh_on_miss: config.refresh_on_miss,
        })
    }

    /// Look up the PEM for `kid`, refreshing first if the cache is stale.
    ///
    /// # Errors
    ///
    /// - `KeyStoreError::Fetch` if a required refresh failed; the stale key
    ///   set is never served
    /// - `KeyStoreError::KeyNotFound` if the (fresh) key set has no such key
    #[instrument(skip_all, fields(kid = %kid))]
    pub async fn lookup(&self, kid: &str) -> Result<String, KeyStoreError> {
        let observed_attempt = self.attempts.load(Ordering::Acquire);
        let mut snapshot = self.snapshot().await;

        if snapshot.is_stale() {
            tracing::debug!(
                target: "auth.keys",
                age_secs = snapshot.fetched_at.elapsed().as_secs(),
                ttl_secs = snapshot.ttl.as_secs(),
                "Key set stale, refreshing before lookup"
            );
            snapshot = self
                .refresh_if_unchanged(snapshot.generation, observed_attempt)
                .await?;
        }

        if let Some(pem) = snapshot.keys.get(kid) {
            return Ok(pem.clone());
        }

        if self.refresh_on_miss && snapshot.fetched_at.elapsed() >= MISS_REFRESH_MIN_AGE {
            tracing::debug!(target: "auth.keys", "Key ID not in key set, refreshing on miss");
            let observed_attempt = self.attempts.load(Ordering::Acquire);
            snapshot = self
                .refresh_if_unchanged(snapshot.generation, observed_attempt)
                .await?;
            if let Some(pem) = snapshot.keys.get(kid) {
                return Ok(pem.clone());
            }
        }

        tracing::debug!(target: "auth.keys", "Key ID not found in key set");
        Err(KeyStoreError::KeyNotFound)
    }

    /// Unconditionally fetch the key set and swap it in.
    ///
    /// # Errors
    ///
    /// Returns `KeyStoreError::Fetch` if the fetch fails; the current key set
    /// is left untouched.
    pub async fn refresh(&self) -> Result<(), KeyStoreError> {
        let mut last = self.refresh_gate.lock().await;
        let current = self.snapshot().await;
        self.refresh_locked(&mut last, &current).await.map(|_| ())
    }

    /// Number of keys in the current snapshot.
    pub async fn key_count(&self) -> usize {
        self.snapshot().await.keys.len()
    }

    /// TTL of the current snapshot.
    pub async fn ttl(&self) -> Duration {
        self.snapshot().await.ttl
    }

    async fn snapshot(&self) -> Arc<KeyCache> {
        Arc::clone(&*self.cache.read().await)
    }

    /// Refresh unless another task already finished an attempt since the
    /// caller observed generation `observed` and attempt epoch `observed_attempt`.
    async fn refresh_if_unchanged(
        &self,
        observed: u64,
        observed_attempt: u64,
    ) -> Result<Arc<KeyCache>, KeyStoreError> {
        let mut last = self.refresh_gate.lock().await;

        let current = self.snapshot().await;
        if current.generation != observed {
            tracing::debug!(
                target: "auth.keys",
                generation = current.generation,
                "Key set refreshed by a concurrent lookup"
            );
            return Ok(current);
        }

        if last.epoch != observed_attempt {
            if let Some(failure) = &last.failure {
                tracing::debug!(
                    target: "auth.keys",
                    epoch = last.epoch,
                    "Concurrent key set refresh failed, not retrying"
                );
                return Err(failure.clone());
            }
        }

        self.refresh_locked(&mut last, &current).await
    }

    /// Fetch, swap and record the attempt. `last` is the held refresh gate.
    async fn refresh_locked(
        &self,
        last: &mut LastAttempt,
        current: &KeyCache,
    ) -> Result<Arc<KeyCache>, KeyStoreError> {
        tracing::info!(target: "auth.keys", "Refreshing provider key set");

        let start = Instant::now();
        let fetched = fetch_keys(&self.http_client, &self.keys_url).await;
        metrics::record_key_refresh(fetched.is_ok(), start.elapsed());

        last.epoch = last.epoch.wrapping_add(1);
        last.failure = fetched.as_ref().err().cloned();
        self.attempts.store(last.epoch, Ordering::Release);

        let fetched = fetched.map_err(|e| {
            tracing::warn!(
                target: "auth.keys",
                error = %e,
                "Key set refresh failed, stale keys will not be served"
            );
            e
        })?;

        if fetched.max_age.is_none() {
            tracing::debug!(
                target: "auth.keys",
                "No usable max-age in response, keeping previous TTL"
            );
        }

        let next = Arc::new(KeyCache {
            ttl: fetched.max_age.unwrap_or(current.ttl),
            keys: fetched.keys,
            fetched_at: Instant::now(),
            generation: current.generation + 1,
        });

        *self.cache.write().await = Arc::clone(&next);
        metrics::set_keys_cached(next.keys.len());

        tracing::info!(
            target: "auth.keys",
            key_count = next.keys.len(),
            ttl_secs = next.ttl.as_secs(),
            generation = next.generation,
            "Provider key set refreshed"
        );

        Ok(next)
    }

    /// Pretend the current snapshot was fetched `by` earlier.
    #[cfg(test)]
    async fn backdate(&self, by: Duration) {
        let mut cache = self.cache.write().await;
        let fetched_at = cache
            .fetched_at
            .checked_sub(by)
            .unwrap_or(cache.fetched_at);
        *cache = Arc::new(KeyCache {
            keys: cache.keys.clone(),
            fetched_at,
            ttl: cache.ttl,
            generation: cache.generation,
        });
    }
}

#[async_trait]
impl KeyLookup for KeyStore {
    async fn lookup(&self, kid: &str) -> Result<String, KeyStoreError> {
        KeyStore::lookup(self, kid).await
    }
}

/// Fetch and decode the provider key set.
async fn fetch_keys(client: &reqwest::Client, url: &str) -> Result<FetchedKeys, KeyStoreError> {
    tracing::debug!(target: "auth.keys", url = %url, "Fetching provider key set");

    let response = client.get(url).send().await.map_err(|e| {
        tracing::error!(target: "auth.keys", error = %e, "Failed to fetch provider key set");
        KeyStoreError::Fetch(format!("request failed: {e}"))
    })?;

    let status = response.status();
    if !status.is_success() {
        tracing::error!(target: "auth.keys", status = %status, "Key endpoint returned error");
        return Err(KeyStoreError::Fetch(format!("unexpected status {status}")));
    }

    let max_age = parse_max_age(response.headers());

    let keys: HashMap<String, String> = response.json().await.map_err(|e| {
        tracing::error!(target: "auth.keys", error = %e, "Failed to decode provider key set");
        KeyStoreError::Fetch(format!("invalid key set body: {e}"))
    })?;

    if keys.is_empty() {
        tracing::error!(target: "auth.keys", "Provider returned an empty key set");
        return Err(KeyStoreError::Fetch("empty key set".to_string()));
    }

    Ok(FetchedKeys { keys, max_age })
}

/// First `max-age=<seconds>` directive across all `Cache-Control` values.
fn parse_max_age(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|directive| {
            let (name, value) = directive.trim().split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            value
                .trim()
                .trim_matches('"')
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use tokio::task::JoinSet;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEYS_PATH: &str = "/robot/v1/metadata/x509/securetoken";

    fn keys_response(keys: serde_json::Value, cache_control: Option<&str>) -> ResponseTemplate {
        let template = ResponseTemplate::new(200).set_body_json(keys);
        match cache_control {
            Some(value) => template.insert_header("cache-control", value),
            None => template,
        }
    }

    async fn mount_once(server: &MockServer, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(response)
            .up_to_n_times(1)
            .expect(1)
            .mount(server)
            .await;
    }

    fn config(server: &MockServer) -> KeyStoreConfig {
        KeyStoreConfig::new(format!("{}{KEYS_PATH}", server.uri()))
    }

    // -------------------------------------------------------------------------
    // parse_max_age
    // -------------------------------------------------------------------------

    fn headers(values: &[&str]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for value in values {
            map.append(CACHE_CONTROL, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_parse_max_age_typical_provider_header() {
        let map = headers(&["public, max-age=19204, must-revalidate, no-transform"]);
        assert_eq!(parse_max_age(&map), Some(Duration::from_secs(19204)));
    }

    #[test]
    fn test_parse_max_age_absent() {
        assert_eq!(parse_max_age(&HeaderMap::new()), None);
        assert_eq!(parse_max_age(&headers(&["no-cache"])), None);
    }

    #[test]
    fn test_parse_max_age_malformed_value() {
        assert_eq!(parse_max_age(&headers(&["max-age=soon"])), None);
        assert_eq!(parse_max_age(&headers(&["max-age=-5"])), None);
    }

    #[test]
    fn test_parse_max_age_ignores_s_maxage() {
        assert_eq!(parse_max_age(&headers(&["s-maxage=100"])), None);
        assert_eq!(
            parse_max_age(&headers(&["s-maxage=100, max-age=60"])),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_parse_max_age_first_match_across_repeated_headers() {
        let map = headers(&["public", "max-age=120", "max-age=999"]);
        assert_eq!(parse_max_age(&map), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_parse_max_age_case_insensitive_and_quoted() {
        assert_eq!(
            parse_max_age(&headers(&["Max-Age=\"30\""])),
            Some(Duration::from_secs(30))
        );
    }

    // -------------------------------------------------------------------------
    // Initial fetch
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_new_fetches_and_records_ttl() {
        let server = MockServer::start().await;
        mount_once(
            &server,
            keys_response(json!({"key1": "PEM-A", "key2": "PEM-B"}), Some("max-age=3600")),
        )
        .await;

        let store = KeyStore::new(config(&server)).await.unwrap();

        assert_eq!(store.key_count().await, 2);
        assert_eq!(store.ttl().await, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn test_new_without_max_age_defaults_to_zero_ttl() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), None)).await;

        let store = KeyStore::new(config(&server)).await.unwrap();

        assert_eq!(store.ttl().await, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_new_fails_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = KeyStore::new(config(&server)).await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(msg)) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_new_fails_on_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let result = KeyStore::new(config(&server)).await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_new_fails_on_wrong_json_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"keys": [1, 2]})))
            .mount(&server)
            .await;

        let result = KeyStore::new(config(&server)).await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_new_fails_on_empty_key_set() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let result = KeyStore::new(config(&server)).await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(msg)) if msg.contains("empty")));
    }

    #[tokio::test]
    async fn test_new_fails_when_provider_unreachable() {
        let store_config = KeyStoreConfig::new("http://127.0.0.1:1/keys")
            .with_fetch_timeout(Duration::from_millis(500));

        let result = KeyStore::new(store_config).await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
    }

    // -------------------------------------------------------------------------
    // Lookup within TTL
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_lookups_within_ttl_fetch_once() {
        let server = MockServer::start().await;
        mount_once(
            &server,
            keys_response(json!({"key1": "PEM-A"}), Some("public, max-age=3600")),
        )
        .await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        for _ in 0..10 {
            assert_eq!(store.lookup("key1").await.unwrap(), "PEM-A");
        }

        server.verify().await;
    }

    #[tokio::test]
    async fn test_unknown_key_within_ttl_does_not_refresh() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=3600"))).await;

        let store = KeyStore::new(config(&server)).await.unwrap();

        assert_eq!(store.lookup("key1").await.unwrap(), "PEM-A");
        assert_eq!(store.lookup("key2").await, Err(KeyStoreError::KeyNotFound));

        server.verify().await;
    }

    // -------------------------------------------------------------------------
    // Lookup after TTL expiry
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_zero_ttl_refreshes_on_every_lookup() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(keys_response(json!({"key1": "PEM-A"}), Some("max-age=0")))
            .expect(4)
            .mount(&server)
            .await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        for _ in 0..3 {
            assert_eq!(store.lookup("key1").await.unwrap(), "PEM-A");
        }

        server.verify().await;
    }

    #[tokio::test]
    async fn test_expired_cache_refreshes_once_and_serves_rotated_keys() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=60"))).await;
        mount_once(
            &server,
            keys_response(json!({"key2": "PEM-B"}), Some("max-age=3600")),
        )
        .await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        store.backdate(Duration::from_secs(61)).await;

        assert_eq!(store.lookup("key2").await.unwrap(), "PEM-B");
        assert_eq!(store.lookup("key1").await, Err(KeyStoreError::KeyNotFound));
        assert_eq!(store.lookup("key2").await.unwrap(), "PEM-B");
        assert_eq!(store.ttl().await, Duration::from_secs(3600));

        server.verify().await;
    }

    #[tokio::test]
    async fn test_failed_refresh_returns_error_instead_of_stale_key() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=60"))).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        store.backdate(Duration::from_secs(61)).await;

        let result = store.lookup("key1").await;
        assert!(matches!(result, Err(KeyStoreError::Fetch(_))));

        // The old snapshot is kept but still stale, so the next lookup retries
        assert_eq!(store.key_count().await, 1);
        assert!(matches!(store.lookup("key1").await, Err(KeyStoreError::Fetch(_))));
    }

    #[tokio::test]
    async fn test_refresh_without_max_age_keeps_previous_ttl() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=600"))).await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A2"}), Some("no-cache"))).await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        store.backdate(Duration::from_secs(601)).await;

        assert_eq!(store.lookup("key1").await.unwrap(), "PEM-A2");
        assert_eq!(store.ttl().await, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_concurrent_stale_lookups_coalesce_into_one_fetch() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=60"))).await;
        mount_once(
            &server,
            keys_response(json!({"key1": "PEM-A2"}), Some("max-age=3600")),
        )
        .await;

        let store = Arc::new(KeyStore::new(config(&server)).await.unwrap());
        store.backdate(Duration::from_secs(61)).await;

        let mut tasks = JoinSet::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.lookup("key1").await });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().unwrap(), "PEM-A2");
        }

        // One initial fetch plus exactly one refresh
        server.verify().await;
    }

    #[tokio::test]
    async fn test_concurrent_stale_lookups_share_one_failed_fetch() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=60"))).await;
        // Provider hangs well past the fetch timeout
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(
                keys_response(json!({"key1": "PEM-A2"}), Some("max-age=3600"))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let store = Arc::new(
            KeyStore::new(config(&server).with_fetch_timeout(Duration::from_millis(500)))
                .await
                .unwrap(),
        );
        store.backdate(Duration::from_secs(61)).await;

        let start = Instant::now();
        let mut tasks = JoinSet::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            tasks.spawn(async move { store.lookup("key1").await });
        }
        while let Some(result) = tasks.join_next().await {
            assert!(matches!(result.unwrap(), Err(KeyStoreError::Fetch(_))));
        }
        let slowest = start.elapsed();

        assert!(
            slowest < Duration::from_millis(1500),
            "slowest lookup took {slowest:?}"
        );
        // Initial fetch plus one shared attempt
        assert_eq!(server.received_requests().await.unwrap().len(), 2);

        // A later lookup retries instead of replaying the old failure
        assert!(matches!(
            store.lookup("key1").await,
            Err(KeyStoreError::Fetch(_))
        ));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_explicit_refresh_swaps_key_set() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=3600"))).await;
        mount_once(
            &server,
            keys_response(json!({"key1": "PEM-A", "key2": "PEM-B"}), Some("max-age=3600")),
        )
        .await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        assert_eq!(store.lookup("key2").await, Err(KeyStoreError::KeyNotFound));

        store.refresh().await.unwrap();

        assert_eq!(store.lookup("key2").await.unwrap(), "PEM-B");
        assert_eq!(store.key_count().await, 2);
    }

    // -------------------------------------------------------------------------
    // refresh_on_miss policy
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_refresh_on_miss_finds_rotated_key() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=3600"))).await;
        mount_once(
            &server,
            keys_response(json!({"key1": "PEM-A", "key2": "PEM-B"}), Some("max-age=3600")),
        )
        .await;

        let store = KeyStore::new(config(&server).with_refresh_on_miss(true))
            .await
            .unwrap();
        store.backdate(MISS_REFRESH_MIN_AGE).await;

        assert_eq!(store.lookup("key2").await.unwrap(), "PEM-B");
        server.verify().await;
    }

    #[tokio::test]
    async fn test_refresh_on_miss_is_rate_limited_by_cache_age() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=3600"))).await;

        let store = KeyStore::new(config(&server).with_refresh_on_miss(true))
            .await
            .unwrap();

        // Cache was just fetched, so misses do not reach the provider
        for _ in 0..5 {
            assert_eq!(store.lookup("unknown").await, Err(KeyStoreError::KeyNotFound));
        }
        server.verify().await;
    }

    #[tokio::test]
    async fn test_refresh_on_miss_disabled_never_refreshes_fresh_cache() {
        let server = MockServer::start().await;
        mount_once(&server, keys_response(json!({"key1": "PEM-A"}), Some("max-age=3600"))).await;

        let store = KeyStore::new(config(&server)).await.unwrap();
        store.backdate(MISS_REFRESH_MIN_AGE * 2).await;

        assert_eq!(store.lookup("key2").await, Err(KeyStoreError::KeyNotFound));
        server.verify().await;
    }

    #[test]
    fn test_key_store_config_builders() {
        let store_config = KeyStoreConfig::new("https://example.test/keys")
            .with_fetch_timeout(Duration::from_secs(2))
            .with_refresh_on_miss(true);

        assert_eq!(store_config.keys_url, "https://example.test/keys");
        assert_eq!(store_config.fetch_timeout, Duration::from_secs(2));
        assert!(store_config.refresh_on_miss);
        assert_eq!(
            KeyStoreConfig::new("x").fetch_timeout,
            DEFAULT_FETCH_TIMEOUT
        );
    }
}
