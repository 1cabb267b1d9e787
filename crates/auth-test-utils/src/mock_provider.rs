//! Mock identity-provider key endpoint.
//!
//! Wraps a `wiremock` server that serves a key set (`{"kid": "pem", ...}`)
//! with a configurable `Cache-Control: max-age`.

use serde_json::{Map, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock serves the key set on.
pub const KEYS_PATH: &str = "/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

/// Mock key provider.
///
/// # Example
/// ```rust,ignore
/// let provider = MockKeyProvider::start().await;
/// provider.serve_keys(&key_set_a(), Some(3600)).await;
/// let store = KeyStore::new(KeyStoreConfig::new(provider.keys_url())).await?;
/// ```
pub struct MockKeyProvider {
    server: MockServer,
}

impl MockKeyProvider {
    /// Start a mock provider with nothing mounted.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Full URL of the key endpoint.
    pub fn keys_url(&self) -> String {
        format!("{}{KEYS_PATH}", self.server.uri())
    }

    /// Underlying wiremock server, for custom mocks.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Serve `keys` on every request.
    pub async fn serve_keys(&self, keys: &[(&str, &str)], max_age: Option<u64>) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(key_set_response(keys, max_age))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` for the next request only.
    ///
    /// Mounted responses are matched in mounting order, so a sequence of
    /// `serve_keys_once` calls models key rotation.
    pub async fn serve_keys_once(&self, keys: &[(&str, &str)], max_age: Option<u64>) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(key_set_response(keys, max_age))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Answer every request with `status` and an empty body.
    pub async fn fail_with(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Number of key fetches received so far.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}

/// Provider response for a key set.
pub fn key_set_response(keys: &[(&str, &str)], max_age: Option<u64>) -> ResponseTemplate {
    let body: Map<String, Value> = keys
        .iter()
        .map(|(kid, pem)| ((*kid).to_string(), Value::String((*pem).to_string())))
        .collect();

    let template = ResponseTemplate::new(200).set_body_json(Value::Object(body));
    match max_age {
        Some(seconds) => template.insert_header(
            "cache-control",
            format!("public, max-age={seconds}, must-revalidate, no-transform").as_str(),
        ),
        None => template,
    }
}
