//! KeyStore integration tests against a mock provider.
//!
//! Exercises the cache through its public API only: fetch counts are read
//! from the mock provider.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use auth_service::auth::{KeyLookup, KeyStore, KeyStoreConfig};
use auth_service::errors::KeyStoreError;
use auth_test_utils::{
    key_set_a, key_set_a_and_b, MockKeyProvider, KEY_A_CERT_PEM, KEY_A_ID, KEY_A_PUBLIC_PEM,
    KEY_B_ID, KEY_B_PUBLIC_PEM,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_lookup_hit_and_miss_within_ttl() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys(&[("key1", "PEM-A")], Some(3600)).await;

    let store = KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
        .await
        .unwrap();

    assert_eq!(store.lookup("key1").await.unwrap(), "PEM-A");
    assert_eq!(store.lookup("key2").await, Err(KeyStoreError::KeyNotFound));

    // No refresh was triggered by the miss
    assert_eq!(provider.fetch_count().await, 1);
}

#[tokio::test]
async fn test_many_lookups_within_ttl_fetch_once() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys(&key_set_a_and_b(), Some(3600)).await;

    let store = KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
        .await
        .unwrap();

    for _ in 0..25 {
        assert_eq!(store.lookup(KEY_A_ID).await.unwrap(), KEY_A_CERT_PEM);
        assert_eq!(store.lookup(KEY_B_ID).await.unwrap(), KEY_B_PUBLIC_PEM);
    }

    assert_eq!(provider.fetch_count().await, 1);
    assert_eq!(store.key_count().await, 2);
}

#[tokio::test]
async fn test_short_ttl_expiry_triggers_refresh_with_rotated_keys() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys_once(&key_set_a(), Some(1)).await;
    provider
        .serve_keys(&[(KEY_B_ID, KEY_B_PUBLIC_PEM)], Some(3600))
        .await;

    let store = KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
        .await
        .unwrap();
    assert_eq!(store.lookup(KEY_A_ID).await.unwrap(), KEY_A_PUBLIC_PEM);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // Stale: refreshed before answering, rotated key set is served
    assert_eq!(store.lookup(KEY_B_ID).await.unwrap(), KEY_B_PUBLIC_PEM);
    assert_eq!(store.lookup(KEY_A_ID).await, Err(KeyStoreError::KeyNotFound));
    assert_eq!(provider.fetch_count().await, 2);
    assert_eq!(store.ttl().await, Duration::from_secs(3600));
}

#[tokio::test]
async fn test_concurrent_lookups_on_stale_cache_coalesce() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys_once(&key_set_a(), Some(1)).await;
    provider.serve_keys(&key_set_a(), Some(3600)).await;

    let store = Arc::new(
        KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
            .await
            .unwrap(),
    );
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..20 {
        let store = Arc::clone(&store);
        tasks.spawn(async move { store.lookup(KEY_A_ID).await });
    }
    while let Some(result) = tasks.join_next().await {
        assert_eq!(result.unwrap().unwrap(), KEY_A_PUBLIC_PEM);
    }

    assert_eq!(provider.fetch_count().await, 2);
}

#[tokio::test]
async fn test_provider_outage_after_expiry_fails_lookups() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys_once(&key_set_a(), Some(1)).await;
    provider.fail_with(503).await;

    let store = KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let result = store.lookup(KEY_A_ID).await;
    assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
}

#[tokio::test]
async fn test_startup_fails_without_initial_key_set() {
    let provider = MockKeyProvider::start().await;
    provider.fail_with(500).await;

    let result = KeyStore::new(KeyStoreConfig::new(provider.keys_url())).await;
    assert!(matches!(result, Err(KeyStoreError::Fetch(_))));
}

#[tokio::test]
async fn test_key_store_usable_as_key_lookup() {
    let provider = MockKeyProvider::start().await;
    provider.serve_keys(&key_set_a(), Some(3600)).await;

    let lookup: Arc<dyn KeyLookup> = Arc::new(
        KeyStore::new(KeyStoreConfig::new(provider.keys_url()))
            .await
            .unwrap(),
    );

    assert_eq!(lookup.lookup(KEY_A_ID).await.unwrap(), KEY_A_PUBLIC_PEM);
}
