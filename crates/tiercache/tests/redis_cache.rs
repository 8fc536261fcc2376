//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up one shared Redis instance; each test
//! works in its own key namespace so they can run concurrently.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tiercache::{
    BackingStore, BreakerState, CacheConfig, InvalidationListener, InvalidationMessage,
    LocalStore, RedisStore, TieredCache,
};
use tiercache_store::{KeyTtl, SCAN_START};
use tokio::sync::OnceCell;
use uuid::Uuid;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");
            (container, url)
        })
        .await;
    url.clone()
}

async fn redis_config() -> CacheConfig {
    CacheConfig {
        remote_endpoint: get_redis_url().await,
        remote_pool_size: 4,
        index_prefix: format!("__tiercache:{}:", Uuid::new_v4().simple()),
        ..CacheConfig::default()
    }
}

fn ns(prefix: &str) -> String {
    format!("{prefix}:{}", Uuid::new_v4().simple())
}

#[tokio::test]
async fn test_redis_store_commands() {
    let config = redis_config().await;
    let store = RedisStore::connect(&config).await.unwrap();
    let key = ns("cmd");

    assert_eq!(store.get(&key).await.unwrap(), None);
    assert_eq!(store.ttl(&key).await.unwrap(), KeyTtl::Missing);

    store
        .set_ex(&key, b"Rvalue", Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(store.get(&key).await.unwrap(), Some(b"Rvalue".to_vec()));
    match store.get_with_ttl(&key).await.unwrap() {
        Some((data, KeyTtl::Expires(ttl))) => {
            assert_eq!(data, b"Rvalue".to_vec());
            assert!(ttl <= Duration::from_secs(60));
        }
        other => panic!("unexpected: {other:?}"),
    }

    let set_key = ns("set");
    store
        .sadd(&set_key, &["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    store.srem(&set_key, &["a".to_string()]).await.unwrap();
    assert_eq!(
        store.smembers(&set_key).await.unwrap(),
        HashSet::from(["b".to_string()])
    );

    assert!(store.del(&key).await.unwrap());
    assert!(!store.del(&key).await.unwrap());
    store.ping().await.unwrap();
}

#[tokio::test]
async fn test_redis_scan_visits_every_key() {
    let config = redis_config().await;
    let store = RedisStore::connect(&config).await.unwrap();
    let prefix = ns("scan");
    for i in 0..120 {
        store
            .set_ex(&format!("{prefix}:{i}"), b"R1", Duration::from_secs(60))
            .await
            .unwrap();
    }

    let mut seen = HashSet::new();
    let mut cursor = SCAN_START;
    loop {
        let page = store
            .scan(cursor, &format!("{prefix}:*"), 50)
            .await
            .unwrap();
        seen.extend(page.keys.iter().cloned());
        if page.is_complete() {
            break;
        }
        cursor = page.next_cursor;
    }
    assert_eq!(seen.len(), 120);
}

#[tokio::test]
async fn test_connect_and_round_trip() {
    let config = redis_config().await;
    let cache = TieredCache::connect(&config).await.unwrap();
    let key = ns("product");
    let value = json!({"name": "widget", "tags": ["a", "b"]});

    cache
        .set(&key, value.clone(), Duration::from_secs(60), &[])
        .await;
    cache.local().remove(&key).await;

    assert_eq!(cache.get(&key).await.as_deref(), Some(&value));
    let health = cache.health();
    assert!(health.remote_healthy);
    assert!(health.remote_connected);
    assert_eq!(health.breaker_state, BreakerState::Closed);
    cache.close().await;
}

#[tokio::test]
async fn test_second_instance_reads_through_l2() {
    let config = redis_config().await;
    let writer = TieredCache::connect(&config).await.unwrap();
    let reader = TieredCache::connect(&config).await.unwrap();
    let key = ns("shared");
    let big = json!({"blob": "y".repeat(8192)});

    writer
        .set(&key, big.clone(), Duration::from_secs(60), &[])
        .await;

    assert_eq!(reader.get(&key).await.as_deref(), Some(&big));
    assert!(reader.local().get(&key).await.is_some());
}

#[tokio::test]
async fn test_tag_and_pattern_invalidation() {
    let config = CacheConfig {
        scan_batch_size: 25,
        ..redis_config().await
    };
    let cache = TieredCache::connect(&config).await.unwrap();
    let user_tag = ns("user");
    let cart = ns("cart");

    cache
        .set(
            &cart,
            json!({"items": [1, 2]}),
            Duration::from_secs(3600),
            &["cart".to_string(), user_tag.clone()],
        )
        .await;
    assert_eq!(cache.invalidate_by_tags(&[user_tag]).await, 1);
    assert!(cache.get(&cart).await.is_none());

    let sessions = ns("session");
    for i in 0..80 {
        cache
            .set(
                &format!("{sessions}:{i}"),
                json!(i),
                Duration::from_secs(3600),
                &[],
            )
            .await;
    }
    let deleted = cache.invalidate_by_pattern(&format!("{sessions}:*")).await;
    assert_eq!(deleted, 80);
    assert!(cache.get(&format!("{sessions}:5")).await.is_none());
}

#[tokio::test]
async fn test_pubsub_invalidates_peer_local_tier() {
    let channel = ns("invalidate");
    let config = CacheConfig {
        invalidation_channel: Some(channel.clone()),
        ..redis_config().await
    };
    let writer = TieredCache::connect(&config).await.unwrap();

    let peer_local = LocalStore::new(100, Duration::from_secs(60));
    let listener = InvalidationListener::new(
        config.remote_endpoint.clone(),
        channel,
        Uuid::new_v4(),
        peer_local.clone(),
    )
    .start();
    // Give the subscriber time to register.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let key = ns("doc");
    writer
        .set(&key, json!(1), Duration::from_secs(60), &[])
        .await;
    peer_local
        .insert(&key, Arc::new(json!(1)), Duration::from_secs(60))
        .await;

    writer.delete(&key).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(peer_local.get(&key).await.is_none());
    listener.abort();
    writer.close().await;
}

#[tokio::test]
async fn test_publish_without_subscribers() {
    let config = redis_config().await;
    let store = RedisStore::connect(&config).await.unwrap();
    let payload = serde_json::to_string(&InvalidationMessage::key(Uuid::new_v4(), "k")).unwrap();
    store.publish(&ns("nobody-listens"), &payload).await.unwrap();
}

#[tokio::test]
async fn test_unreachable_redis_degrades_to_local() {
    let config = CacheConfig {
        remote_endpoint: "redis://127.0.0.1:1".to_string(),
        remote_operation_timeout_seconds: 1,
        ..CacheConfig::default()
    };
    let cache = TieredCache::connect(&config).await.unwrap();

    cache
        .set("fallback_key", json!("fallback"), Duration::from_secs(60), &[])
        .await;
    assert_eq!(
        cache.get("fallback_key").await.as_deref(),
        Some(&json!("fallback"))
    );

    let health = cache.health();
    assert!(!health.remote_connected);
    assert!(health.consecutive_failures >= 2);
}
