use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use kanban_cache::{CacheEntry, CacheKey, CacheStore, InMemoryStore, NoopStore};
use kanban_core::BackendId;
use serde_json::json;

fn spaces(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn entry(value: &'static str, ttl: Duration, key_spaces: &[&str], generation: u64) -> CacheEntry {
    CacheEntry::new(
        Bytes::from(value),
        BackendId::General,
        ttl,
        &spaces(key_spaces),
        generation,
    )
}

fn stock_key(sku: &str) -> CacheKey {
    CacheKey::new("reserve_stock", &json!({"sku": sku, "qty": 5}))
}

#[tokio::test]
async fn test_hit_and_miss() {
    let store = InMemoryStore::new();
    assert!(store.get(&stock_key("X1")).await.is_none());

    let stored = store
        .put(stock_key("X1"), entry("{\"reserved\":true}", Duration::from_secs(60), &["stock"], 0))
        .await;
    assert!(stored);

    let hit = store.get(&stock_key("X1")).await.unwrap();
    assert_eq!(hit.value, Bytes::from("{\"reserved\":true}"));
    assert_eq!(hit.source, BackendId::General);
    assert!(store.get(&stock_key("X2")).await.is_none());
}

#[tokio::test]
async fn test_expired_entry_is_never_served() {
    let store = InMemoryStore::new();
    store
        .put(stock_key("X1"), entry("v", Duration::from_millis(20), &["stock"], 0))
        .await;
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(store.get(&stock_key("X1")).await.is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_evict_expired() {
    let store = InMemoryStore::new();
    store
        .put(stock_key("short"), entry("a", Duration::from_millis(10), &["stock"], 0))
        .await;
    store
        .put(stock_key("long"), entry("b", Duration::from_secs(60), &["stock"], 0))
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(store.evict_expired().await, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_invalidate_only_touches_named_key_spaces() {
    let store = InMemoryStore::new();
    let tags = CacheKey::new("list_tags", &json!({}));
    let articles = CacheKey::new("list_articles", &json!({}));
    let stock = stock_key("X1");
    store.put(tags.clone(), entry("t", Duration::from_secs(60), &["tags", "articles"], 0)).await;
    store.put(articles.clone(), entry("a", Duration::from_secs(60), &["articles"], 0)).await;
    store.put(stock.clone(), entry("s", Duration::from_secs(60), &["stock"], 0)).await;

    let removed = store.invalidate(&spaces(&["articles"])).await;
    assert_eq!(removed, 2);
    assert!(store.get(&tags).await.is_none());
    assert!(store.get(&articles).await.is_none());
    assert!(store.get(&stock).await.is_some());
}

#[tokio::test]
async fn test_invalidation_advances_generation() {
    let store = InMemoryStore::new();
    let g0 = store.generation().await;
    store.invalidate(&spaces(&["stock"])).await;
    assert_eq!(store.generation().await, g0 + 1);
}

#[tokio::test]
async fn test_put_from_read_older_than_invalidation_is_refused() {
    let store = InMemoryStore::new();
    // A slow read observes the generation, then a write invalidates.
    let observed = store.generation().await;
    store.invalidate(&spaces(&["stock"])).await;

    let stored = store
        .put(stock_key("X1"), entry("stale", Duration::from_secs(60), &["stock"], observed))
        .await;
    assert!(!stored);
    assert!(store.get(&stock_key("X1")).await.is_none());

    // Other key spaces are unaffected by the mark.
    let other = CacheKey::new("list_orders", &json!({}));
    assert!(
        store
            .put(other, entry("o", Duration::from_secs(60), &["orders"], observed))
            .await
    );

    // A read that started after the invalidation may populate.
    let fresh = store.generation().await;
    assert!(
        store
            .put(stock_key("X1"), entry("fresh", Duration::from_secs(60), &["stock"], fresh))
            .await
    );
}

#[tokio::test]
async fn test_concurrent_invalidation_never_leaves_stale_entries() {
    let store = Arc::new(InMemoryStore::new());
    let mut tasks = Vec::new();
    for i in 0..64u64 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            let observed = store.generation().await;
            if i % 2 == 0 {
                store.invalidate(&["stock".to_string()]).await;
            }
            store
                .put(stock_key(&format!("X{i}")), entry("v", Duration::from_secs(60), &["stock"], observed))
                .await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let final_generation = store.generation().await;
    for i in 0..64u64 {
        if let Some(e) = store.get(&stock_key(&format!("X{i}"))).await {
            assert_eq!(e.generation, final_generation);
        }
    }
}

#[tokio::test]
async fn test_remove_and_clear() {
    let store = InMemoryStore::new();
    store.put(stock_key("a"), entry("a", Duration::from_secs(60), &["stock"], 0)).await;
    store.put(stock_key("b"), entry("b", Duration::from_secs(60), &["stock"], 0)).await;

    store.remove(&stock_key("a")).await;
    assert!(store.get(&stock_key("a")).await.is_none());
    store.clear().await;
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_noop_store_never_serves() {
    let store = NoopStore;
    assert!(!store.put(stock_key("a"), entry("a", Duration::from_secs(60), &["stock"], 0)).await);
    assert!(store.get(&stock_key("a")).await.is_none());
}
