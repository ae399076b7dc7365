use std::time::Duration;

use wowstage::{DataType, FastCache, FastCacheConfig, MemoryFastCache, TtlPolicy};

#[tokio::test]
async fn get_returns_what_setex_stored() {
    let cache = MemoryFastCache::default();
    cache
        .setex("token:us:current:retail", Duration::from_secs(60), b"{\"price\":1}".to_vec())
        .await
        .unwrap();

    let value = cache.get("token:us:current:retail").await.unwrap();
    assert_eq!(value.as_deref(), Some(&b"{\"price\":1}"[..]));
    assert_eq!(cache.get("token:eu:current:retail").await.unwrap(), None);
}

#[tokio::test]
async fn setex_replaces_previous_value() {
    let cache = MemoryFastCache::default();
    cache.setex("k", Duration::from_secs(60), b"old".to_vec()).await.unwrap();
    cache.setex("k", Duration::from_secs(60), b"new".to_vec()).await.unwrap();

    assert_eq!(cache.get("k").await.unwrap().as_deref(), Some(&b"new"[..]));
}

// moka tracks expiry on its own clock, so this sleeps in real time.
#[tokio::test]
async fn entries_expire_after_their_own_ttl() {
    let cache = MemoryFastCache::default();
    cache.setex("short", Duration::from_millis(50), b"a".to_vec()).await.unwrap();
    cache.setex("long", Duration::from_secs(60), b"b".to_vec()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get("short").await.unwrap(), None);
    assert!(cache.get("long").await.unwrap().is_some());
}

#[tokio::test]
async fn invalidate_and_clear() {
    let cache = MemoryFastCache::new(&FastCacheConfig::new().max_entries(100));
    cache.setex("a", Duration::from_secs(60), b"1".to_vec()).await.unwrap();
    cache.setex("b", Duration::from_secs(60), b"2".to_vec()).await.unwrap();

    cache.invalidate("a").await;
    assert_eq!(cache.get("a").await.unwrap(), None);
    assert!(cache.get("b").await.unwrap().is_some());

    cache.clear();
    assert_eq!(cache.get("b").await.unwrap(), None);
}

#[test]
fn ttl_policy_defaults_follow_refresh_cadence() {
    let ttl = TtlPolicy::default();
    assert_eq!(ttl.ttl_for(DataType::Auction), Duration::from_secs(3600));
    assert_eq!(ttl.ttl_for(DataType::Guild), Duration::from_secs(6 * 3600));
    assert_eq!(ttl.ttl_for(DataType::Realm), Duration::from_secs(24 * 3600));
    assert_eq!(ttl.ttl_for(DataType::Character), Duration::from_secs(2 * 3600));
    assert_eq!(ttl.ttl_for(DataType::Token), Duration::from_secs(1800));
}

#[test]
fn ttl_policy_deserializes_partial_tables() {
    let ttl: TtlPolicy = toml::from_str("token = 60\nauction = 120\n").unwrap();
    assert_eq!(ttl.ttl_for(DataType::Token), Duration::from_secs(60));
    assert_eq!(ttl.ttl_for(DataType::Auction), Duration::from_secs(120));
    assert_eq!(ttl.ttl_for(DataType::Realm), Duration::from_secs(24 * 3600));
}
