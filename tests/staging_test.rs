mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use common::{FailingFastCache, FailingStore, MockUpstream};
use futures_util::future::join_all;
use serde_json::json;
use wowstage::upstream::UpstreamError;
use wowstage::{
    CacheRecord, CollectionStatus, DataRequest, DataType, FastCache, GameVersion,
    MemoryFastCache, MemoryStore, PersistentStore, RecordKey, RecordSource, Region,
    StagingConfig, StagingService, Target, Tier, TtlPolicy, MAX_TTL,
};

fn quiet_config() -> StagingConfig {
    StagingConfig::default()
        .game_version(GameVersion::Retail)
        .seed_delay(Duration::ZERO)
}

fn service_with(
    upstream: Option<Arc<MockUpstream>>,
    store: Arc<MemoryStore>,
    fast: Arc<MemoryFastCache>,
) -> StagingService {
    let mut builder = StagingService::builder()
        .config(quiet_config())
        .store(store)
        .fast_cache(fast);
    if let Some(upstream) = upstream {
        builder = builder.upstream(upstream);
    }
    builder.build()
}

fn token_request() -> DataRequest {
    DataRequest::new(Target::Token).region(Region::Us)
}

// ============================================================================
// Synthetic tier
// ============================================================================

#[tokio::test]
async fn cold_key_without_upstream_is_synthetic() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(None, store.clone(), Arc::new(MemoryFastCache::default()));
    assert!(!service.has_upstream());

    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Test Guild").unwrap()))
        .await;

    assert!(payload.is_synthetic());
    assert_eq!(payload.tier, Tier::Synthetic);
    assert!(payload.message.as_deref().unwrap().contains("Example"));
    assert_eq!(payload.data["members_data"].as_array().unwrap().len(), 20);

    // Synthetic data is never persisted and no collection was attempted.
    assert!(store.records().is_empty());
    assert!(store.log_entries().is_empty());
}

#[tokio::test]
async fn token_read_has_wire_shape() {
    let service = StagingService::builder().build();

    let payload = service.get_data(&token_request()).await;
    let wire = serde_json::to_value(&payload).unwrap();

    assert_eq!(wire["synthetic"], true);
    assert_eq!(wire["from_cache"], false);
    assert!(wire["data"]["price"].is_u64());
    assert!(wire["data"]["last_updated_timestamp"].is_i64());
}

#[tokio::test]
async fn live_failure_falls_back_to_synthetic_and_logs() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::failing(|| UpstreamError::Api {
        status: 503,
        message: "maintenance".into(),
    }));
    let service = service_with(
        Some(upstream.clone()),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service.get_data(&token_request()).await;

    assert!(payload.is_synthetic());
    assert_eq!(upstream.call_count(), 1);
    assert!(store.records().is_empty());

    let log = store.log_entries();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, CollectionStatus::Failed);
    assert_eq!(log[0].collection_type, DataType::Token);
    assert_eq!(log[0].records_collected, 0);
    assert!(log[0].error_message.as_deref().unwrap().contains("maintenance"));
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_times_out() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::new().with_delay(Duration::from_secs(30)));
    let service = StagingService::builder()
        .config(quiet_config().upstream_timeout(Duration::from_millis(100)))
        .store(store.clone())
        .upstream(upstream)
        .build();

    let payload = service.get_data(&token_request()).await;

    assert!(payload.is_synthetic());
    let log = store.log_entries();
    assert_eq!(log.len(), 1);
    assert!(log[0].error_message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test(start_paused = true)]
async fn timeout_bounds_each_call_of_a_large_guild() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(
        MockUpstream::new()
            .with_roster(50)
            .with_delay(Duration::from_millis(250)),
    );
    let service = StagingService::builder()
        .config(quiet_config())
        .store(store.clone())
        .upstream(upstream.clone())
        .build();

    let start = tokio::time::Instant::now();
    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Big Guild").unwrap()))
        .await;

    // 53 calls at 250ms each run well past the 10s per-call bound.
    assert!(start.elapsed() > service.config().upstream_timeout);
    assert_eq!(payload.tier, Tier::Live);
    assert_eq!(upstream.call_count(), 53);
    assert_eq!(payload.data["members_data"].as_array().unwrap().len(), 50);
    let log = store.log_entries();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, CollectionStatus::Success);
}

// ============================================================================
// Live tier
// ============================================================================

#[tokio::test]
async fn live_hit_writes_through_both_tiers() {
    let store = Arc::new(MemoryStore::new());
    let fast = Arc::new(MemoryFastCache::default());
    let upstream = Arc::new(MockUpstream::new());
    let service = service_with(Some(upstream.clone()), store.clone(), fast.clone());

    let payload = service.get_data(&token_request()).await;
    assert_eq!(payload.tier, Tier::Live);
    assert!(!payload.is_synthetic());
    assert_eq!(payload.data["price"], 3_120_000);

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, RecordSource::Live);
    assert_eq!(records[0].key.cache_key, "current");
    let ttl = records[0].expires_at.unwrap() - records[0].captured_at;
    assert_eq!(ttl, TimeDelta::seconds(1800));

    let fast_key = RecordKey::new(&Target::Token, Region::Us, GameVersion::Retail).fast_key();
    assert!(fast.get(&fast_key).await.unwrap().is_some());

    let log = store.log_entries();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].status, CollectionStatus::Success);
    assert_eq!(log[0].records_collected, 1);
    assert!(log[0].execution_time_ms.is_some());
}

#[tokio::test]
async fn fast_hit_never_calls_upstream() {
    let upstream = Arc::new(MockUpstream::new());
    let service = service_with(
        Some(upstream.clone()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFastCache::default()),
    );

    let first = service.get_data(&token_request()).await;
    let second = service.get_data(&token_request()).await;

    assert_eq!(first.tier, Tier::Live);
    assert_eq!(second.tier, Tier::FastCache);
    assert!(second.from_cache());
    assert_eq!(second.data, first.data);
    assert_eq!(upstream.call_count(), 1);
}

#[tokio::test]
async fn force_refresh_bypasses_cache_tiers() {
    let upstream = Arc::new(MockUpstream::new());
    let store = Arc::new(MemoryStore::new());
    let service = service_with(
        Some(upstream.clone()),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );

    service.get_data(&token_request()).await;
    let forced = service
        .get_data(&token_request().force_refresh(true))
        .await;

    assert_eq!(forced.tier, Tier::Live);
    assert_eq!(upstream.call_count(), 2);
    assert_eq!(store.records().len(), 2);
}

#[tokio::test]
async fn regions_and_versions_are_separate_keys() {
    let upstream = Arc::new(MockUpstream::new());
    let service = service_with(
        Some(upstream.clone()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFastCache::default()),
    );

    service.get_data(&token_request()).await;
    service
        .get_data(&DataRequest::new(Target::Token).region(Region::Eu))
        .await;
    service
        .get_data(&token_request().game_version(GameVersion::Classic))
        .await;

    assert_eq!(upstream.call_count(), 3);
    assert_eq!(
        upstream.recorded(),
        vec![
            "token dynamic-us".to_string(),
            "token dynamic-eu".to_string(),
            "token dynamic-classic-us".to_string(),
        ]
    );
}

#[tokio::test]
async fn auction_resolves_connected_realm() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::new());
    let service = service_with(
        Some(upstream.clone()),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service
        .get_data(&DataRequest::new(Target::auction("stormrage").unwrap()))
        .await;

    assert_eq!(payload.tier, Tier::Live);
    assert_eq!(payload.data["connected_realm"]["id"], 60);
    assert_eq!(
        upstream.recorded(),
        vec!["realm dynamic-us".to_string(), "auctions dynamic-us".to_string()]
    );
    assert_eq!(store.log_entries()[0].records_collected, 3);
}

#[tokio::test]
async fn guild_composite_merges_member_profiles() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::new().with_roster(4));
    let service = service_with(
        Some(upstream.clone()),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Test Guild").unwrap()))
        .await;

    assert_eq!(payload.tier, Tier::Live);
    let data = &payload.data;
    assert_eq!(data["guild_info"]["name"], "Test Guild");
    assert_eq!(data["guild_achievements"]["total_points"], 2_450);
    assert_eq!(data["member_errors"], 0);
    assert!(data["fetch_timestamp"].is_string());

    let members = data["members_data"].as_array().unwrap();
    assert_eq!(members.len(), 4);
    assert_eq!(members[0]["name"], "Member0");
    assert_eq!(members[0]["equipment_summary"]["average_item_level"], 610);

    assert!(upstream.recorded().iter().all(|call| call.ends_with("profile-us")));
    assert_eq!(store.log_entries()[0].records_collected, 4);
}

#[tokio::test]
async fn guild_member_failures_mark_partial() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::new().with_roster(5).with_failing_members(2));
    let service = service_with(
        Some(upstream),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Test Guild").unwrap()))
        .await;

    assert_eq!(payload.tier, Tier::Live);
    assert_eq!(payload.data["member_errors"], 2);
    assert_eq!(payload.data["members_data"].as_array().unwrap().len(), 5);
    assert_eq!(store.log_entries()[0].status, CollectionStatus::Partial);
}

#[tokio::test]
async fn guild_member_fetch_is_capped() {
    let upstream = Arc::new(MockUpstream::new().with_roster(80));
    let service = service_with(
        Some(upstream.clone()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Big Guild").unwrap()))
        .await;

    assert_eq!(payload.data["members_data"].as_array().unwrap().len(), 50);
    let profile_calls = upstream
        .recorded()
        .iter()
        .filter(|call| call.starts_with("character"))
        .count();
    assert_eq!(profile_calls, 50);
}

#[tokio::test]
async fn guild_member_fetch_stops_after_ten_failures() {
    let upstream = Arc::new(MockUpstream::new().with_roster(30).with_failing_members(30));
    let service = service_with(
        Some(upstream.clone()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFastCache::default()),
    );

    let payload = service
        .get_data(&DataRequest::new(Target::guild("stormrage", "Unlucky").unwrap()))
        .await;

    assert_eq!(payload.data["member_errors"], 10);
    let profile_calls = upstream
        .recorded()
        .iter()
        .filter(|call| call.starts_with("character"))
        .count();
    assert_eq!(profile_calls, 10);
}

// ============================================================================
// Persistent tier
// ============================================================================

#[tokio::test]
async fn persistent_hit_backfills_fast_cache() {
    let store = Arc::new(MemoryStore::new());
    let fast = Arc::new(MemoryFastCache::default());
    let key = RecordKey::new(&Target::Token, Region::Us, GameVersion::Retail);
    store
        .insert(CacheRecord::new(
            key.clone(),
            json!({"price": 2_800_000, "last_updated_timestamp": 1}),
            RecordSource::Live,
            Utc::now() - TimeDelta::minutes(5),
            Some(Duration::from_secs(1800)),
        ))
        .await
        .unwrap();
    let service = service_with(None, store, fast.clone());

    let first = service.get_data(&token_request()).await;
    assert_eq!(first.tier, Tier::PersistentCache);
    assert_eq!(first.data["price"], 2_800_000);
    let age = first.age_hours.unwrap();
    assert!(age > 0.08 && age < 0.1, "age was {age}");

    assert!(fast.get(&key.fast_key()).await.unwrap().is_some());
    let second = service.get_data(&token_request()).await;
    assert_eq!(second.tier, Tier::FastCache);
    assert_eq!(second.data, first.data);
}

#[tokio::test]
async fn expired_rows_are_not_served() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert(CacheRecord::new(
            RecordKey::new(&Target::Token, Region::Us, GameVersion::Retail),
            json!({"price": 1}),
            RecordSource::Live,
            Utc::now() - TimeDelta::hours(2),
            Some(Duration::from_secs(1800)),
        ))
        .await
        .unwrap();
    let service = service_with(None, store, Arc::new(MemoryFastCache::default()));

    let payload = service.get_data(&token_request()).await;
    assert!(payload.is_synthetic());
}

#[tokio::test]
async fn cleanup_expired_cache_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    for (target, minutes) in [(Target::Token, 120), (Target::realm("stormrage").unwrap(), 1)] {
        store
            .insert(CacheRecord::new(
                RecordKey::new(&target, Region::Us, GameVersion::Retail),
                json!({}),
                RecordSource::Live,
                now - TimeDelta::minutes(minutes),
                Some(Duration::from_secs(1800)),
            ))
            .await
            .unwrap();
    }
    let service = service_with(None, store, Arc::new(MemoryFastCache::default()));

    assert_eq!(service.cleanup_expired_cache().await.unwrap(), 1);
    assert_eq!(service.cleanup_expired_cache().await.unwrap(), 0);

    let stats = service.get_cache_stats().await.unwrap();
    assert_eq!(stats.total_cached_items, 1);
    assert!(stats.cache_entries.contains_key(&DataType::Realm));
    assert!(!stats.cache_entries.contains_key(&DataType::Token));
}

// ============================================================================
// Single flight
// ============================================================================

#[tokio::test]
async fn concurrent_misses_share_one_upstream_call() {
    let upstream = Arc::new(MockUpstream::new().with_delay(Duration::from_millis(50)));
    let service = service_with(
        Some(upstream.clone()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryFastCache::default()),
    );

    let request = token_request();
    let results = join_all((0..5).map(|_| service.get_data(&request))).await;

    assert_eq!(upstream.call_count(), 1);
    assert!(results.iter().all(|p| !p.is_synthetic()));
    assert_eq!(results.iter().filter(|p| p.tier == Tier::Live).count(), 1);
}

#[tokio::test]
async fn single_flight_can_be_disabled() {
    let upstream = Arc::new(MockUpstream::new().with_delay(Duration::from_millis(50)));
    let service = StagingService::builder()
        .config(quiet_config().single_flight(false))
        .upstream(upstream.clone())
        .build();

    let request = token_request();
    join_all((0..3).map(|_| service.get_data(&request))).await;

    assert_eq!(upstream.call_count(), 3);
}

// ============================================================================
// Manual import and configuration
// ============================================================================

#[tokio::test]
async fn import_manual_serves_from_cache() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(MockUpstream::new());
    let service = service_with(
        Some(upstream.clone()),
        store.clone(),
        Arc::new(MemoryFastCache::default()),
    );
    let target = Target::character("stormrage", "Thrall").unwrap();

    let record = service
        .import_manual(&target, Region::Us, None, json!({"name": "Thrall", "level": 70}))
        .await
        .unwrap();
    assert_eq!(record.source, RecordSource::Manual);
    assert_eq!(record.key.cache_key, "stormrage:thrall");

    let payload = service
        .get_data(&DataRequest::new(target).region(Region::Us))
        .await;
    assert_eq!(payload.tier, Tier::FastCache);
    assert_eq!(payload.data["level"], 70);
    assert_eq!(upstream.call_count(), 0);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test]
async fn ttl_policy_controls_record_expiry() {
    let store = Arc::new(MemoryStore::new());
    let service = StagingService::builder()
        .config(quiet_config().ttl(TtlPolicy::default().with(DataType::Token, Duration::from_secs(60))))
        .store(store.clone())
        .upstream(Arc::new(MockUpstream::new()))
        .build();

    service.get_data(&token_request()).await;

    let record = &store.records()[0];
    assert_eq!(
        record.expires_at.unwrap() - record.captured_at,
        TimeDelta::seconds(60)
    );
}

#[tokio::test]
async fn upstream_calls_are_admitted_per_region() {
    let service = StagingService::builder()
        .config(quiet_config())
        .upstream(Arc::new(MockUpstream::new()))
        .build();

    assert!(service.rate_limit_status("us").is_none());
    service.get_data(&token_request()).await;

    let status = service.rate_limit_status("us").unwrap();
    assert_eq!(status.current_requests, 1);
    assert_eq!(status.max_requests, 100);
    assert!(service.rate_limit_status("eu").is_none());
}

#[tokio::test]
async fn oversized_ttl_is_clamped() {
    let store = Arc::new(MemoryStore::new());
    let ttl = TtlPolicy {
        token: 1_000_000_000_000_000,
        ..TtlPolicy::default()
    };
    let service = StagingService::builder()
        .config(quiet_config().ttl(ttl))
        .store(store.clone())
        .upstream(Arc::new(MockUpstream::new()))
        .build();

    let payload = service.get_data(&token_request()).await;

    assert_eq!(payload.tier, Tier::Live);
    let record = &store.records()[0];
    assert_eq!(
        record.expires_at.unwrap() - record.captured_at,
        TimeDelta::from_std(MAX_TTL).unwrap()
    );
}

// ============================================================================
// Cache tier failures
// ============================================================================

#[tokio::test]
async fn failing_cache_tiers_fall_through_to_live() {
    let upstream = Arc::new(MockUpstream::new());
    let service = StagingService::builder()
        .config(quiet_config())
        .fast_cache(Arc::new(FailingFastCache))
        .store(Arc::new(FailingStore))
        .upstream(upstream.clone())
        .build();

    let first = service.get_data(&token_request()).await;
    let second = service.get_data(&token_request()).await;

    // Failed writes do not lose the live payload.
    for payload in [&first, &second] {
        assert_eq!(payload.tier, Tier::Live);
        assert_eq!(payload.data["price"], 3_120_000);
    }
    assert_eq!(upstream.call_count(), 2);
}

#[tokio::test]
async fn failing_cache_tiers_without_upstream_serve_synthetic() {
    let service = StagingService::builder()
        .config(quiet_config())
        .fast_cache(Arc::new(FailingFastCache))
        .store(Arc::new(FailingStore))
        .build();

    let payload = service.get_data(&token_request()).await;

    assert!(payload.is_synthetic());
    assert!(service.get_cache_stats().await.is_err());
    assert!(service.cleanup_expired_cache().await.is_err());
}

#[tokio::test]
async fn failing_persistent_tier_still_fills_fast_cache() {
    let upstream = Arc::new(MockUpstream::new());
    let service = StagingService::builder()
        .config(quiet_config())
        .store(Arc::new(FailingStore))
        .upstream(upstream.clone())
        .build();

    assert_eq!(service.get_data(&token_request()).await.tier, Tier::Live);
    let payload = service.get_data(&token_request()).await;

    assert_eq!(payload.tier, Tier::FastCache);
    assert_eq!(payload.data["price"], 3_120_000);
    assert_eq!(upstream.call_count(), 1);
}
