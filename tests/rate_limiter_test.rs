use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use wowstage::{MultiKeyRateLimiter, RateLimitConfig, RateLimiter, StagingError};

fn three_per_second() -> RateLimitConfig {
    RateLimitConfig::new(3, Duration::from_secs(1))
}

fn retry_after(err: StagingError) -> Duration {
    match err {
        StagingError::RateLimited { retry_after } => retry_after,
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

// ============================================================================
// Single-key limiter
// ============================================================================

#[tokio::test(start_paused = true)]
async fn admits_up_to_capacity_then_rejects() {
    let limiter = RateLimiter::new(three_per_second());

    for _ in 0..3 {
        limiter.acquire(1).unwrap();
    }
    let wait = retry_after(limiter.acquire(1).unwrap_err());
    assert_eq!(wait, Duration::from_secs(1));

    let status = limiter.get_status();
    assert_eq!(status.current_requests, 3);
    assert_eq!(status.available_requests, 0);
    assert!(status.is_limited);
}

#[tokio::test(start_paused = true)]
async fn window_slides_rather_than_resetting() {
    let limiter = RateLimiter::new(three_per_second());

    limiter.acquire(1).unwrap();
    limiter.acquire(1).unwrap();
    tokio::time::advance(Duration::from_millis(600)).await;
    limiter.acquire(1).unwrap();

    // The two oldest requests leave the window 400ms from now.
    let wait = retry_after(limiter.acquire(1).unwrap_err());
    assert_eq!(wait, Duration::from_millis(400));

    tokio::time::advance(Duration::from_millis(400)).await;
    limiter.acquire(1).unwrap();
    assert_eq!(limiter.get_status().current_requests, 2);
}

#[tokio::test(start_paused = true)]
async fn limited_state_rejects_without_rescanning() {
    let limiter = RateLimiter::new(three_per_second());
    for _ in 0..3 {
        limiter.acquire(1).unwrap();
    }
    let first = retry_after(limiter.acquire(1).unwrap_err());

    tokio::time::advance(Duration::from_millis(250)).await;
    let second = retry_after(limiter.acquire(1).unwrap_err());
    assert_eq!(second, first - Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn weighted_request_needs_room_for_its_full_weight() {
    let limiter = RateLimiter::new(three_per_second());
    limiter.acquire(2).unwrap();

    assert!(matches!(
        limiter.acquire(2),
        Err(StagingError::RateLimited { .. })
    ));
    assert_eq!(limiter.get_status().current_requests, 2);
}

#[tokio::test(start_paused = true)]
async fn weight_above_capacity_is_a_capacity_error() {
    let limiter = RateLimiter::new(three_per_second());

    let err = limiter.acquire(4).unwrap_err();
    assert!(matches!(
        err,
        StagingError::WeightExceedsCapacity {
            weight: 4,
            max_requests: 3
        }
    ));
    // Capacity errors do not put the limiter into the limited state.
    assert!(!limiter.get_status().is_limited);
    limiter.acquire(3).unwrap();

    let err = limiter.wait_if_needed(4).await.unwrap_err();
    assert!(matches!(err, StagingError::WeightExceedsCapacity { .. }));
}

#[tokio::test(start_paused = true)]
async fn wait_if_needed_sleeps_until_admitted() {
    let limiter = RateLimiter::new(three_per_second());
    for _ in 0..3 {
        limiter.acquire(1).unwrap();
    }

    let start = Instant::now();
    limiter.wait_if_needed(1).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(limiter.get_status().current_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn get_status_does_not_mutate() {
    let limiter = RateLimiter::new(three_per_second());
    limiter.acquire(1).unwrap();

    let before = limiter.get_status();
    let again = limiter.get_status();
    assert_eq!(before, again);

    tokio::time::advance(Duration::from_secs(2)).await;
    let later = limiter.get_status();
    assert_eq!(later.current_requests, 0);
    assert_eq!(later.available_requests, 3);
    assert!(later.reset_in.is_none());
}

#[tokio::test(start_paused = true)]
async fn reset_clears_window_and_limited_state() {
    let limiter = RateLimiter::new(three_per_second());
    for _ in 0..3 {
        limiter.acquire(1).unwrap();
    }
    let _ = limiter.acquire(1);
    assert!(limiter.get_status().is_limited);

    limiter.reset();
    let status = limiter.get_status();
    assert_eq!(status.current_requests, 0);
    assert!(!status.is_limited);
    limiter.acquire(3).unwrap();
}

#[tokio::test(start_paused = true)]
async fn concurrent_admissions_never_exceed_capacity() {
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::new(10, Duration::from_secs(60))));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire(1).is_ok() })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

// ============================================================================
// Multi-key limiter
// ============================================================================

#[tokio::test(start_paused = true)]
async fn keys_are_independent() {
    let limiter = MultiKeyRateLimiter::new(three_per_second());

    for _ in 0..3 {
        limiter.acquire("us", 1).unwrap();
    }
    assert!(limiter.acquire("us", 1).is_err());
    limiter.acquire("eu", 1).unwrap();

    assert!(limiter.status("us").unwrap().is_limited);
    assert_eq!(limiter.status("eu").unwrap().current_requests, 1);
    assert!(limiter.status("kr").is_none());
    assert_eq!(limiter.keys(), vec!["eu".to_string(), "us".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn override_applies_to_its_key_only() {
    let limiter = MultiKeyRateLimiter::new(three_per_second())
        .with_override("cn", RateLimitConfig::new(1, Duration::from_secs(1)));

    limiter.acquire("cn", 1).unwrap();
    assert!(limiter.acquire("cn", 1).is_err());

    for _ in 0..3 {
        limiter.acquire("us", 1).unwrap();
    }
    assert_eq!(limiter.status("cn").unwrap().max_requests, 1);
    assert_eq!(limiter.status("us").unwrap().max_requests, 3);
}

#[tokio::test(start_paused = true)]
async fn acquire_with_only_configures_new_keys() {
    let limiter = MultiKeyRateLimiter::new(three_per_second());

    limiter
        .acquire_with("auctions", 1, RateLimitConfig::new(5, Duration::from_secs(1)))
        .unwrap();
    // The limiter already exists, so this config is ignored.
    limiter
        .acquire_with("auctions", 1, RateLimitConfig::new(1, Duration::from_secs(1)))
        .unwrap();
    assert_eq!(limiter.status("auctions").unwrap().max_requests, 5);
}

#[tokio::test(start_paused = true)]
async fn reset_all_keeps_keys() {
    let limiter = MultiKeyRateLimiter::new(three_per_second());
    limiter.acquire("us", 3).unwrap();
    limiter.acquire("eu", 2).unwrap();

    limiter.reset_all();

    assert_eq!(limiter.keys().len(), 2);
    assert_eq!(limiter.status("us").unwrap().current_requests, 0);
    assert_eq!(limiter.status("eu").unwrap().current_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn multi_key_wait_if_needed() {
    let limiter = MultiKeyRateLimiter::new(three_per_second());
    limiter.acquire("us", 3).unwrap();

    let start = Instant::now();
    limiter.wait_if_needed("us", 1).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
    limiter.wait_if_needed("eu", 1).await.unwrap();
}
