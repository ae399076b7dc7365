//! Telemetry metric name constants.
//!
//! Centralised metric names for staging operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `wowstage_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `tier`: tier that served a read: "fast_cache", "persistent_cache",
//!   "live" or "synthetic"
//! - `data_type`: e.g. "auction", "guild", "token"
//! - `status`: outcome: "ok" or "error"

/// Reads served, by the tier that answered.
///
/// Labels: `tier`, `data_type`.
pub const TIER_HITS_TOTAL: &str = "wowstage_tier_hits_total";

/// Upstream fetch attempts made by the live tier.
///
/// Labels: `data_type`, `status` ("ok" | "error").
pub const UPSTREAM_REQUESTS_TOTAL: &str = "wowstage_upstream_requests_total";

/// Upstream fetch duration in seconds, including endpoint resolution.
///
/// Labels: `data_type`.
pub const UPSTREAM_DURATION_SECONDS: &str = "wowstage_upstream_duration_seconds";

/// Admission attempts rejected by a rate limiter.
///
/// Labels: `key`.
pub const RATE_LIMITED_TOTAL: &str = "wowstage_rate_limited_total";

/// Retry attempts against the upstream API (not counting the initial request).
///
/// Labels: `client`, `operation`.
pub const RETRIES_TOTAL: &str = "wowstage_retries_total";

/// Cache tier read/write failures that were absorbed as misses.
///
/// Labels: `tier`, `op` ("read" | "write").
pub const CACHE_ERRORS_TOTAL: &str = "wowstage_cache_errors_total";
