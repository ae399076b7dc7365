//! Per-key in-flight locks for collapsing concurrent cold fetches.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle locks are dropped after this long.
const LOCK_IDLE: Duration = Duration::from_secs(60);

pub(crate) struct InFlight {
    locks: Cache<String, Arc<Mutex<()>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self {
            locks: Cache::builder().time_to_idle(LOCK_IDLE).build(),
        }
    }

    /// Wait for exclusive access to `key`. Held until the guard drops.
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(key.to_string(), async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }
}
