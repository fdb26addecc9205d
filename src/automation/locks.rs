//! Per-location mutual exclusion.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per location id, created on first use.
///
/// Holders for different locations never contend.
#[derive(Default)]
pub(crate) struct LocationLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LocationLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `location_id`. Released on drop.
    pub(crate) async fn acquire(&self, location_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(location_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
