use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StoreResult;

pub const PROMOTER_LOCK_KEY: &str = "lock:queue:promoter";

pub fn seat_lock_key(seat_id: i64) -> String {
    format!("lock:seat:{}", seat_id)
}

/// Identifies the logical owner of a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Named mutual exclusion shared by every coordinator instance.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Tries at least once, then keeps trying until `wait` has elapsed.
    /// A granted lock expires on its own after `hold`.
    async fn try_acquire(
        &self,
        key: &str,
        token: &LockToken,
        wait: Duration,
        hold: Duration,
    ) -> StoreResult<bool>;

    /// Releases `key` only while it is still held under `token`; otherwise a no-op.
    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()>;
}

/// A held lock scoped to one critical section.
///
/// Call [`LockGuard::release`] on the way out. A guard dropped without it (early return through
/// `?`, panic, cancelled future) schedules the release on the runtime; with no runtime the hold
/// bound frees the key.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    key: String,
    token: LockToken,
    released: bool,
}

impl LockGuard {
    /// Returns `None` when the key stayed busy for the whole `wait`.
    pub async fn acquire(
        lock: Arc<dyn DistributedLock>,
        key: impl Into<String>,
        wait: Duration,
        hold: Duration,
    ) -> StoreResult<Option<Self>> {
        let key = key.into();
        let token = LockToken::generate();

        if !lock.try_acquire(&key, &token, wait, hold).await? {
            debug!("Lock {} still busy after {:?}", key, wait);
            return Ok(None);
        }

        Ok(Some(Self {
            lock,
            key,
            token,
            released: false,
        }))
    }

    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        self.lock.release(&self.key, &self.token).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let lock = self.lock.clone();
        let key = std::mem::take(&mut self.key);
        let token = self.token.clone();

        handle.spawn(async move {
            if let Err(e) = lock.release(&key, &token).await {
                warn!("Deferred release of {} failed, waiting for expiry: {}", key, e);
            }
        });
    }
}
