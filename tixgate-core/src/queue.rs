use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::StoreResult;

/// Shared store behind the admission queue.
///
/// Holds a rank-ordered waiting list (score = arrival sequence, so ties cannot happen) and one
/// TTL-bound slot marker per active user. A user is in at most one of the two.
#[async_trait]
pub trait AdmissionStore: Send + Sync {
    /// Atomically: `None` if the user holds a live slot, otherwise inserts the user when absent
    /// and returns the 0-based rank.
    async fn enqueue(&self, user_id: i64) -> StoreResult<Option<u64>>;

    async fn rank(&self, user_id: i64) -> StoreResult<Option<u64>>;

    async fn waiting_count(&self) -> StoreResult<u64>;

    /// Atomically removes up to `limit` users from the head of the waiting list and grants each
    /// one a slot. Returns the promoted users, earliest arrival first. Users that leave while the
    /// call runs are either promoted and removed afterwards, or never promoted.
    async fn pop_and_activate(&self, limit: u64, ttl: Duration) -> StoreResult<Vec<i64>>;

    async fn activate(&self, user_id: i64, ttl: Duration) -> StoreResult<()>;

    async fn is_active(&self, user_id: i64) -> StoreResult<bool>;

    /// Live (unexpired) slots only.
    async fn active_count(&self) -> StoreResult<u64>;

    /// Deletes the slot and the queue entry. Missing entries are fine.
    async fn remove(&self, user_id: i64) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// 1-based position in the waiting list.
    Waiting { rank: u64 },
}

#[derive(Clone)]
pub struct AdmissionQueue {
    store: Arc<dyn AdmissionStore>,
    slot_ttl: Duration,
}

impl AdmissionQueue {
    pub fn new(store: Arc<dyn AdmissionStore>, slot_ttl: Duration) -> Self {
        Self { store, slot_ttl }
    }

    pub async fn register(&self, user_id: i64) -> StoreResult<Admission> {
        match self.store.enqueue(user_id).await? {
            None => Ok(Admission::Allowed),
            Some(rank) => Ok(Admission::Waiting { rank: rank + 1 }),
        }
    }

    pub async fn is_allowed(&self, user_id: i64) -> StoreResult<bool> {
        self.store.is_active(user_id).await
    }

    pub async fn release(&self, user_id: i64) -> StoreResult<()> {
        self.store.remove(user_id).await?;
        debug!(user_id, "Admission released");
        Ok(())
    }

    pub async fn active_count(&self) -> StoreResult<u64> {
        self.store.active_count().await
    }

    pub async fn waiting_count(&self) -> StoreResult<u64> {
        self.store.waiting_count().await
    }

    /// 1-based rank, `None` when the user is not waiting.
    pub async fn rank(&self, user_id: i64) -> StoreResult<Option<u64>> {
        Ok(self.store.rank(user_id).await?.map(|rank| rank + 1))
    }

    /// Grants slots to the first `limit` waiting users, taking them off the list in the same step.
    pub(crate) async fn promote_head(&self, limit: u64) -> StoreResult<Vec<i64>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.pop_and_activate(limit, self.slot_ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAdmissionStore;

    fn queue() -> (Arc<MemoryAdmissionStore>, AdmissionQueue) {
        let store = Arc::new(MemoryAdmissionStore::new());
        let queue = AdmissionQueue::new(store.clone(), Duration::from_secs(300));
        (store, queue)
    }

    #[tokio::test]
    async fn test_register_is_fifo_and_stable() {
        let (_, queue) = queue();

        assert_eq!(queue.register(10).await.unwrap(), Admission::Waiting { rank: 1 });
        assert_eq!(queue.register(20).await.unwrap(), Admission::Waiting { rank: 2 });
        assert_eq!(queue.register(30).await.unwrap(), Admission::Waiting { rank: 3 });

        // Re-registering keeps the first place in line.
        assert_eq!(queue.register(10).await.unwrap(), Admission::Waiting { rank: 1 });
        assert_eq!(queue.waiting_count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_active_user_is_not_requeued() {
        let (store, queue) = queue();
        store.activate(5, Duration::from_secs(60)).await.unwrap();

        assert_eq!(queue.register(5).await.unwrap(), Admission::Allowed);
        assert!(queue.is_allowed(5).await.unwrap());
        assert_eq!(queue.waiting_count().await.unwrap(), 0);
        assert_eq!(queue.rank(5).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (store, queue) = queue();
        store.activate(1, Duration::from_secs(60)).await.unwrap();
        queue.register(2).await.unwrap();

        queue.release(1).await.unwrap();
        queue.release(2).await.unwrap();
        let after_once = (
            queue.active_count().await.unwrap(),
            queue.waiting_count().await.unwrap(),
        );

        queue.release(1).await.unwrap();
        queue.release(2).await.unwrap();
        let after_twice = (
            queue.active_count().await.unwrap(),
            queue.waiting_count().await.unwrap(),
        );

        assert_eq!(after_once, (0, 0));
        assert_eq!(after_once, after_twice);
        assert!(!queue.is_allowed(1).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_slot_expires() {
        let (store, queue) = queue();
        store.activate(1, Duration::from_secs(300)).await.unwrap();
        assert_eq!(queue.active_count().await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;

        assert!(!queue.is_allowed(1).await.unwrap());
        assert_eq!(queue.active_count().await.unwrap(), 0);
        assert_eq!(queue.register(1).await.unwrap(), Admission::Waiting { rank: 1 });
    }

    /// Lets one user leave the moment a promotion starts.
    struct LeavesOnPromotion {
        inner: MemoryAdmissionStore,
        leaver: i64,
    }

    #[async_trait]
    impl AdmissionStore for LeavesOnPromotion {
        async fn enqueue(&self, user_id: i64) -> StoreResult<Option<u64>> {
            self.inner.enqueue(user_id).await
        }
        async fn rank(&self, user_id: i64) -> StoreResult<Option<u64>> {
            self.inner.rank(user_id).await
        }
        async fn waiting_count(&self) -> StoreResult<u64> {
            self.inner.waiting_count().await
        }
        async fn pop_and_activate(&self, limit: u64, ttl: Duration) -> StoreResult<Vec<i64>> {
            self.inner.remove(self.leaver).await?;
            self.inner.pop_and_activate(limit, ttl).await
        }
        async fn activate(&self, user_id: i64, ttl: Duration) -> StoreResult<()> {
            self.inner.activate(user_id, ttl).await
        }
        async fn is_active(&self, user_id: i64) -> StoreResult<bool> {
            self.inner.is_active(user_id).await
        }
        async fn active_count(&self) -> StoreResult<u64> {
            self.inner.active_count().await
        }
        async fn remove(&self, user_id: i64) -> StoreResult<()> {
            self.inner.remove(user_id).await
        }
    }

    #[tokio::test]
    async fn test_promotion_skips_user_who_left() {
        let store = Arc::new(LeavesOnPromotion {
            inner: MemoryAdmissionStore::new(),
            leaver: 1,
        });
        let queue = AdmissionQueue::new(store, Duration::from_secs(300));
        for user_id in 1..=3 {
            queue.register(user_id).await.unwrap();
        }

        let promoted = queue.promote_head(2).await.unwrap();

        assert_eq!(promoted, vec![2, 3]);
        assert!(!queue.is_allowed(1).await.unwrap());
        assert_eq!(queue.rank(1).await.unwrap(), None);
        assert_eq!(queue.active_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_promoted_users_leave_the_waiting_list() {
        let (_, queue) = queue();
        for user_id in 1..=5 {
            queue.register(user_id).await.unwrap();
        }

        assert_eq!(queue.promote_head(3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(queue.promote_head(0).await.unwrap(), Vec::<i64>::new());

        for user_id in 1..=3 {
            assert!(queue.is_allowed(user_id).await.unwrap());
            assert_eq!(queue.rank(user_id).await.unwrap(), None);
        }
        assert_eq!(queue.rank(4).await.unwrap(), Some(1));
        assert_eq!(queue.waiting_count().await.unwrap(), 2);
    }
}
