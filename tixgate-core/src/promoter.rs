use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::lock::{DistributedLock, LockGuard, PROMOTER_LOCK_KEY};
use crate::queue::AdmissionQueue;
use crate::settings::ReservationSettings;
use crate::StoreResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionReport {
    /// Users granted a slot this tick, earliest arrival first.
    pub promoted: Vec<i64>,
    pub active_before: u64,
    /// Another instance held the promoter lock.
    pub skipped: bool,
}

/// Periodically moves the head of the waiting list into free active slots.
///
/// Reading the active count and then promoting is check-then-act. With the leader lock enabled
/// ticks are serialized across instances and the bound is hard as long as a tick finishes
/// within the lock hold; without it, concurrent instances may overshoot by up to one batch.
pub struct QueuePromoter {
    queue: AdmissionQueue,
    max_active: u64,
    period: Duration,
    leader: Option<Arc<dyn DistributedLock>>,
    leader_hold: Duration,
}

impl QueuePromoter {
    pub fn new(queue: AdmissionQueue, settings: &ReservationSettings) -> Self {
        Self {
            queue,
            max_active: settings.max_active_slots,
            period: settings.promoter_period,
            leader: None,
            leader_hold: settings.lock_hold,
        }
    }

    pub fn with_leader_lock(mut self, lock: Arc<dyn DistributedLock>) -> Self {
        self.leader = Some(lock);
        self
    }

    pub async fn tick(&self) -> StoreResult<PromotionReport> {
        let leader = match &self.leader {
            Some(lock) => {
                match LockGuard::acquire(lock.clone(), PROMOTER_LOCK_KEY, Duration::ZERO, self.leader_hold).await? {
                    Some(guard) => Some(guard),
                    None => {
                        debug!("Promoter lock held elsewhere, skipping tick");
                        return Ok(PromotionReport {
                            skipped: true,
                            ..PromotionReport::default()
                        });
                    }
                }
            }
            None => None,
        };

        let report = self.promote().await;

        if let Some(guard) = leader {
            if let Err(e) = guard.release().await {
                warn!("Failed to release promoter lock: {}", e);
            }
        }

        report
    }

    async fn promote(&self) -> StoreResult<PromotionReport> {
        let active_before = self.queue.active_count().await?;
        let free = self.max_active.saturating_sub(active_before);
        if free == 0 {
            return Ok(PromotionReport {
                active_before,
                ..PromotionReport::default()
            });
        }

        let promoted = self.queue.promote_head(free).await?;
        if !promoted.is_empty() {
            info!(
                promoted = promoted.len(),
                active = active_before + promoted.len() as u64,
                max_active = self.max_active,
                "Promoted waiting users to active"
            );
        }

        Ok(PromotionReport {
            promoted,
            active_before,
            skipped: false,
        })
    }

    /// Ticks forever on the configured period. A slow tick delays the next one rather than
    /// bunching them up.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Queue promoter started (period {:?}, max active {})", self.period, self.max_active);

        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Promoter tick failed: {}", e);
            }
        }
    }
}
