use async_trait::async_trait;
use std::time::Duration;

use crate::lock::LockToken;
use crate::seat::SeatStatus;
use crate::StoreResult;

pub fn seat_state_key(seat_id: i64) -> String {
    format!("state:seat:{}", seat_id)
}

/// Ephemeral per-seat status, consulted ahead of the ledger.
///
/// Only atomic single-key reads, writes and compare-and-delete are required of the backing store.
#[async_trait]
pub trait SeatStateCache: Send + Sync {
    /// Absent entries read as `SeatStatus::Available`.
    async fn get_status(&self, seat_id: i64) -> StoreResult<SeatStatus>;

    async fn get_statuses(&self, seat_ids: &[i64]) -> StoreResult<Vec<SeatStatus>> {
        let mut statuses = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            statuses.push(self.get_status(*seat_id).await?);
        }
        Ok(statuses)
    }

    /// A zero `ttl` stores the status without expiry.
    async fn set_status(&self, seat_id: i64, status: SeatStatus, ttl: Duration) -> StoreResult<()>;

    async fn delete(&self, seat_id: i64) -> StoreResult<()>;

    /// Writes SELECTED for `ttl` on behalf of the attempt identified by `holder`.
    async fn mark_selected(&self, seat_id: i64, holder: &LockToken, ttl: Duration) -> StoreResult<()>;

    /// Deletes the entry only while it is still the SELECTED entry written under `holder`.
    /// Returns whether anything was deleted.
    async fn clear_selected(&self, seat_id: i64, holder: &LockToken) -> StoreResult<bool>;
}
