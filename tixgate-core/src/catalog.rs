use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::SeatStateCache;
use crate::repository::{LedgerError, SeatLedger};
use crate::seat::{Seat, SeatStatus};

/// Seat metadata from the ledger joined with its live cache status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub seat_id: i64,
    pub seat_number: String,
    pub status: SeatStatus,
}

impl SeatView {
    fn new(seat: Seat, status: SeatStatus) -> Self {
        Self {
            seat_id: seat.id,
            seat_number: seat.seat_number,
            status,
        }
    }
}

/// Read-only queries for seat selection screens.
#[derive(Clone)]
pub struct SeatCatalog {
    ledger: Arc<dyn SeatLedger>,
    cache: Arc<dyn SeatStateCache>,
}

impl SeatCatalog {
    pub fn new(ledger: Arc<dyn SeatLedger>, cache: Arc<dyn SeatStateCache>) -> Self {
        Self { ledger, cache }
    }

    pub async fn list(&self) -> Result<Vec<SeatView>, LedgerError> {
        let seats = self.ledger.list_seats().await?;
        let ids: Vec<i64> = seats.iter().map(|seat| seat.id).collect();
        let statuses = self.cache.get_statuses(&ids).await?;

        Ok(seats
            .into_iter()
            .zip(statuses)
            .map(|(seat, status)| SeatView::new(seat, status))
            .collect())
    }

    pub async fn get(&self, seat_id: i64) -> Result<Option<SeatView>, LedgerError> {
        let Some(seat) = self.ledger.find_seat(seat_id).await? else {
            return Ok(None);
        };
        let status = self.cache.get_status(seat_id).await?;
        Ok(Some(SeatView::new(seat, status)))
    }

    pub async fn available(&self) -> Result<Vec<SeatView>, LedgerError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|view| view.status == SeatStatus::Available)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySeatCache, MemorySeatLedger};
    use std::time::Duration;

    #[tokio::test]
    async fn test_views_reflect_cache_status() {
        let ledger = Arc::new(MemorySeatLedger::with_seats(3));
        let cache = Arc::new(MemorySeatCache::new());
        cache.set_status(2, SeatStatus::Selected, Duration::from_secs(300)).await.unwrap();
        cache.set_status(3, SeatStatus::Confirmed, Duration::ZERO).await.unwrap();

        let catalog = SeatCatalog::new(ledger, cache);

        let all = catalog.list().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].status, SeatStatus::Selected);

        let available = catalog.available().await.unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].seat_number, "Seat 1");

        assert_eq!(catalog.get(3).await.unwrap().unwrap().status, SeatStatus::Confirmed);
        assert!(catalog.get(42).await.unwrap().is_none());
    }
}
