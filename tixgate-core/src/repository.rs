use async_trait::async_trait;

use crate::seat::{Reservation, Seat, SeatError};
use crate::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Seat not found: {0}")]
    SeatNotFound(i64),
    #[error("Seat {0} is already reserved")]
    AlreadyReserved(i64),
    #[error("Seat {0} is not reserved")]
    NotReserved(i64),
    #[error("Seat {seat_id} is not reserved by user {user_id}")]
    NotOwner { seat_id: i64, user_id: i64 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<SeatError> for LedgerError {
    fn from(err: SeatError) -> Self {
        match err {
            SeatError::AlreadyReserved(id) => LedgerError::AlreadyReserved(id),
            SeatError::NotReserved(id) => LedgerError::NotReserved(id),
            SeatError::UnknownStatus(status) => LedgerError::Store(StoreError::Corrupt {
                key: "seat.status".to_string(),
                value: status,
            }),
        }
    }
}

/// System of record for seats and reservations.
///
/// `commit_reservation` and `cancel_reservation` each run in a single row-level transaction and
/// apply the `Seat` rules inside it, so a double reserve or double cancel surfaces as a conflict
/// even if the cache and lock were bypassed.
#[async_trait]
pub trait SeatLedger: Send + Sync {
    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, LedgerError>;

    async fn list_seats(&self) -> Result<Vec<Seat>, LedgerError>;

    async fn commit_reservation(&self, seat_id: i64, user_id: i64) -> Result<Reservation, LedgerError>;

    /// Checks the seat is reserved, then that the reservation belongs to `user_id`.
    async fn cancel_reservation(&self, seat_id: i64, user_id: i64) -> Result<Seat, LedgerError>;

    async fn reservations_for_seat(&self, seat_id: i64) -> Result<Vec<Reservation>, LedgerError>;

    /// Provisions `count` seats when the ledger is empty. Returns how many were created.
    async fn seed_seats(&self, count: u32) -> Result<u32, LedgerError>;
}
