pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod events;
pub mod lock;
pub mod memory;
pub mod payment;
pub mod promoter;
pub mod queue;
pub mod repository;
pub mod seat;
pub mod settings;

pub use cache::SeatStateCache;
pub use catalog::{SeatCatalog, SeatView};
pub use coordinator::{AttemptStage, ReservationCoordinator, ReservationError};
pub use events::{EventPublisher, ReservationEvent, ReservationEventType, RESERVATION_TOPIC};
pub use lock::{DistributedLock, LockGuard, LockToken};
pub use payment::{FixedPaymentOracle, PaymentError, PaymentOracle, SimulatedPaymentOracle};
pub use promoter::{PromotionReport, QueuePromoter};
pub use queue::{Admission, AdmissionQueue, AdmissionStore};
pub use repository::{LedgerError, SeatLedger};
pub use seat::{Reservation, Seat, SeatError, SeatStatus};
pub use settings::ReservationSettings;

/// Failure talking to one of the shared stores (cache, queue, lock, bus, ledger backend).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Shared store unavailable: {0}")]
    Backend(String),
    #[error("Corrupt value under {key}: {value}")]
    Corrupt { key: String, value: String },
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
