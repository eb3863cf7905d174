use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::SeatStateCache;
use crate::events::{EventPublisher, ReservationEvent};
use crate::lock::{seat_lock_key, DistributedLock, LockGuard, LockToken};
use crate::payment::PaymentOracle;
use crate::queue::AdmissionQueue;
use crate::repository::{LedgerError, SeatLedger};
use crate::seat::{Reservation, Seat, SeatStatus};
use crate::settings::ReservationSettings;

/// Steps of a single reservation attempt, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    AdmittedCheck,
    SeatLookup,
    Locking,
    CacheCheck,
    Selecting,
    Payment,
    Commit,
    Rollback,
    ReleaseSlot,
    Cancel,
}

impl AttemptStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStage::AdmittedCheck => "ADMITTED_CHECK",
            AttemptStage::SeatLookup => "SEAT_LOOKUP",
            AttemptStage::Locking => "LOCKING",
            AttemptStage::CacheCheck => "CACHE_CHECK",
            AttemptStage::Selecting => "SELECTING",
            AttemptStage::Payment => "PAYMENT",
            AttemptStage::Commit => "COMMIT",
            AttemptStage::Rollback => "ROLLBACK",
            AttemptStage::ReleaseSlot => "RELEASE_SLOT",
            AttemptStage::Cancel => "CANCEL",
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every way a reserve or cancel call can end other than success.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("User {user_id} has not been admitted from the queue")]
    NotAdmitted { user_id: i64 },
    #[error("Seat not found: {0}")]
    SeatNotFound(i64),
    #[error("Seat {0} is busy, try again shortly")]
    LockBusy(i64),
    #[error("Seat {0} is being paid for by another user")]
    AlreadySelected(i64),
    #[error("Seat {0} is already sold")]
    AlreadyConfirmed(i64),
    #[error("Payment declined, seat {0} was released")]
    PaymentFailed(i64),
    #[error("Seat {0} is already reserved in the ledger")]
    AlreadyReservedConflict(i64),
    #[error("Seat {0} has no reservation to cancel")]
    AlreadyCancelledConflict(i64),
    #[error("Seat {seat_id} is not reserved by user {user_id}")]
    NotOwner { seat_id: i64, user_id: i64 },
    #[error("Unexpected failure during {stage}: {message}")]
    Unknown { stage: AttemptStage, message: String },
}

impl ReservationError {
    fn unknown(stage: AttemptStage, err: impl fmt::Display) -> Self {
        ReservationError::Unknown {
            stage,
            message: err.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ReservationError::NotAdmitted { .. } => "NOT_ADMITTED",
            ReservationError::SeatNotFound(_) => "SEAT_NOT_FOUND",
            ReservationError::LockBusy(_) => "LOCK_BUSY",
            ReservationError::AlreadySelected(_) => "ALREADY_SELECTED",
            ReservationError::AlreadyConfirmed(_) => "ALREADY_CONFIRMED",
            ReservationError::PaymentFailed(_) => "PAYMENT_FAILED",
            ReservationError::AlreadyReservedConflict(_) => "ALREADY_RESERVED_CONFLICT",
            ReservationError::AlreadyCancelledConflict(_) => "ALREADY_CANCELLED_CONFLICT",
            ReservationError::NotOwner { .. } => "NOT_RESERVATION_OWNER",
            ReservationError::Unknown { .. } => "UNKNOWN_ERROR",
        }
    }

    /// Contention outcomes: nothing was mutated and the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::LockBusy(_)
                | ReservationError::AlreadySelected(_)
                | ReservationError::AlreadyConfirmed(_)
        )
    }
}

/// Runs the reservation protocol against the shared stores.
///
/// Only the cache transition AVAILABLE -> SELECTED happens under the per-seat lock. Payment,
/// the ledger commit and event publishing all run after the lock is gone.
pub struct ReservationCoordinator {
    queue: AdmissionQueue,
    ledger: Arc<dyn SeatLedger>,
    cache: Arc<dyn SeatStateCache>,
    lock: Arc<dyn DistributedLock>,
    payments: Arc<dyn PaymentOracle>,
    events: Arc<dyn EventPublisher>,
    settings: ReservationSettings,
}

impl ReservationCoordinator {
    pub fn new(
        queue: AdmissionQueue,
        ledger: Arc<dyn SeatLedger>,
        cache: Arc<dyn SeatStateCache>,
        lock: Arc<dyn DistributedLock>,
        payments: Arc<dyn PaymentOracle>,
        events: Arc<dyn EventPublisher>,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            queue,
            ledger,
            cache,
            lock,
            payments,
            events,
            settings,
        }
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    #[instrument(skip(self))]
    pub async fn reserve(&self, seat_id: i64, user_id: i64) -> Result<Reservation, ReservationError> {
        let outcome = self.attempt(seat_id, user_id).await;

        match &outcome {
            Ok(reservation) => info!(reservation_id = %reservation.id, "Reservation confirmed"),
            Err(e @ ReservationError::Unknown { .. }) => error!(code = e.code(), "{}", e),
            Err(e) => warn!(code = e.code(), "Reservation rejected: {}", e),
        }

        outcome
    }

    async fn attempt(&self, seat_id: i64, user_id: i64) -> Result<Reservation, ReservationError> {
        let admitted = self
            .queue
            .is_allowed(user_id)
            .await
            .map_err(|e| ReservationError::unknown(AttemptStage::AdmittedCheck, e))?;
        if !admitted {
            return Err(ReservationError::NotAdmitted { user_id });
        }

        let seat = self
            .ledger
            .find_seat(seat_id)
            .await
            .map_err(|e| ReservationError::unknown(AttemptStage::SeatLookup, e))?
            .ok_or(ReservationError::SeatNotFound(seat_id))?;

        let mut hold = self.select_seat(&seat, user_id).await?;
        debug!("Seat selected, lock released, contacting payment oracle");

        let approved = match self.payments.authorize(seat.id, user_id).await {
            Ok(approved) => approved,
            Err(e) => {
                hold.rollback().await;
                hold.release_slot().await;
                return Err(ReservationError::unknown(AttemptStage::Payment, e));
            }
        };

        if !approved {
            hold.rollback().await;
            self.publish(ReservationEvent::failed(user_id, &seat)).await;
            hold.release_slot().await;
            return Err(ReservationError::PaymentFailed(seat.id));
        }

        match self.ledger.commit_reservation(seat.id, user_id).await {
            Ok(reservation) => {
                hold.confirm().await;
                self.publish(ReservationEvent::success(&reservation, &seat.seat_number))
                    .await;
                hold.release_slot().await;
                Ok(reservation)
            }
            Err(LedgerError::AlreadyReserved(id)) => {
                // The ledger is the system of record: mirror it instead of reopening the seat.
                error!(seat_id = id, "Ledger already holds a reservation for a seat the cache showed free");
                hold.confirm().await;
                hold.release_slot().await;
                Err(ReservationError::AlreadyReservedConflict(id))
            }
            Err(LedgerError::SeatNotFound(id)) => {
                hold.rollback().await;
                hold.release_slot().await;
                Err(ReservationError::SeatNotFound(id))
            }
            Err(e) => {
                hold.rollback().await;
                hold.release_slot().await;
                Err(ReservationError::unknown(AttemptStage::Commit, e))
            }
        }
    }

    /// The critical section: lock, check, write SELECTED, unlock. Nothing slow happens here.
    async fn select_seat(&self, seat: &Seat, user_id: i64) -> Result<SeatHold, ReservationError> {
        let guard = LockGuard::acquire(
            self.lock.clone(),
            seat_lock_key(seat.id),
            self.settings.lock_wait,
            self.settings.lock_hold,
        )
        .await
        .map_err(|e| ReservationError::unknown(AttemptStage::Locking, e))?
        .ok_or(ReservationError::LockBusy(seat.id))?;

        let holder = LockToken::generate();
        let transition = self.transition_to_selected(seat.id, &holder).await;

        if let Err(e) = guard.release().await {
            warn!(seat_id = seat.id, "Seat lock release failed, hold bound will free it: {}", e);
        }
        transition?;

        Ok(SeatHold {
            seat_id: seat.id,
            user_id,
            holder,
            cache: self.cache.clone(),
            queue: self.queue.clone(),
            cache_resolved: false,
            slot_released: false,
        })
    }

    async fn transition_to_selected(&self, seat_id: i64, holder: &LockToken) -> Result<(), ReservationError> {
        let status = self
            .cache
            .get_status(seat_id)
            .await
            .map_err(|e| ReservationError::unknown(AttemptStage::CacheCheck, e))?;

        match status {
            SeatStatus::Selected => Err(ReservationError::AlreadySelected(seat_id)),
            SeatStatus::Confirmed => Err(ReservationError::AlreadyConfirmed(seat_id)),
            SeatStatus::Available => self
                .cache
                .mark_selected(seat_id, holder, self.settings.selected_ttl)
                .await
                .map_err(|e| ReservationError::unknown(AttemptStage::Selecting, e)),
        }
    }

    /// Cancels a committed reservation. Runs in the ledger's own transaction; the cache entry
    /// is dropped afterwards so the seat reads AVAILABLE again.
    #[instrument(skip(self))]
    pub async fn cancel(&self, seat_id: i64, user_id: i64) -> Result<Seat, ReservationError> {
        let seat = self
            .ledger
            .cancel_reservation(seat_id, user_id)
            .await
            .map_err(|e| match e {
                LedgerError::SeatNotFound(id) => ReservationError::SeatNotFound(id),
                LedgerError::NotReserved(id) => ReservationError::AlreadyCancelledConflict(id),
                LedgerError::NotOwner { seat_id, user_id } => ReservationError::NotOwner { seat_id, user_id },
                other => ReservationError::unknown(AttemptStage::Cancel, other),
            });

        let seat = match seat {
            Ok(seat) => seat,
            Err(e) => {
                warn!(code = e.code(), "Cancellation rejected: {}", e);
                return Err(e);
            }
        };

        if let Err(e) = self.cache.delete(seat_id).await {
            error!(seat_id, "Cancelled in ledger but cache entry could not be cleared: {}", e);
        }
        self.publish(ReservationEvent::cancelled(user_id, &seat)).await;

        info!("Reservation cancelled");
        Ok(seat)
    }

    /// Publish failures are logged, not surfaced: the outcome has already been decided.
    async fn publish(&self, event: ReservationEvent) {
        if let Err(e) = self.events.publish(&event).await {
            error!(
                seat_id = event.seat_id,
                event_type = ?event.event_type,
                "Failed to publish reservation event: {}",
                e
            );
        }
    }
}

/// A SELECTED cache entry and an admission slot owned by one attempt.
///
/// The entry is written under `holder`, so a rollback that runs after the TTL handed the seat to
/// someone else leaves their selection alone. Both must be settled: the cache entry by `confirm`
/// or `rollback`, the slot by `release_slot`. Anything left unsettled when the hold is dropped is compensated in the background, and the
/// SELECTED TTL covers the case where even that cannot run.
#[must_use = "an unsettled hold leaves the seat SELECTED until its TTL runs out"]
struct SeatHold {
    seat_id: i64,
    user_id: i64,
    holder: LockToken,
    cache: Arc<dyn SeatStateCache>,
    queue: AdmissionQueue,
    cache_resolved: bool,
    slot_released: bool,
}

impl SeatHold {
    async fn confirm(&mut self) {
        self.cache_resolved = true;
        if let Err(e) = self
            .cache
            .set_status(self.seat_id, SeatStatus::Confirmed, Duration::ZERO)
            .await
        {
            // The ledger commit stands; a later attempt hits the ledger conflict and repairs the cache.
            error!(seat_id = self.seat_id, "Failed to mark seat CONFIRMED: {}", e);
        }
    }

    async fn rollback(&mut self) {
        self.cache_resolved = true;
        match self.cache.clear_selected(self.seat_id, &self.holder).await {
            Ok(true) => {}
            Ok(false) => debug!(seat_id = self.seat_id, "Selection already expired, nothing to roll back"),
            Err(e) => error!(
                seat_id = self.seat_id,
                stage = %AttemptStage::Rollback,
                "Failed to clear SELECTED, TTL will reclaim it: {}",
                e
            ),
        }
    }

    async fn release_slot(mut self) {
        self.slot_released = true;
        if let Err(e) = self.queue.release(self.user_id).await {
            error!(
                user_id = self.user_id,
                stage = %AttemptStage::ReleaseSlot,
                "Failed to release admission slot, TTL will reclaim it: {}",
                e
            );
        }
    }
}

impl Drop for SeatHold {
    fn drop(&mut self) {
        if self.cache_resolved && self.slot_released {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let seat_id = self.seat_id;
        let user_id = self.user_id;
        let holder = self.holder.clone();
        let cache = (!self.cache_resolved).then(|| self.cache.clone());
        let queue = (!self.slot_released).then(|| self.queue.clone());

        handle.spawn(async move {
            if let Some(cache) = cache {
                if let Err(e) = cache.clear_selected(seat_id, &holder).await {
                    warn!(seat_id, "Deferred rollback failed, TTL will reclaim it: {}", e);
                }
            }
            if let Some(queue) = queue {
                if let Err(e) = queue.release(user_id).await {
                    warn!(user_id, "Deferred slot release failed: {}", e);
                }
            }
        });
    }
}
