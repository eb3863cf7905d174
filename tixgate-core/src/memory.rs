//! In-process implementations of the store seams.
//!
//! Each one keeps the atomicity contract of its trait behind a single mutex, which makes them
//! suitable stand-ins for Redis, Postgres and Kafka in tests and local runs. Expiry uses
//! `tokio::time::Instant`, so paused-clock tests can fast-forward TTLs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::cache::SeatStateCache;
use crate::events::{EventPublisher, ReservationEvent};
use crate::lock::{DistributedLock, LockToken};
use crate::queue::AdmissionStore;
use crate::repository::{LedgerError, SeatLedger};
use crate::seat::{Reservation, Seat, SeatStatus};
use crate::StoreResult;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every critical section leaves the state consistent, so poisoning is ignored.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn deadline(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

// ============================================================================
// Ledger
// ============================================================================

#[derive(Default)]
struct LedgerState {
    seats: BTreeMap<i64, Seat>,
    reservations: Vec<Reservation>,
}

#[derive(Default)]
pub struct MemorySeatLedger {
    state: Mutex<LedgerState>,
}

impl MemorySeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seats `1..=count`, numbered "Seat N".
    pub fn with_seats(count: u32) -> Self {
        let ledger = Self::new();
        ledger.provision(count);
        ledger
    }

    fn provision(&self, count: u32) -> u32 {
        let mut state = guard(&self.state);
        if !state.seats.is_empty() {
            return 0;
        }
        for n in 1..=i64::from(count) {
            state.seats.insert(n, Seat::new(n, format!("Seat {}", n)));
        }
        count
    }

    /// Durable flag after a transaction, bypassing the trait.
    pub fn is_reserved(&self, seat_id: i64) -> bool {
        guard(&self.state)
            .seats
            .get(&seat_id)
            .map(|seat| seat.reserved)
            .unwrap_or(false)
    }

    pub fn reservation_count(&self) -> usize {
        guard(&self.state).reservations.len()
    }
}

#[async_trait]
impl SeatLedger for MemorySeatLedger {
    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, LedgerError> {
        Ok(guard(&self.state).seats.get(&seat_id).cloned())
    }

    async fn list_seats(&self) -> Result<Vec<Seat>, LedgerError> {
        Ok(guard(&self.state).seats.values().cloned().collect())
    }

    async fn commit_reservation(&self, seat_id: i64, user_id: i64) -> Result<Reservation, LedgerError> {
        let mut state = guard(&self.state);
        let seat = state
            .seats
            .get_mut(&seat_id)
            .ok_or(LedgerError::SeatNotFound(seat_id))?;

        seat.reserve()?;

        let reservation = Reservation::new(user_id, seat_id);
        state.reservations.push(reservation.clone());
        Ok(reservation)
    }

    async fn cancel_reservation(&self, seat_id: i64, user_id: i64) -> Result<Seat, LedgerError> {
        let mut state = guard(&self.state);
        let LedgerState { seats, reservations } = &mut *state;

        let seat = seats
            .get_mut(&seat_id)
            .ok_or(LedgerError::SeatNotFound(seat_id))?;
        if !seat.reserved {
            return Err(LedgerError::NotReserved(seat_id));
        }
        if !reservations
            .iter()
            .any(|r| r.seat_id == seat_id && r.user_id == user_id)
        {
            return Err(LedgerError::NotOwner { seat_id, user_id });
        }

        seat.cancel()?;
        reservations.retain(|r| !(r.seat_id == seat_id && r.user_id == user_id));
        Ok(seat.clone())
    }

    async fn reservations_for_seat(&self, seat_id: i64) -> Result<Vec<Reservation>, LedgerError> {
        Ok(guard(&self.state)
            .reservations
            .iter()
            .filter(|r| r.seat_id == seat_id)
            .cloned()
            .collect())
    }

    async fn seed_seats(&self, count: u32) -> Result<u32, LedgerError> {
        Ok(self.provision(count))
    }
}

// ============================================================================
// Seat-state cache
// ============================================================================

struct CacheEntry {
    status: SeatStatus,
    holder: Option<LockToken>,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemorySeatCache {
    entries: Mutex<HashMap<i64, CacheEntry>>,
    writes: AtomicU64,
}

impl MemorySeatCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of write and delete calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn live_entry(entries: &mut HashMap<i64, CacheEntry>, seat_id: i64) -> Option<&CacheEntry> {
        let expired = matches!(
            entries.get(&seat_id),
            Some(CacheEntry { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            entries.remove(&seat_id);
        }
        entries.get(&seat_id)
    }

    fn live_status(entries: &mut HashMap<i64, CacheEntry>, seat_id: i64) -> SeatStatus {
        Self::live_entry(entries, seat_id)
            .map(|entry| entry.status)
            .unwrap_or(SeatStatus::Available)
    }

    fn write(&self, seat_id: i64, entry: CacheEntry) {
        self.writes.fetch_add(1, Ordering::SeqCst);
        guard(&self.entries).insert(seat_id, entry);
    }
}

#[async_trait]
impl SeatStateCache for MemorySeatCache {
    async fn get_status(&self, seat_id: i64) -> StoreResult<SeatStatus> {
        Ok(Self::live_status(&mut guard(&self.entries), seat_id))
    }

    async fn get_statuses(&self, seat_ids: &[i64]) -> StoreResult<Vec<SeatStatus>> {
        let mut entries = guard(&self.entries);
        Ok(seat_ids
            .iter()
            .map(|seat_id| Self::live_status(&mut entries, *seat_id))
            .collect())
    }

    async fn set_status(&self, seat_id: i64, status: SeatStatus, ttl: Duration) -> StoreResult<()> {
        self.write(
            seat_id,
            CacheEntry {
                status,
                holder: None,
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, seat_id: i64) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        guard(&self.entries).remove(&seat_id);
        Ok(())
    }

    async fn mark_selected(&self, seat_id: i64, holder: &LockToken, ttl: Duration) -> StoreResult<()> {
        self.write(
            seat_id,
            CacheEntry {
                status: SeatStatus::Selected,
                holder: Some(holder.clone()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn clear_selected(&self, seat_id: i64, holder: &LockToken) -> StoreResult<bool> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut entries = guard(&self.entries);
        let owned = matches!(
            Self::live_entry(&mut entries, seat_id),
            Some(CacheEntry { status: SeatStatus::Selected, holder: Some(owner), .. }) if owner == holder
        );
        if owned {
            entries.remove(&seat_id);
        }
        Ok(owned)
    }
}

// ============================================================================
// Admission store
// ============================================================================

#[derive(Default)]
struct AdmissionState {
    waiting: BTreeMap<u64, i64>,
    scores: HashMap<i64, u64>,
    next_score: u64,
    active: HashMap<i64, Instant>,
}

impl AdmissionState {
    fn prune(&mut self) {
        let now = Instant::now();
        self.active.retain(|_, expires_at| *expires_at > now);
    }

    fn rank_of(&self, user_id: i64) -> Option<u64> {
        let score = *self.scores.get(&user_id)?;
        Some(self.waiting.range(..score).count() as u64)
    }
}

#[derive(Default)]
pub struct MemoryAdmissionStore {
    state: Mutex<AdmissionState>,
}

impl MemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmissionStore for MemoryAdmissionStore {
    async fn enqueue(&self, user_id: i64) -> StoreResult<Option<u64>> {
        let mut state = guard(&self.state);
        state.prune();
        if state.active.contains_key(&user_id) {
            return Ok(None);
        }
        if !state.scores.contains_key(&user_id) {
            let score = state.next_score;
            state.next_score += 1;
            state.waiting.insert(score, user_id);
            state.scores.insert(user_id, score);
        }
        Ok(state.rank_of(user_id))
    }

    async fn rank(&self, user_id: i64) -> StoreResult<Option<u64>> {
        Ok(guard(&self.state).rank_of(user_id))
    }

    async fn waiting_count(&self) -> StoreResult<u64> {
        Ok(guard(&self.state).waiting.len() as u64)
    }

    async fn pop_and_activate(&self, limit: u64, ttl: Duration) -> StoreResult<Vec<i64>> {
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut state = guard(&self.state);
        let expires_at = Instant::now() + ttl;

        let scores: Vec<u64> = state.waiting.keys().take(limit).copied().collect();
        let mut promoted = Vec::with_capacity(scores.len());
        for score in scores {
            if let Some(user_id) = state.waiting.remove(&score) {
                state.scores.remove(&user_id);
                state.active.insert(user_id, expires_at);
                promoted.push(user_id);
            }
        }
        Ok(promoted)
    }

    async fn activate(&self, user_id: i64, ttl: Duration) -> StoreResult<()> {
        guard(&self.state).active.insert(user_id, Instant::now() + ttl);
        Ok(())
    }

    async fn is_active(&self, user_id: i64) -> StoreResult<bool> {
        let mut state = guard(&self.state);
        state.prune();
        Ok(state.active.contains_key(&user_id))
    }

    async fn active_count(&self) -> StoreResult<u64> {
        let mut state = guard(&self.state);
        state.prune();
        Ok(state.active.len() as u64)
    }

    async fn remove(&self, user_id: i64) -> StoreResult<()> {
        let mut state = guard(&self.state);
        state.active.remove(&user_id);
        if let Some(score) = state.scores.remove(&user_id) {
            state.waiting.remove(&score);
        }
        Ok(())
    }
}

// ============================================================================
// Lock
// ============================================================================

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
pub struct MemoryLock {
    held: Mutex<HashMap<String, (LockToken, Instant)>>,
    grants: AtomicU64,
    attempts: AtomicU64,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls to `try_acquire`, granted or not.
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn grant_count(&self) -> u64 {
        self.grants.load(Ordering::SeqCst)
    }

    pub fn is_held(&self, key: &str) -> bool {
        guard(&self.held)
            .get(key)
            .map(|(_, expires_at)| *expires_at > Instant::now())
            .unwrap_or(false)
    }

    fn try_take(&self, key: &str, token: &LockToken, hold: Duration) -> bool {
        let mut held = guard(&self.held);
        let now = Instant::now();
        match held.get(key) {
            Some((_, expires_at)) if *expires_at > now => false,
            _ => {
                held.insert(key.to_string(), (token.clone(), now + hold));
                true
            }
        }
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn try_acquire(
        &self,
        key: &str,
        token: &LockToken,
        wait: Duration,
        hold: Duration,
    ) -> StoreResult<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let give_up_at = Instant::now() + wait;

        loop {
            if self.try_take(key, token, hold) {
                self.grants.fetch_add(1, Ordering::SeqCst);
                return Ok(true);
            }
            let now = Instant::now();
            if now >= give_up_at {
                return Ok(false);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL.min(give_up_at - now)).await;
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        let mut held = guard(&self.held);
        if matches!(held.get(key), Some((owner, _)) if owner == token) {
            held.remove(key);
        }
        Ok(())
    }
}

// ============================================================================
// Event bus
// ============================================================================

/// Records every published event in order.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<ReservationEvent>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReservationEvent> {
        guard(&self.events).clone()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventLog {
    async fn publish(&self, event: &ReservationEvent) -> StoreResult<()> {
        guard(&self.events).push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_is_owner_scoped() {
        let lock = MemoryLock::new();
        let owner = LockToken::generate();
        let intruder = LockToken::generate();
        let hold = Duration::from_secs(2);

        assert!(lock.try_acquire("lock:seat:1", &owner, Duration::ZERO, hold).await.unwrap());
        assert!(!lock.try_acquire("lock:seat:1", &intruder, Duration::from_millis(20), hold).await.unwrap());

        // Only the owner can release; a second release is a no-op.
        lock.release("lock:seat:1", &intruder).await.unwrap();
        assert!(lock.is_held("lock:seat:1"));
        lock.release("lock:seat:1", &owner).await.unwrap();
        lock.release("lock:seat:1", &owner).await.unwrap();
        assert!(!lock.is_held("lock:seat:1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_hold_expires() {
        let lock = MemoryLock::new();
        let first = LockToken::generate();
        let second = LockToken::generate();

        assert!(lock.try_acquire("k", &first, Duration::ZERO, Duration::from_secs(2)).await.unwrap());
        tokio::time::advance(Duration::from_millis(2_001)).await;
        assert!(lock.try_acquire("k", &second, Duration::ZERO, Duration::from_secs(2)).await.unwrap());

        // The stale owner cannot release the new holder's lock.
        lock.release("k", &first).await.unwrap();
        assert!(lock.is_held("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_semantics() {
        let cache = MemorySeatCache::new();
        cache.set_status(1, SeatStatus::Selected, Duration::from_secs(300)).await.unwrap();
        cache.set_status(2, SeatStatus::Confirmed, Duration::ZERO).await.unwrap();

        tokio::time::advance(Duration::from_secs(3_600)).await;

        assert_eq!(cache.get_status(1).await.unwrap(), SeatStatus::Available);
        assert_eq!(cache.get_status(2).await.unwrap(), SeatStatus::Confirmed);
        assert_eq!(
            cache.get_statuses(&[1, 2, 3]).await.unwrap(),
            vec![SeatStatus::Available, SeatStatus::Confirmed, SeatStatus::Available]
        );
    }

    #[tokio::test]
    async fn test_selected_entry_is_cleared_only_by_its_holder() {
        let cache = MemorySeatCache::new();
        let first = LockToken::generate();
        let second = LockToken::generate();

        cache.mark_selected(1, &first, Duration::from_secs(300)).await.unwrap();
        assert!(!cache.clear_selected(1, &second).await.unwrap());
        assert_eq!(cache.get_status(1).await.unwrap(), SeatStatus::Selected);

        assert!(cache.clear_selected(1, &first).await.unwrap());
        assert_eq!(cache.get_status(1).await.unwrap(), SeatStatus::Available);

        // A confirmed seat is never cleared through the selection path.
        cache.mark_selected(2, &first, Duration::from_secs(300)).await.unwrap();
        cache.set_status(2, SeatStatus::Confirmed, Duration::ZERO).await.unwrap();
        assert!(!cache.clear_selected(2, &first).await.unwrap());
        assert_eq!(cache.get_status(2).await.unwrap(), SeatStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_ledger_rejects_double_commit_and_foreign_cancel() {
        let ledger = MemorySeatLedger::with_seats(2);

        ledger.commit_reservation(1, 10).await.unwrap();
        assert!(matches!(
            ledger.commit_reservation(1, 11).await,
            Err(LedgerError::AlreadyReserved(1))
        ));
        assert!(matches!(
            ledger.cancel_reservation(1, 11).await,
            Err(LedgerError::NotOwner { seat_id: 1, user_id: 11 })
        ));
        assert!(matches!(
            ledger.cancel_reservation(2, 10).await,
            Err(LedgerError::NotReserved(2))
        ));

        let seat = ledger.cancel_reservation(1, 10).await.unwrap();
        assert!(!seat.reserved);
        assert_eq!(ledger.reservation_count(), 0);
    }

    #[tokio::test]
    async fn test_pop_and_activate_moves_head_to_active() {
        let store = MemoryAdmissionStore::new();
        for user_id in [7, 3, 9] {
            store.enqueue(user_id).await.unwrap();
        }
        store.remove(3).await.unwrap();

        let promoted = store.pop_and_activate(5, Duration::from_secs(60)).await.unwrap();

        assert_eq!(promoted, vec![7, 9]);
        assert!(store.is_active(7).await.unwrap());
        assert!(!store.is_active(3).await.unwrap());
        assert_eq!(store.rank(7).await.unwrap(), None);
        assert_eq!(store.waiting_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_only_fills_empty_ledger() {
        let ledger = MemorySeatLedger::new();
        assert_eq!(ledger.seed_seats(10).await.unwrap(), 10);
        assert_eq!(ledger.seed_seats(10).await.unwrap(), 0);
        assert_eq!(ledger.list_seats().await.unwrap().len(), 10);
    }
}
