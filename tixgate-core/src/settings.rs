use std::time::Duration;

/// Tunables for admission, locking and seat selection.
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// Upper bound on live active slots.
    pub max_active_slots: u64,
    /// How long an unconfirmed SELECTED entry survives.
    pub selected_ttl: Duration,
    pub active_slot_ttl: Duration,
    pub lock_wait: Duration,
    pub lock_hold: Duration,
    pub promoter_period: Duration,
    /// Serialize promoter ticks across instances with a shared lock.
    pub promoter_leader_lock: bool,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            max_active_slots: 100,
            selected_ttl: Duration::from_secs(5 * 60),
            active_slot_ttl: Duration::from_secs(5 * 60),
            lock_wait: Duration::from_secs(1),
            lock_hold: Duration::from_secs(2),
            promoter_period: Duration::from_secs(1),
            promoter_leader_lock: true,
        }
    }
}
