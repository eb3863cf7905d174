use serde::Deserialize;
use std::env;
use std::time::Duration;

use tixgate_core::ReservationSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub reservation: ReservationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReservationConfig {
    pub max_active_slots: u64,
    pub selected_ttl_seconds: u64,
    pub active_slot_ttl_seconds: u64,
    pub lock_wait_ms: u64,
    pub lock_hold_ms: u64,
    pub promoter_period_ms: u64,
    #[serde(default = "default_leader_lock")]
    pub promoter_leader_lock: bool,
    pub payment_success_rate: f64,
    #[serde(default)]
    pub payment_latency_ms: u64,
    pub seed_seats: u32,
}

fn default_leader_lock() -> bool {
    true
}

/// Bare environment variables that override `reservation.*` keys.
const RESERVATION_OVERRIDES: [(&str, &str); 6] = [
    ("MAX_ACTIVE_SLOTS", "reservation.max_active_slots"),
    ("SELECTED_TTL", "reservation.selected_ttl_seconds"),
    ("ACTIVE_SLOT_TTL", "reservation.active_slot_ttl_seconds"),
    ("LOCK_WAIT", "reservation.lock_wait_ms"),
    ("LOCK_HOLD", "reservation.lock_hold_ms"),
    ("PROMOTER_PERIOD", "reservation.promoter_period_ms"),
];

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in.
            .add_source(config::File::with_name("config/local").required(false))
            // Eg. `TIXGATE__REDIS__URL=redis://cache:6379`
            .add_source(config::Environment::with_prefix("TIXGATE").separator("__"));

        for (var, key) in RESERVATION_OVERRIDES {
            builder = builder.set_override_option(key, env::var(var).ok())?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn reservation_settings(&self) -> ReservationSettings {
        self.reservation.settings()
    }
}

impl ReservationConfig {
    pub fn settings(&self) -> ReservationSettings {
        ReservationSettings {
            max_active_slots: self.max_active_slots,
            selected_ttl: Duration::from_secs(self.selected_ttl_seconds),
            active_slot_ttl: Duration::from_secs(self.active_slot_ttl_seconds),
            lock_wait: Duration::from_millis(self.lock_wait_ms),
            lock_hold: Duration::from_millis(self.lock_hold_ms),
            promoter_period: Duration::from_millis(self.promoter_period_ms),
            promoter_leader_lock: self.promoter_leader_lock,
        }
    }

    pub fn payment_latency(&self) -> Duration {
        Duration::from_millis(self.payment_latency_ms)
    }
}
