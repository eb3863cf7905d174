use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use tixgate_core::cache::seat_state_key;
use tixgate_core::{AdmissionStore, DistributedLock, LockToken, SeatStateCache, SeatStatus, StoreError, StoreResult};

const WAITING_KEY: &str = "queue:waiting";
const SEQUENCE_KEY: &str = "queue:sequence";
const ACTIVE_INDEX_KEY: &str = "queue:active:index";
const ACTIVE_KEY_PREFIX: &str = "queue:active:";
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

fn active_key(user_id: i64) -> String {
    format!("{}{}", ACTIVE_KEY_PREFIX, user_id)
}

fn selected_value(holder: &LockToken) -> String {
    format!("{}|{}", SeatStatus::Selected.as_str(), holder.as_str())
}

fn millis(duration: Duration) -> u64 {
    // Redis rejects PX 0.
    (duration.as_millis() as u64).max(1)
}

// Queue score is a monotonic sequence so arrival order never ties.
const ENQUEUE_SCRIPT: &str = r#"
    if redis.call("EXISTS", KEYS[3]) == 1 then
        return -1
    end
    if not redis.call("ZSCORE", KEYS[1], ARGV[1]) then
        local seq = redis.call("INCR", KEYS[2])
        redis.call("ZADD", KEYS[1], seq, ARGV[1])
    end
    return redis.call("ZRANK", KEYS[1], ARGV[1])
"#;

// Slot keys are derived in the script, so this assumes a single-node (non-cluster) deployment.
const POP_AND_ACTIVATE_SCRIPT: &str = r#"
    local users = redis.call("ZRANGE", KEYS[1], 0, tonumber(ARGV[1]) - 1)
    local promoted = {}
    for _, user in ipairs(users) do
        if redis.call("ZREM", KEYS[1], user) == 1 then
            redis.call("SET", ARGV[4] .. user, 1, "PX", ARGV[2])
            redis.call("ZADD", KEYS[2], ARGV[3], user)
            table.insert(promoted, user)
        end
    end
    return promoted
"#;

// Shared by seat locks and owned SELECTED entries.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
    if redis.call("GET", KEYS[1]) == ARGV[1] then
        return redis.call("DEL", KEYS[1])
    else
        return 0
    end
"#;

/// Shared Redis connection backing the seat-state cache, the admission queue and seat locks.
#[derive(Clone)]
pub struct RedisClient {
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    /// Owned selections are stored as `SELECTED|<holder>`.
    fn parse_status(key: String, raw: Option<String>) -> StoreResult<SeatStatus> {
        let Some(value) = raw else {
            return Ok(SeatStatus::Available);
        };
        let status = value.split_once('|').map_or(value.as_str(), |(status, _)| status);
        SeatStatus::from_str(status).map_err(|_| StoreError::Corrupt { key, value })
    }
}

#[async_trait]
impl SeatStateCache for RedisClient {
    async fn get_status(&self, seat_id: i64) -> StoreResult<SeatStatus> {
        let key = seat_state_key(seat_id);
        let raw: Option<String> = self.conn().get(&key).await.map_err(StoreError::backend)?;
        Self::parse_status(key, raw)
    }

    async fn get_statuses(&self, seat_ids: &[i64]) -> StoreResult<Vec<SeatStatus>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = seat_ids.iter().map(|id| seat_state_key(*id)).collect();
        let raw: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;

        keys.into_iter()
            .zip(raw)
            .map(|(key, value)| Self::parse_status(key, value))
            .collect()
    }

    async fn set_status(&self, seat_id: i64, status: SeatStatus, ttl: Duration) -> StoreResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(seat_state_key(seat_id)).arg(status.as_str());
        if !ttl.is_zero() {
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd.query_async::<()>(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;
        debug!("Seat {} -> {}", seat_id, status);
        Ok(())
    }

    async fn delete(&self, seat_id: i64) -> StoreResult<()> {
        self.conn()
            .del::<_, ()>(seat_state_key(seat_id))
            .await
            .map_err(StoreError::backend)
    }

    async fn mark_selected(&self, seat_id: i64, holder: &LockToken, ttl: Duration) -> StoreResult<()> {
        redis::cmd("SET")
            .arg(seat_state_key(seat_id))
            .arg(selected_value(holder))
            .arg("PX")
            .arg(millis(ttl))
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;
        debug!("Seat {} -> SELECTED", seat_id);
        Ok(())
    }

    async fn clear_selected(&self, seat_id: i64, holder: &LockToken) -> StoreResult<bool> {
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(seat_state_key(seat_id))
            .arg(selected_value(holder))
            .invoke_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;
        Ok(deleted == 1)
    }
}

#[async_trait]
impl AdmissionStore for RedisClient {
    async fn enqueue(&self, user_id: i64) -> StoreResult<Option<u64>> {
        let rank: i64 = redis::Script::new(ENQUEUE_SCRIPT)
            .key(WAITING_KEY)
            .key(SEQUENCE_KEY)
            .key(active_key(user_id))
            .arg(user_id)
            .invoke_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;

        Ok(u64::try_from(rank).ok())
    }

    async fn rank(&self, user_id: i64) -> StoreResult<Option<u64>> {
        self.conn()
            .zrank(WAITING_KEY, user_id)
            .await
            .map_err(StoreError::backend)
    }

    async fn waiting_count(&self) -> StoreResult<u64> {
        self.conn().zcard(WAITING_KEY).await.map_err(StoreError::backend)
    }

    async fn pop_and_activate(&self, limit: u64, ttl: Duration) -> StoreResult<Vec<i64>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let expires_at = Utc::now().timestamp_millis() + millis(ttl) as i64;
        redis::Script::new(POP_AND_ACTIVATE_SCRIPT)
            .key(WAITING_KEY)
            .key(ACTIVE_INDEX_KEY)
            .arg(limit)
            .arg(millis(ttl))
            .arg(expires_at)
            .arg(ACTIVE_KEY_PREFIX)
            .invoke_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)
    }

    async fn activate(&self, user_id: i64, ttl: Duration) -> StoreResult<()> {
        let expires_at = Utc::now().timestamp_millis() + millis(ttl) as i64;
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(active_key(user_id))
            .arg(1)
            .arg("PX")
            .arg(millis(ttl))
            .ignore()
            .cmd("ZADD")
            .arg(ACTIVE_INDEX_KEY)
            .arg(expires_at)
            .arg(user_id)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(StoreError::backend)
    }

    async fn is_active(&self, user_id: i64) -> StoreResult<bool> {
        self.conn()
            .exists(active_key(user_id))
            .await
            .map_err(StoreError::backend)
    }

    async fn active_count(&self) -> StoreResult<u64> {
        let now = Utc::now().timestamp_millis();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(ACTIVE_INDEX_KEY)
            .arg("-inf")
            .arg(now)
            .ignore()
            .cmd("ZCARD")
            .arg(ACTIVE_INDEX_KEY)
            .query_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;
        Ok(count)
    }

    async fn remove(&self, user_id: i64) -> StoreResult<()> {
        redis::pipe()
            .atomic()
            .cmd("DEL")
            .arg(active_key(user_id))
            .ignore()
            .cmd("ZREM")
            .arg(ACTIVE_INDEX_KEY)
            .arg(user_id)
            .ignore()
            .cmd("ZREM")
            .arg(WAITING_KEY)
            .arg(user_id)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await
            .map_err(StoreError::backend)
    }
}

#[async_trait]
impl DistributedLock for RedisClient {
    async fn try_acquire(&self, key: &str, token: &LockToken, wait: Duration, hold: Duration) -> StoreResult<bool> {
        let deadline = Instant::now() + wait;
        let mut conn = self.conn();

        loop {
            // SET NX: only the first caller gets the key.
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(millis(hold))
                .query_async(&mut conn)
                .await
                .map_err(StoreError::backend)?;

            if acquired.is_some() {
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> StoreResult<()> {
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(token.as_str())
            .invoke_async(&mut self.conn())
            .await
            .map_err(StoreError::backend)?;

        if deleted == 0 {
            debug!("Lock {} already expired or taken over", key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_key_layout() {
        assert_eq!(active_key(42), "queue:active:42");
    }

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(
            RedisClient::parse_status("state:seat:1".into(), None).unwrap(),
            SeatStatus::Available
        );
        assert_eq!(
            RedisClient::parse_status("state:seat:1".into(), Some("SELECTED".into())).unwrap(),
            SeatStatus::Selected
        );
        assert_eq!(
            RedisClient::parse_status("state:seat:1".into(), Some(selected_value(&LockToken::generate()))).unwrap(),
            SeatStatus::Selected
        );
        assert!(matches!(
            RedisClient::parse_status("state:seat:1".into(), Some("HELD".into())),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
