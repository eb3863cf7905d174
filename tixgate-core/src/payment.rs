use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Payment oracle unavailable: {0}")]
    Unavailable(String),
}

/// Opaque yes/no payment outcome for one reservation attempt.
///
/// `Ok(false)` is a decline, an expected outcome. `Err` means no answer could be obtained.
#[async_trait]
pub trait PaymentOracle: Send + Sync {
    async fn authorize(&self, seat_id: i64, user_id: i64) -> Result<bool, PaymentError>;
}

/// Approves with a fixed probability after a simulated gateway delay.
pub struct SimulatedPaymentOracle {
    success_rate: f64,
    latency: Duration,
}

impl SimulatedPaymentOracle {
    pub fn new(success_rate: f64, latency: Duration) -> Self {
        let success_rate = if success_rate.is_finite() {
            success_rate.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self { success_rate, latency }
    }
}

#[async_trait]
impl PaymentOracle for SimulatedPaymentOracle {
    async fn authorize(&self, seat_id: i64, user_id: i64) -> Result<bool, PaymentError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let approved = rand::thread_rng().gen_bool(self.success_rate);
        tracing::debug!(seat_id, user_id, approved, "Simulated payment settled");
        Ok(approved)
    }
}

/// Always gives the same answer.
pub struct FixedPaymentOracle {
    approve: bool,
    latency: Duration,
}

impl FixedPaymentOracle {
    pub fn approving() -> Self {
        Self { approve: true, latency: Duration::ZERO }
    }

    pub fn declining() -> Self {
        Self { approve: false, latency: Duration::ZERO }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl PaymentOracle for FixedPaymentOracle {
    async fn authorize(&self, _seat_id: i64, _user_id: i64) -> Result<bool, PaymentError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(self.approve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_oracle_extremes() {
        let always = SimulatedPaymentOracle::new(1.0, Duration::ZERO);
        let never = SimulatedPaymentOracle::new(-3.0, Duration::ZERO);

        for user_id in 0..20 {
            assert!(always.authorize(1, user_id).await.unwrap());
            assert!(!never.authorize(1, user_id).await.unwrap());
        }
    }
}
