use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::seat::{Reservation, Seat};
use crate::StoreResult;

pub const RESERVATION_TOPIC: &str = "reservation-events";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationEventType {
    Success,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEvent {
    pub reservation_id: Option<Uuid>,
    pub user_id: i64,
    pub seat_id: i64,
    pub seat_number: String,
    pub reserved_at: Option<DateTime<Utc>>,
    pub event_type: ReservationEventType,
}

impl ReservationEvent {
    pub fn success(reservation: &Reservation, seat_number: &str) -> Self {
        Self {
            reservation_id: Some(reservation.id),
            user_id: reservation.user_id,
            seat_id: reservation.seat_id,
            seat_number: seat_number.to_string(),
            reserved_at: Some(reservation.reserved_at),
            event_type: ReservationEventType::Success,
        }
    }

    pub fn failed(user_id: i64, seat: &Seat) -> Self {
        Self::without_reservation(user_id, seat, ReservationEventType::Failed)
    }

    pub fn cancelled(user_id: i64, seat: &Seat) -> Self {
        Self::without_reservation(user_id, seat, ReservationEventType::Cancelled)
    }

    fn without_reservation(user_id: i64, seat: &Seat, event_type: ReservationEventType) -> Self {
        Self {
            reservation_id: None,
            user_id,
            seat_id: seat.id,
            seat_number: seat.seat_number.clone(),
            reserved_at: None,
            event_type,
        }
    }

    /// Events for one seat share a key so the bus keeps them in order.
    pub fn partition_key(&self) -> String {
        self.seat_id.to_string()
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_payload(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

/// Outbound side of the event bus. Delivery is at-least-once and ordered per partition key.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ReservationEvent) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_event_payload_shape() {
        let seat = Seat::new(7, "Seat 7");
        let event = ReservationEvent::failed(42, &seat);

        let value: serde_json::Value = serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["reservationId"], serde_json::Value::Null);
        assert_eq!(value["reservedAt"], serde_json::Value::Null);
        assert_eq!(value["userId"], 42);
        assert_eq!(value["seatNumber"], "Seat 7");
        assert_eq!(value["eventType"], "FAILED");
        assert_eq!(event.partition_key(), "7");
    }

    #[test]
    fn test_success_event_carries_reservation() {
        let reservation = Reservation::new(3, 9);
        let event = ReservationEvent::success(&reservation, "Seat 9");

        let decoded = ReservationEvent::from_payload(&event.to_payload().unwrap()).unwrap();
        assert_eq!(decoded.reservation_id, Some(reservation.id));
        assert_eq!(decoded.event_type, ReservationEventType::Success);
    }
}
