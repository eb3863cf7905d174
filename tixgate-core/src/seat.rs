use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A seat as recorded in the ledger. `reserved` is the durable flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: i64,
    pub seat_number: String,
    pub reserved: bool,
}

impl Seat {
    pub fn new(id: i64, seat_number: impl Into<String>) -> Self {
        Self {
            id,
            seat_number: seat_number.into(),
            reserved: false,
        }
    }

    /// Marks the seat as sold. Reserving twice is a rule violation, never a no-op.
    pub fn reserve(&mut self) -> Result<(), SeatError> {
        if self.reserved {
            return Err(SeatError::AlreadyReserved(self.id));
        }
        self.reserved = true;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), SeatError> {
        if !self.reserved {
            return Err(SeatError::NotReserved(self.id));
        }
        self.reserved = false;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SeatError {
    #[error("Seat {0} is already reserved")]
    AlreadyReserved(i64),
    #[error("Seat {0} is not reserved")]
    NotReserved(i64),
    #[error("Unknown seat status: {0}")]
    UnknownStatus(String),
}

/// Live status kept in the seat-state cache. A missing entry reads as `Available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    #[default]
    Available,
    Selected,
    Confirmed,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Selected => "SELECTED",
            SeatStatus::Confirmed => "CONFIRMED",
        }
    }
}

impl fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeatStatus {
    type Err = SeatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "SELECTED" => Ok(SeatStatus::Selected),
            "CONFIRMED" => Ok(SeatStatus::Confirmed),
            other => Err(SeatError::UnknownStatus(other.to_string())),
        }
    }
}

/// Durable record of a sale, written once by a successful ledger commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: i64,
    pub seat_id: i64,
    pub reserved_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(user_id: i64, seat_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            seat_id,
            reserved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_lifecycle() {
        let mut seat = Seat::new(1, "Seat 1");

        seat.reserve().unwrap();
        assert!(seat.reserved);
        assert_eq!(seat.reserve(), Err(SeatError::AlreadyReserved(1)));

        seat.cancel().unwrap();
        assert!(!seat.reserved);
        assert_eq!(seat.cancel(), Err(SeatError::NotReserved(1)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("SELECTED".parse::<SeatStatus>().unwrap(), SeatStatus::Selected);
        assert_eq!(SeatStatus::default(), SeatStatus::Available);
        assert!("HELD".parse::<SeatStatus>().is_err());
    }
}
