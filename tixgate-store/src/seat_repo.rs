use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use tixgate_core::{LedgerError, Reservation, Seat, SeatLedger, StoreError};

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    seat_number: String,
    reserved: bool,
}

impl From<SeatRow> for Seat {
    fn from(row: SeatRow) -> Self {
        Seat {
            id: row.id,
            seat_number: row.seat_number,
            reserved: row.reserved,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    user_id: i64,
    seat_id: i64,
    reserved_at: DateTime<Utc>,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            id: row.id,
            user_id: row.user_id,
            seat_id: row.seat_id,
            reserved_at: row.reserved_at,
        }
    }
}

fn db_err(err: sqlx::Error) -> LedgerError {
    LedgerError::Store(StoreError::backend(err))
}

/// Postgres ledger. Writes lock the seat row with `FOR UPDATE` for the length of the transaction.
#[derive(Clone)]
pub struct PostgresSeatLedger {
    pool: Pool<Postgres>,
}

impl PostgresSeatLedger {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn lock_seat(tx: &mut sqlx::Transaction<'_, Postgres>, seat_id: i64) -> Result<Seat, LedgerError> {
        let row: Option<SeatRow> =
            sqlx::query_as("SELECT id, seat_number, reserved FROM seats WHERE id = $1 FOR UPDATE")
                .bind(seat_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(db_err)?;

        row.map(Seat::from).ok_or(LedgerError::SeatNotFound(seat_id))
    }
}

#[async_trait]
impl SeatLedger for PostgresSeatLedger {
    async fn find_seat(&self, seat_id: i64) -> Result<Option<Seat>, LedgerError> {
        let row: Option<SeatRow> = sqlx::query_as("SELECT id, seat_number, reserved FROM seats WHERE id = $1")
            .bind(seat_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Seat::from))
    }

    async fn list_seats(&self) -> Result<Vec<Seat>, LedgerError> {
        let rows: Vec<SeatRow> = sqlx::query_as("SELECT id, seat_number, reserved FROM seats ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(Seat::from).collect())
    }

    async fn commit_reservation(&self, seat_id: i64, user_id: i64) -> Result<Reservation, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut seat = Self::lock_seat(&mut tx, seat_id).await?;
        seat.reserve()?;

        sqlx::query("UPDATE seats SET reserved = TRUE WHERE id = $1")
            .bind(seat_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let reservation = Reservation::new(user_id, seat_id);
        sqlx::query("INSERT INTO reservations (id, user_id, seat_id, reserved_at) VALUES ($1, $2, $3, $4)")
            .bind(reservation.id)
            .bind(reservation.user_id)
            .bind(reservation.seat_id)
            .bind(reservation.reserved_at)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(reservation)
    }

    async fn cancel_reservation(&self, seat_id: i64, user_id: i64) -> Result<Seat, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let mut seat = Self::lock_seat(&mut tx, seat_id).await?;
        seat.cancel()?;

        let deleted = sqlx::query("DELETE FROM reservations WHERE seat_id = $1 AND user_id = $2")
            .bind(seat_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?
            .rows_affected();

        if deleted == 0 {
            // Dropping the transaction rolls it back.
            return Err(LedgerError::NotOwner { seat_id, user_id });
        }

        sqlx::query("UPDATE seats SET reserved = FALSE WHERE id = $1")
            .bind(seat_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(seat)
    }

    async fn reservations_for_seat(&self, seat_id: i64) -> Result<Vec<Reservation>, LedgerError> {
        let rows: Vec<ReservationRow> = sqlx::query_as(
            "SELECT id, user_id, seat_id, reserved_at FROM reservations WHERE seat_id = $1 ORDER BY reserved_at",
        )
        .bind(seat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn seed_seats(&self, count: u32) -> Result<u32, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serializes concurrent seeders so two fresh instances don't both fill the table.
        sqlx::query("LOCK TABLE seats IN EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let (existing,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM seats")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;
        if existing > 0 {
            return Ok(0);
        }

        for n in 1..=count {
            sqlx::query("INSERT INTO seats (seat_number, reserved) VALUES ($1, FALSE)")
                .bind(format!("Seat {}", n))
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        info!("Seeded {} seats", count);
        Ok(count)
    }
}
