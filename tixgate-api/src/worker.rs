use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use std::str::Utf8Error;
use tixgate_core::{ReservationEvent, ReservationEventType, RESERVATION_TOPIC};
use tracing::{error, info, warn};

/// Consumes reservation events and sends user notifications.
///
/// Offsets are committed by hand after the notification is out, so a crash mid-message means the
/// message is delivered again. Payloads that cannot be decoded are committed and skipped.
pub async fn start_notification_worker(brokers: String, group_id: String) -> Result<(), KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[RESERVATION_TOPIC])?;

    info!("Notification worker started, listening to {}...", RESERVATION_TOPIC);

    loop {
        match consumer.recv().await {
            Err(e) => error!("Kafka error: {}", e),
            Ok(m) => {
                if let Some(event) = decode(m.payload_view::<str>()) {
                    notify(&event);
                }
                if let Err(e) = consumer.commit_message(&m, CommitMode::Async) {
                    error!("Failed to commit offset {} on partition {}: {}", m.offset(), m.partition(), e);
                }
            }
        }
    }
}

fn decode(payload: Option<Result<&str, Utf8Error>>) -> Option<ReservationEvent> {
    match payload {
        None => {
            warn!("Skipping reservation event without payload");
            None
        }
        Some(Err(e)) => {
            warn!("Skipping non UTF-8 reservation event: {}", e);
            None
        }
        Some(Ok(text)) => match ReservationEvent::from_payload(text) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping undecodable reservation event: {}", e);
                None
            }
        },
    }
}

fn notify(event: &ReservationEvent) {
    match event.event_type {
        ReservationEventType::Success => info!(
            user_id = event.user_id,
            seat_id = event.seat_id,
            reservation_id = ?event.reservation_id,
            "Notify user {}: {} is confirmed",
            event.user_id,
            event.seat_number
        ),
        ReservationEventType::Failed => info!(
            user_id = event.user_id,
            seat_id = event.seat_id,
            "Reservation attempt for {} failed",
            event.seat_number
        ),
        ReservationEventType::Cancelled => info!(
            user_id = event.user_id,
            seat_id = event.seat_id,
            "Reservation for {} cancelled",
            event.seat_number
        ),
    }
}
