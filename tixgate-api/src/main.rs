use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tixgate_api::{app, worker::start_notification_worker, AppState};
use tixgate_core::{
    AdmissionQueue, QueuePromoter, ReservationCoordinator, SeatCatalog, SeatLedger, SimulatedPaymentOracle,
};
use tixgate_store::{Config, DbClient, EventProducer, PostgresSeatLedger, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tixgate_api=debug,tixgate_core=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    let settings = config.reservation_settings();
    tracing::info!("Starting Tixgate API on port {}", config.server.port);

    // Postgres
    let db = DbClient::new(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let ledger = Arc::new(PostgresSeatLedger::new(db.pool.clone()));
    let seeded = ledger.seed_seats(config.reservation.seed_seats).await?;
    if seeded == 0 {
        tracing::info!("Seat table already populated, skipping seed");
    }

    // Redis
    let redis = Arc::new(
        RedisClient::new(&config.redis.url)
            .await
            .context("Failed to connect to Redis")?,
    );

    // Kafka
    let producer = Arc::new(EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?);

    let payments = Arc::new(SimulatedPaymentOracle::new(
        config.reservation.payment_success_rate,
        config.reservation.payment_latency(),
    ));

    let queue = AdmissionQueue::new(redis.clone(), settings.active_slot_ttl);
    let coordinator = Arc::new(ReservationCoordinator::new(
        queue.clone(),
        ledger.clone(),
        redis.clone(),
        redis.clone(),
        payments,
        producer,
        settings.clone(),
    ));
    let catalog = SeatCatalog::new(ledger, redis.clone());

    let mut promoter = QueuePromoter::new(queue, &settings);
    if settings.promoter_leader_lock {
        promoter = promoter.with_leader_lock(redis.clone());
    }
    tokio::spawn(promoter.run());

    let brokers = config.kafka.brokers.clone();
    let group_id = config.kafka.group_id.clone();
    tokio::spawn(async move {
        if let Err(e) = start_notification_worker(brokers, group_id).await {
            tracing::error!("Notification worker stopped: {}", e);
        }
    });

    let app = app(AppState::new(coordinator, catalog));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
