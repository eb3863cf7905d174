use std::sync::Arc;
use tixgate_core::{AdmissionQueue, ReservationCoordinator, SeatCatalog};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ReservationCoordinator>,
    pub queue: AdmissionQueue,
    pub catalog: SeatCatalog,
}

impl AppState {
    pub fn new(coordinator: Arc<ReservationCoordinator>, catalog: SeatCatalog) -> Self {
        Self {
            queue: coordinator.queue().clone(),
            coordinator,
            catalog,
        }
    }
}
