#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reservation_service::api::{create_router, AppState};
use reservation_service::catalog::Catalog;
use reservation_service::engine::{AvailabilityFlags, ReservationEngine};
use reservation_service::gateway::Gateway;
use reservation_service::handlers::{WorkerConfig, Workers};
use reservation_service::queue::InMemoryJobQueue;
use reservation_service::store::InMemoryCounterStore;
use shared::{JobEvent, ResourceKey};
use tokio::sync::broadcast;
use uuid::Uuid;

pub const INITIAL_SEATS: u64 = 50;

pub struct Harness {
    pub store: Arc<InMemoryCounterStore>,
    pub queue: Arc<InMemoryJobQueue>,
    pub flags: Arc<AvailabilityFlags>,
    pub engine: Arc<ReservationEngine>,
    pub workers: Arc<Workers>,
    pub catalog: Arc<Catalog>,
}

impl Harness {
    pub fn new(store: InMemoryCounterStore, config: WorkerConfig) -> Self {
        let store = Arc::new(store);
        let queue = Arc::new(InMemoryJobQueue::recording());
        let flags = Arc::new(AvailabilityFlags::new());
        let catalog = Arc::new(Catalog::default());

        let mut engine = ReservationEngine::new(store.clone(), flags.clone())
            .with_default(ResourceKey::seats(), INITIAL_SEATS);
        for product in catalog.products() {
            engine = engine.with_default(product.resource_key(), product.initial_available_quantity);
        }
        let engine = Arc::new(engine);
        let workers = Arc::new(Workers::new(queue.clone(), engine.clone(), config));

        Self {
            store,
            queue,
            flags,
            engine,
            workers,
            catalog,
        }
    }

    pub fn serialized() -> Self {
        Self::new(InMemoryCounterStore::new(), WorkerConfig::default())
    }

    pub fn router(&self) -> axum::Router {
        let state = AppState {
            gateway: Arc::new(Gateway::new(
                self.queue.clone(),
                self.store.clone(),
                self.flags.clone(),
            )),
            workers: self.workers.clone(),
            catalog: self.catalog.clone(),
            initial_seats: INITIAL_SEATS,
        };
        create_router(state)
    }
}

/// Collects events until `count` jobs reached a terminal state.
pub async fn wait_for_terminal(events: &mut broadcast::Receiver<JobEvent>, count: usize) -> Vec<JobEvent> {
    let mut terminal = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while terminal.len() < count {
            match events.recv().await {
                Ok(event) if event.is_terminal() => terminal.push(event),
                Ok(_) => {}
                Err(e) => panic!("event channel error: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for job events");
    terminal
}

pub fn by_job_id(events: Vec<JobEvent>) -> HashMap<Uuid, JobEvent> {
    events.into_iter().map(|event| (event.job_id, event)).collect()
}
