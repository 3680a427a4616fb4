use async_trait::async_trait;
use shared::{JobEnvelope, JobType, ReservationJob};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::engine::ReservationEngine;
use crate::error::{JobFailure, QueueError, ReservationError};
use crate::notifications::NotificationWorker;
use crate::queue::{JobContext, JobHandler, JobQueue, WorkerHandle};

pub const RESERVATION_JOB_TYPES: [JobType; 2] = [JobType::ReserveSeat, JobType::ReserveProduct];

/// Feeds `reserve_seat` / `reserve_product` deliveries into the engine.
pub struct ReservationWorker {
    engine: Arc<ReservationEngine>,
}

impl ReservationWorker {
    pub fn new(engine: Arc<ReservationEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for ReservationWorker {
    async fn handle(&self, job: &JobEnvelope, _ctx: &JobContext) -> Result<(), JobFailure> {
        let reservation: ReservationJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| ReservationError::InvalidPayload(e.to_string()))?;
        self.engine.reserve(job.id, &reservation).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    pub reservation_concurrency: usize,
    pub notification_concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            reservation_concurrency: 1,
            notification_concurrency: 2,
        }
    }
}

/// Registers every worker exactly once, however many times `start` is called.
pub struct Workers {
    queue: Arc<dyn JobQueue>,
    engine: Arc<ReservationEngine>,
    config: WorkerConfig,
    handles: Mutex<Vec<WorkerHandle>>,
}

impl Workers {
    pub fn new(queue: Arc<dyn JobQueue>, engine: Arc<ReservationEngine>, config: WorkerConfig) -> Self {
        Self {
            queue,
            engine,
            config,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Returns `true` when this call registered the workers.
    pub async fn start(&self) -> Result<bool, QueueError> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Ok(false);
        }

        if self.config.reservation_concurrency > 1 && self.engine.store().atomic_decrement().is_none() {
            warn!(
                "Reservation concurrency {} on a get/set counter store; decrements stay serialized per key in this process only",
                self.config.reservation_concurrency
            );
        }

        let reservations: Arc<dyn JobHandler> = Arc::new(ReservationWorker::new(self.engine.clone()));
        for job_type in RESERVATION_JOB_TYPES {
            let handle = self
                .queue
                .process(job_type, self.config.reservation_concurrency, reservations.clone())
                .await?;
            handles.push(handle);
        }

        let notifications: Arc<dyn JobHandler> = Arc::new(NotificationWorker::default());
        let handle = self
            .queue
            .process(JobType::PushNotificationCode, self.config.notification_concurrency, notifications)
            .await?;
        handles.push(handle);

        info!("Workers started for {} job types", handles.len());
        Ok(true)
    }

    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            info!("Stopping {} worker", handle.job_type());
            handle.shutdown().await;
        }
    }
}
