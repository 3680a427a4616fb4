//! Boundary between inbound requests and the queue.
//!
//! `request_reservation` answers immediately: it either rejects from the
//! availability flag or enqueues and acknowledges. The job's terminal state is
//! only observable through lifecycle events and a later availability query.

use shared::{JobType, ResourceKey, ReservationJob};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::AvailabilityFlags;
use crate::error::StoreError;
use crate::queue::{submit, JobQueue};
use crate::store::CounterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Blocked,
    QueueUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationResponse {
    Accepted { job_id: Uuid },
    Rejected(RejectReason),
}

pub struct Gateway {
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn CounterStore>,
    flags: Arc<AvailabilityFlags>,
}

impl Gateway {
    pub fn new(queue: Arc<dyn JobQueue>, store: Arc<dyn CounterStore>, flags: Arc<AvailabilityFlags>) -> Self {
        Self { queue, store, flags }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub async fn request_reservation(&self, job_type: JobType, job: ReservationJob) -> ReservationResponse {
        if !self.flags.is_available(&job.resource_key) {
            info!("Rejected reservation for {}: reservations blocked", job.resource_key);
            return ReservationResponse::Rejected(RejectReason::Blocked);
        }

        match submit(self.queue.as_ref(), job_type, &job).await {
            Ok(job_id) => ReservationResponse::Accepted { job_id },
            Err(e) => {
                error!("Failed to enqueue {} job for {}: {}", job_type, job.resource_key, e);
                ReservationResponse::Rejected(RejectReason::QueueUnavailable)
            }
        }
    }

    /// Current count for `key`, or `default` while the store has no entry.
    pub async fn query_availability(&self, key: &ResourceKey, default: u64) -> Result<u64, StoreError> {
        Ok(self.store.get_count(key).await?.unwrap_or(default))
    }
}
