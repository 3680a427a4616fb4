//! Reservation engine.
//!
//! Runs inside a worker invocation and drives one job through
//! `STARTED -> CHECKING -> {DECREMENTING -> COMPLETED} | REJECTED | FAILED`
//! against the counter store.
//!
//! The counter store is a plain get/set backend, so two invocations reading
//! the same count could both write `count - 1` (a lost update). Decrements
//! for a key therefore go through a per-key lane that admits one invocation
//! at a time, and reservation workers are registered with concurrency 1.
//! That covers a single process only. When several processes share one
//! store, the store must offer [`AtomicDecrement`], and the engine then uses
//! it in place of get+set.
//!
//! [`AtomicDecrement`]: crate::store::AtomicDecrement

use shared::{ResourceKey, ReservationJob};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ReservationError, StoreError};
use crate::store::{CounterStore, Decrement};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    Started,
    Checking,
    Decrementing,
    Completed,
    Rejected,
    Failed,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReservationState::Started => "STARTED",
            ReservationState::Checking => "CHECKING",
            ReservationState::Decrementing => "DECREMENTING",
            ReservationState::Completed => "COMPLETED",
            ReservationState::Rejected => "REJECTED",
            ReservationState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Per-key "known exhausted" cache consulted by the gateway.
///
/// Keys start out available. The engine flips a key to exhausted when it
/// observes a zero count, and only [`ReservationEngine::reopen`] flips it back.
/// This is never authoritative: the engine re-reads the store for every job.
#[derive(Debug, Default)]
pub struct AvailabilityFlags {
    flags: RwLock<HashMap<ResourceKey, bool>>,
}

impl AvailabilityFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_available(&self, key: &ResourceKey) -> bool {
        let flags = self.flags.read().unwrap_or_else(PoisonError::into_inner);
        flags.get(key).copied().unwrap_or(true)
    }

    pub fn mark_exhausted(&self, key: &ResourceKey) {
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        if flags.insert(key.clone(), false) != Some(false) {
            info!("Reservations for {} are now blocked", key);
        }
    }

    pub fn mark_available(&self, key: &ResourceKey) {
        let mut flags = self.flags.write().unwrap_or_else(PoisonError::into_inner);
        flags.insert(key.clone(), true);
    }
}

/// One async mutex per resource key. A lane is dropped from the map once its
/// last holder leaves, so keys seen only once do not accumulate.
#[derive(Default)]
struct KeyedLanes {
    lanes: Mutex<HashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLanes {
    async fn enter(&self, key: &ResourceKey) -> LaneGuard<'_> {
        let lane = {
            let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
            lanes.entry(key.clone()).or_default().clone()
        };
        LaneGuard {
            lanes: self,
            key: key.clone(),
            guard: Some(lane.lock_owned().await),
        }
    }

    fn release(&self, key: &ResourceKey) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if lanes.get(key).is_some_and(|lane| Arc::strong_count(lane) == 1) {
            lanes.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

struct LaneGuard<'a> {
    lanes: &'a KeyedLanes,
    key: ResourceKey,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        // The guard owns a reference to the lane; let go of it first.
        self.guard.take();
        self.lanes.release(&self.key);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationReceipt {
    pub resource_key: ResourceKey,
    pub previous: u64,
    pub remaining: u64,
}

pub struct ReservationEngine {
    store: Arc<dyn CounterStore>,
    flags: Arc<AvailabilityFlags>,
    defaults: HashMap<ResourceKey, u64>,
    lanes: KeyedLanes,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn CounterStore>, flags: Arc<AvailabilityFlags>) -> Self {
        Self {
            store,
            flags,
            defaults: HashMap::new(),
            lanes: KeyedLanes::default(),
        }
    }

    /// Count assumed for `key` while the store has no entry for it.
    pub fn with_default(mut self, key: ResourceKey, initial: u64) -> Self {
        self.defaults.insert(key, initial);
        self
    }

    pub fn flags(&self) -> &Arc<AvailabilityFlags> {
        &self.flags
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn default_for(&self, key: &ResourceKey) -> Option<u64> {
        self.defaults.get(key).copied()
    }

    /// Re-initializes a pool and resets its flag from the written count.
    pub async fn reopen(&self, key: &ResourceKey, count: u64) -> Result<(), StoreError> {
        let _lane = self.lanes.enter(key).await;
        self.store.set_count(key, count).await?;
        if count > 0 {
            self.flags.mark_available(key);
        } else {
            self.flags.mark_exhausted(key);
        }
        info!("Initialized {} to {}", key, count);
        Ok(())
    }

    pub async fn reserve(&self, job_id: Uuid, job: &ReservationJob) -> Result<ReservationReceipt, ReservationError> {
        let key = &job.resource_key;
        let quantity = job.requested_quantity;
        self.transition(job_id, key, ReservationState::Started);

        if quantity == 0 {
            self.transition(job_id, key, ReservationState::Failed);
            return Err(ReservationError::InvalidQuantity(quantity));
        }

        let result = match self.store.atomic_decrement() {
            Some(atomic) => {
                self.transition(job_id, key, ReservationState::Checking);
                match atomic.decrement_if_available(key, quantity, self.default_for(key)).await {
                    Ok(decrement) => self.settle_atomic(job_id, key, quantity, decrement),
                    Err(err) => Err(ReservationError::from(err)),
                }
            }
            None => {
                let _lane = self.lanes.enter(key).await;
                self.check_and_decrement(job_id, key, quantity).await
            }
        };

        match &result {
            Ok(receipt) => {
                self.transition(job_id, key, ReservationState::Completed);
                info!("Reserved {} of {}, {} remaining", quantity, key, receipt.remaining);
            }
            Err(ReservationError::InsufficientResource { .. }) => {
                self.transition(job_id, key, ReservationState::Rejected);
            }
            Err(err) => {
                self.transition(job_id, key, ReservationState::Failed);
                warn!("Reservation job {} for {} failed: {}", job_id, key, err);
            }
        }

        result
    }

    async fn check_and_decrement(
        &self,
        job_id: Uuid,
        key: &ResourceKey,
        quantity: u64,
    ) -> Result<ReservationReceipt, ReservationError> {
        self.transition(job_id, key, ReservationState::Checking);
        let count = match self.store.get_count(key).await? {
            Some(count) => count,
            None => self
                .default_for(key)
                .ok_or_else(|| ReservationError::ResourceNotFound(key.clone()))?,
        };

        self.check_available(key, quantity, count)?;

        self.transition(job_id, key, ReservationState::Decrementing);
        let remaining = count - quantity;
        self.store.set_count(key, remaining).await?;

        if remaining == 0 {
            self.flags.mark_exhausted(key);
        }

        Ok(ReservationReceipt {
            resource_key: key.clone(),
            previous: count,
            remaining,
        })
    }

    fn settle_atomic(
        &self,
        job_id: Uuid,
        key: &ResourceKey,
        quantity: u64,
        decrement: Decrement,
    ) -> Result<ReservationReceipt, ReservationError> {
        match decrement {
            Decrement::Applied { previous, remaining } => {
                self.transition(job_id, key, ReservationState::Decrementing);
                if remaining == 0 {
                    self.flags.mark_exhausted(key);
                }
                Ok(ReservationReceipt {
                    resource_key: key.clone(),
                    previous,
                    remaining,
                })
            }
            Decrement::Insufficient { available } => {
                self.check_available(key, quantity, available)?;
                // A concurrent reopen refilled the pool between the conditional
                // update and the follow-up read.
                Err(ReservationError::InsufficientResource {
                    key: key.clone(),
                    requested: quantity,
                    available,
                })
            }
            Decrement::Missing => Err(ReservationError::ResourceNotFound(key.clone())),
        }
    }

    /// A zero count also closes the gate; a count that is merely smaller than
    /// the request leaves it open for smaller requests.
    fn check_available(&self, key: &ResourceKey, quantity: u64, count: u64) -> Result<(), ReservationError> {
        if count == 0 {
            self.flags.mark_exhausted(key);
        }
        if count == 0 || count < quantity {
            return Err(ReservationError::InsufficientResource {
                key: key.clone(),
                requested: quantity,
                available: count,
            });
        }
        Ok(())
    }

    fn transition(&self, job_id: Uuid, key: &ResourceKey, state: ReservationState) {
        debug!(job_id = %job_id, key = %key, state = %state, "Reservation state");
    }
}
