//! Job queue abstraction.
//!
//! A queue accepts jobs per [`JobType`] and delivers each one to exactly one
//! invocation of the worker registered for that type, with at most
//! `concurrency` invocations in flight. Lifecycle changes are broadcast as
//! [`JobEvent`]s; nothing in the enqueue path waits for them.

use async_trait::async_trait;
use serde::Serialize;
use shared::{JobEnvelope, JobEvent, JobEventKind, JobType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{JobFailure, QueueError};

const EVENT_CAPACITY: usize = 1024;

#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Returning is the terminal signal: `Ok` completes the job, `Err` fails it.
    async fn handle(&self, job: &JobEnvelope, ctx: &JobContext) -> Result<(), JobFailure>;
}

/// Per-invocation handle a worker uses to report progress.
pub struct JobContext {
    job_id: Uuid,
    job_type: JobType,
    events: broadcast::Sender<JobEvent>,
}

impl JobContext {
    pub fn new(job_id: Uuid, job_type: JobType, events: broadcast::Sender<JobEvent>) -> Self {
        Self { job_id, job_type, events }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn progress(&self, current: u64, total: u64) {
        let _ = self.events.send(JobEvent::new(
            self.job_id,
            self.job_type,
            JobEventKind::Progress { current, total },
        ));
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value) -> Result<Uuid, QueueError>;

    /// Registers the single worker for `job_type`. Jobs enqueued before
    /// registration are delivered once it happens.
    async fn process(
        &self,
        job_type: JobType,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkerHandle, QueueError>;

    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;
}

/// Serializes `job` and enqueues it under `job_type`.
pub async fn submit<T: Serialize>(queue: &dyn JobQueue, job_type: JobType, job: &T) -> Result<Uuid, QueueError> {
    let payload = serde_json::to_value(job)?;
    queue.enqueue(job_type, payload).await
}

/// Runs one delivery to its terminal state and publishes the outcome.
pub async fn execute(
    handler: &dyn JobHandler,
    job: &JobEnvelope,
    events: &broadcast::Sender<JobEvent>,
) -> Result<(), JobFailure> {
    let ctx = JobContext::new(job.id, job.job_type, events.clone());
    let result = handler.handle(job, &ctx).await;

    let event = match &result {
        Ok(()) => JobEvent::completed(job.id, job.job_type),
        Err(failure) => JobEvent::failed(job.id, job.job_type, failure.message.clone(), failure.retryable),
    };
    let _ = events.send(event);

    result
}

pub struct WorkerHandle {
    job_type: JobType,
    task: JoinHandle<()>,
    stop: Option<watch::Sender<bool>>,
}

impl WorkerHandle {
    /// A worker that is stopped by aborting its task.
    pub fn new(job_type: JobType, task: JoinHandle<()>) -> Self {
        Self {
            job_type,
            task,
            stop: None,
        }
    }

    /// A worker whose task exits on its own once `stop` is set.
    pub fn with_stop(job_type: JobType, task: JoinHandle<()>, stop: watch::Sender<bool>) -> Self {
        Self {
            job_type,
            task,
            stop: Some(stop),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    /// Stops dispatching new jobs and waits for the dispatcher to exit.
    /// Invocations already spawned run to completion.
    pub async fn shutdown(self) {
        match &self.stop {
            Some(stop) => {
                let _ = stop.send(true);
            }
            None => self.task.abort(),
        }
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("{} worker exited abnormally: {}", self.job_type, e);
            }
        }
    }
}

struct Lane {
    sender: mpsc::UnboundedSender<JobEnvelope>,
    receiver: Option<mpsc::UnboundedReceiver<JobEnvelope>>,
}

impl Lane {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Some(receiver),
        }
    }
}

type Lanes = Arc<Mutex<HashMap<JobType, Lane>>>;

/// Process-local queue: one unbounded FIFO channel per job type.
///
/// A stopped worker hands its receiver back to the lane, so jobs enqueued
/// while no worker runs wait for the next registration. `close()` simulates a
/// broker outage for subsequent enqueues.
pub struct InMemoryJobQueue {
    lanes: Lanes,
    created: Option<Mutex<Vec<JobEnvelope>>>,
    events: broadcast::Sender<JobEvent>,
    closed: AtomicBool,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            created: None,
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// A queue that also keeps every accepted job for inspection.
    pub fn recording() -> Self {
        Self {
            created: Some(Mutex::new(Vec::new())),
            ..Self::new()
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Jobs accepted so far; always empty unless built with [`recording`].
    ///
    /// [`recording`]: InMemoryJobQueue::recording
    pub async fn created_jobs(&self) -> Vec<JobEnvelope> {
        match &self.created {
            Some(created) => created.lock().await.clone(),
            None => Vec::new(),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("queue is closed".to_string()));
        }

        let job = JobEnvelope::new(job_type, payload);
        let job_id = job.id;
        let recorded = self.created.as_ref().map(|_| job.clone());

        // The lane lock stays held until `Created` is out; the dispatcher takes
        // it before executing, so `Created` always precedes the terminal event.
        let mut lanes = self.lanes.lock().await;
        let lane = lanes.entry(job_type).or_insert_with(Lane::new);
        lane.sender
            .send(job)
            .map_err(|_| QueueError::Unavailable(format!("{} lane dropped", job_type)))?;

        if let (Some(created), Some(job)) = (&self.created, recorded) {
            created.lock().await.push(job);
        }
        let _ = self.events.send(JobEvent::created(job_id, job_type));

        Ok(job_id)
    }

    async fn process(
        &self,
        job_type: JobType,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkerHandle, QueueError> {
        let mut receiver = {
            let mut lanes = self.lanes.lock().await;
            let lane = lanes.entry(job_type).or_insert_with(Lane::new);
            lane.receiver
                .take()
                .ok_or(QueueError::WorkerAlreadyRegistered(job_type))?
        };

        let concurrency = concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let events = self.events.clone();
        let lanes = self.lanes.clone();
        let (stop, mut stopped) = watch::channel(false);

        info!("Processing {} jobs with concurrency {}", job_type, concurrency);

        let task = tokio::spawn(async move {
            loop {
                // Taking the permit before receiving keeps start order FIFO and
                // leaves the next job queued if the worker is stopped meanwhile.
                let permit = tokio::select! {
                    Ok(()) = stopped.changed() => break,
                    permit = semaphore.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                let job = tokio::select! {
                    Ok(()) = stopped.changed() => break,
                    job = receiver.recv() => match job {
                        Some(job) => job,
                        None => break,
                    },
                };

                drop(lanes.lock().await);

                let handler = handler.clone();
                let events = events.clone();
                tokio::spawn(async move {
                    let _ = execute(handler.as_ref(), &job, &events).await;
                    drop(permit);
                });
            }

            if let Some(lane) = lanes.lock().await.get_mut(&job_type) {
                lane.receiver = Some(receiver);
            }
            info!("Stopped processing {} jobs", job_type);
        });

        Ok(WorkerHandle::with_stop(job_type, task, stop))
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

/// Logs every lifecycle event until the channel closes.
pub async fn log_job_events(mut events: broadcast::Receiver<JobEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let label = event.job_type.label();
                match &event.kind {
                    JobEventKind::Created => info!("{} job created: {}", label, event.job_id),
                    JobEventKind::Progress { current, total } => {
                        info!("{} job {} {}% complete", label, event.job_id, percent(*current, *total))
                    }
                    JobEventKind::Completed => info!("{} job {} completed", label, event.job_id),
                    JobEventKind::Failed { error, retryable } => {
                        error!("{} job {} failed: {} (retryable: {})", label, event.job_id, error, retryable)
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Job event logger lagged, skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn percent(current: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    current.saturating_mul(100) / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(50, 100), 50);
        assert_eq!(percent(1, 3), 33);
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let queue = InMemoryJobQueue::recording();
        queue.close();
        let result = queue.enqueue(JobType::ReserveSeat, serde_json::json!({})).await;
        assert!(matches!(result, Err(QueueError::Unavailable(_))));
        assert!(queue.created_jobs().await.is_empty());
    }
}
