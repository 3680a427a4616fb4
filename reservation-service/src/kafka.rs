use async_trait::async_trait;
use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Message, Offset, TopicPartitionList};
use shared::{JobEnvelope, JobEvent, JobType};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{execute, JobHandler, JobQueue, WorkerHandle};

const EVENT_CAPACITY: usize = 1024;

/// Kafka-backed queue: one topic per job type, JSON envelopes keyed by job id.
///
/// Offsets are committed only after the handler reached a terminal state, so
/// a job interrupted by a restart is redelivered (at-least-once). With
/// concurrency above 1 the committed offset never passes a message that is
/// still in flight, see [`OffsetTracker`].
pub struct KafkaJobQueue {
    producer: FutureProducer,
    brokers: String,
    group_id: String,
    topic_prefix: String,
    events: broadcast::Sender<JobEvent>,
}

impl KafkaJobQueue {
    pub fn new(brokers: &str, group_id: &str, topic_prefix: &str) -> Result<Self, QueueError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| QueueError::Unavailable(format!("Failed to create producer: {}", e)))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            producer,
            brokers: brokers.to_string(),
            group_id: group_id.to_string(),
            topic_prefix: topic_prefix.to_string(),
            events,
        })
    }

    pub fn topic(&self, job_type: JobType) -> String {
        format!("{}{}", self.topic_prefix, job_type)
    }

    fn consumer(&self, job_type: JobType) -> Result<StreamConsumer, QueueError> {
        ClientConfig::new()
            .set("group.id", format!("{}-{}", self.group_id, job_type))
            .set("bootstrap.servers", &self.brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| QueueError::Unavailable(format!("Failed to create consumer: {}", e)))
    }
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    highest_done: Option<i64>,
    committed: Option<i64>,
}

/// Commit positions for out-of-order completion.
///
/// Per partition, the position to commit is the lowest offset still in flight,
/// or one past the highest finished offset once nothing is in flight.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

impl OffsetTracker {
    /// Messages must be started in the order the consumer delivers them.
    pub fn start(&mut self, partition: i32, offset: i64) {
        self.partitions.entry(partition).or_default().in_flight.insert(offset);
    }

    /// Marks `offset` finished and returns the new commit position, if it advanced.
    pub fn finish(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.entry(partition).or_default();
        state.in_flight.remove(&offset);
        state.highest_done = state.highest_done.max(Some(offset));

        let next = match state.in_flight.first() {
            Some(&lowest) => lowest,
            None => state.highest_done? + 1,
        };
        if state.committed.is_some_and(|committed| committed >= next) {
            return None;
        }
        state.committed = Some(next);
        Some(next)
    }
}

fn commit(consumer: &StreamConsumer, topic: &str, partition: i32, next: i64) {
    let mut positions = TopicPartitionList::new();
    let result = positions
        .add_partition_offset(topic, partition, Offset::Offset(next))
        .and_then(|()| consumer.commit(&positions, CommitMode::Async));
    if let Err(e) = result {
        error!("Error committing {}[{}] at {}: {}", topic, partition, next, e);
    }
}

fn decode(message: &BorrowedMessage<'_>) -> Option<JobEnvelope> {
    match message.payload_view::<str>() {
        Some(Ok(json_str)) => match serde_json::from_str::<JobEnvelope>(json_str) {
            Ok(job) => Some(job),
            Err(e) => {
                error!("Error decoding job envelope: {}", e);
                None
            }
        },
        Some(Err(e)) => {
            error!("Error parsing payload: {}", e);
            None
        }
        None => {
            warn!("Skipping message without payload");
            None
        }
    }
}

#[async_trait]
impl JobQueue for KafkaJobQueue {
    async fn enqueue(&self, job_type: JobType, payload: serde_json::Value) -> Result<Uuid, QueueError> {
        let job = JobEnvelope::new(job_type, payload);
        let json = serde_json::to_string(&job)?;
        let key = job.id.to_string();
        let topic = self.topic(job_type);
        let record = FutureRecord::to(&topic).payload(&json).key(&key);

        self.producer
            .send(record, Duration::from_secs(5))
            .await
            .map_err(|(e, _)| QueueError::Unavailable(format!("Failed to enqueue job: {}", e)))?;

        let _ = self.events.send(JobEvent::created(job.id, job_type));
        Ok(job.id)
    }

    async fn process(
        &self,
        job_type: JobType,
        concurrency: usize,
        handler: Arc<dyn JobHandler>,
    ) -> Result<WorkerHandle, QueueError> {
        let consumer = self.consumer(job_type)?;
        let topic = self.topic(job_type);
        consumer
            .subscribe(&[&topic])
            .map_err(|e| QueueError::Unavailable(format!("Failed to subscribe to {}: {}", topic, e)))?;

        let concurrency = concurrency.max(1);
        let events = self.events.clone();

        info!("Processing {} jobs from {} with concurrency {}", job_type, topic, concurrency);

        let task = tokio::spawn(async move {
            let consumer = &consumer;
            let tracker = &Mutex::new(OffsetTracker::default());
            consumer
                .stream()
                .for_each_concurrent(concurrency, |message| {
                    if let Ok(m) = &message {
                        let mut tracker = tracker.lock().unwrap_or_else(PoisonError::into_inner);
                        tracker.start(m.partition(), m.offset());
                    }
                    let handler = handler.clone();
                    let events = events.clone();
                    async move {
                        match message {
                            Ok(m) => {
                                if let Some(job) = decode(&m) {
                                    if job.job_type != job_type {
                                        warn!("Job {} of type {} found on {} topic", job.id, job.job_type, job_type);
                                    } else {
                                        let _ = execute(handler.as_ref(), &job, &events).await;
                                    }
                                }
                                let next = tracker
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .finish(m.partition(), m.offset());
                                if let Some(next) = next {
                                    commit(consumer, m.topic(), m.partition(), next);
                                }
                            }
                            Err(e) => error!("Error receiving message: {}", e),
                        }
                    }
                })
                .await;
        });

        Ok(WorkerHandle::new(job_type, task))
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_message_finishing_first_does_not_commit_past_earlier_one() {
        let mut tracker = OffsetTracker::default();
        tracker.start(0, 5);
        tracker.start(0, 6);

        assert_eq!(tracker.finish(0, 6), Some(5));
        assert_eq!(tracker.finish(0, 5), Some(7));
    }

    #[test]
    fn commit_position_only_moves_forward() {
        let mut tracker = OffsetTracker::default();
        tracker.start(0, 5);
        assert_eq!(tracker.finish(0, 5), Some(6));

        tracker.start(0, 6);
        tracker.start(0, 7);
        assert_eq!(tracker.finish(0, 7), None);
        assert_eq!(tracker.finish(0, 6), Some(8));
    }

    #[test]
    fn partitions_are_tracked_independently() {
        let mut tracker = OffsetTracker::default();
        tracker.start(0, 10);
        tracker.start(1, 3);

        assert_eq!(tracker.finish(1, 3), Some(4));
        assert_eq!(tracker.finish(0, 10), Some(11));
    }
}
