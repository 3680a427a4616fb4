use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;

pub const SEATS_KEY: &str = "available_seats";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ReserveSeat,
    ReserveProduct,
    PushNotificationCode,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::ReserveSeat => "reserve_seat",
            JobType::ReserveProduct => "reserve_product",
            JobType::PushNotificationCode => "push_notification_code",
        }
    }

    /// Human readable label used in lifecycle log lines.
    pub fn label(&self) -> &'static str {
        match self {
            JobType::ReserveSeat => "Seat reservation",
            JobType::ReserveProduct => "Stock reservation",
            JobType::PushNotificationCode => "Notification",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one reservable pool, e.g. `available_seats` or `item.3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn seats() -> Self {
        Self(SEATS_KEY.to_string())
    }

    pub fn item(item_id: u32) -> Self {
        Self(format!("item.{}", item_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope the queue wraps around every payload. `id` and `created_at`
/// are assigned at enqueue time and never change afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl JobEnvelope {
    pub fn new(job_type: JobType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

fn default_quantity() -> u64 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationJob {
    pub resource_key: ResourceKey,
    #[serde(default = "default_quantity")]
    pub requested_quantity: u64,
}

impl ReservationJob {
    pub fn new(resource_key: ResourceKey) -> Self {
        Self {
            resource_key,
            requested_quantity: default_quantity(),
        }
    }

    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.requested_quantity = quantity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub phone_number: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub item_id: u32,
    pub item_name: String,
    pub price: u32,
    pub initial_available_quantity: u64,
}

impl Product {
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::item(self.item_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobEventKind {
    Created,
    Progress { current: u64, total: u64 },
    Completed,
    Failed { error: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub job_type: JobType,
    pub kind: JobEventKind,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(job_id: Uuid, job_type: JobType, kind: JobEventKind) -> Self {
        Self {
            job_id,
            job_type,
            kind,
            at: Utc::now(),
        }
    }

    pub fn created(job_id: Uuid, job_type: JobType) -> Self {
        Self::new(job_id, job_type, JobEventKind::Created)
    }

    pub fn completed(job_id: Uuid, job_type: JobType) -> Self {
        Self::new(job_id, job_type, JobEventKind::Completed)
    }

    pub fn failed(job_id: Uuid, job_type: JobType, error: String, retryable: bool) -> Self {
        Self::new(job_id, job_type, JobEventKind::Failed { error, retryable })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, JobEventKind::Completed | JobEventKind::Failed { .. })
    }
}
