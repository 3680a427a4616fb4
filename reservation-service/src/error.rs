use shared::{JobType, ResourceKey};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    #[error("Counter value for {key} is not a non-negative integer: {value:?}")]
    InvalidValue { key: ResourceKey, value: String },
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),

    #[error("Job payload could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("A worker is already registered for {0}")]
    WorkerAlreadyRegistered(JobType),
}

/// Outcome of a reservation that did not reach COMPLETED.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReservationError {
    #[error("Counter store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Not enough {key} available: requested {requested}, available {available}")]
    InsufficientResource {
        key: ResourceKey,
        requested: u64,
        available: u64,
    },

    #[error("Resource not found: {0}")]
    ResourceNotFound(ResourceKey),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(u64),

    #[error("Invalid reservation payload: {0}")]
    InvalidPayload(String),

    #[error("Corrupt counter: {0}")]
    CorruptCount(String),
}

impl ReservationError {
    /// Only transport failures are worth another attempt by the queue backend.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReservationError::StoreUnavailable(_))
    }
}

impl From<StoreError> for ReservationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => ReservationError::StoreUnavailable(err.to_string()),
            StoreError::InvalidValue { .. } => ReservationError::CorruptCount(err.to_string()),
        }
    }
}

/// Terminal failure signal returned by a job handler.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct JobFailure {
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<ReservationError> for JobFailure {
    fn from(err: ReservationError) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_failures_are_retryable() {
        let unavailable = ReservationError::StoreUnavailable("connection refused".into());
        let insufficient = ReservationError::InsufficientResource {
            key: ResourceKey::seats(),
            requested: 1,
            available: 0,
        };
        assert!(JobFailure::from(unavailable).retryable);
        assert!(!JobFailure::from(insufficient).retryable);
        assert!(!ReservationError::ResourceNotFound(ResourceKey::item(9)).is_retryable());
    }

    #[test]
    fn store_errors_become_store_unavailable() {
        let err: ReservationError = StoreError::Unavailable("timeout".into()).into();
        assert!(matches!(err, ReservationError::StoreUnavailable(_)));

        let err: ReservationError = StoreError::InvalidValue {
            key: ResourceKey::seats(),
            value: "NaN".into(),
        }
        .into();
        assert!(matches!(err, ReservationError::CorruptCount(_)));
        assert!(!err.is_retryable());
    }
}
