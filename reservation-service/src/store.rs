//! Counter store client.
//!
//! One non-negative integer per [`ResourceKey`], persisted by an external
//! key-value backend as a decimal string. Every call is a single round trip;
//! nothing is cached locally, so each read observes the latest write.

use async_trait::async_trait;
use shared::ResourceKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use crate::error::StoreError;

/// Result of an atomic conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decrement {
    Applied { previous: u64, remaining: u64 },
    Insufficient { available: u64 },
    Missing,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// `Ok(None)` means the key was never initialized.
    async fn get_count(&self, key: &ResourceKey) -> Result<Option<u64>, StoreError>;

    async fn set_count(&self, key: &ResourceKey, count: u64) -> Result<(), StoreError>;

    /// Stores that can decrement-if-available in one server-side step return
    /// themselves here. Plain get/set backends keep the default.
    fn atomic_decrement(&self) -> Option<&dyn AtomicDecrement> {
        None
    }
}

#[async_trait]
pub trait AtomicDecrement: Send + Sync {
    /// Subtracts `quantity` only if at least that much remains. A missing key
    /// counts as `initial` when one is given, and is written only if the
    /// decrement applies.
    async fn decrement_if_available(
        &self,
        key: &ResourceKey,
        quantity: u64,
        initial: Option<u64>,
    ) -> Result<Decrement, StoreError>;
}

pub fn parse_count(key: &ResourceKey, raw: &str) -> Result<u64, StoreError> {
    raw.trim().parse::<u64>().map_err(|_| StoreError::InvalidValue {
        key: key.clone(),
        value: raw.to_string(),
    })
}

/// Process-local store used by tests and by the `memory` backend.
///
/// Values are kept as decimal strings to match the wire format of the real
/// backends. `set_available(false)` makes every call fail as if the backend
/// were unreachable.
pub struct InMemoryCounterStore {
    values: Mutex<HashMap<ResourceKey, String>>,
    available: AtomicBool,
    atomic: bool,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            atomic: false,
        }
    }

    /// A store that also offers [`AtomicDecrement`].
    pub fn with_atomic_decrement() -> Self {
        Self {
            atomic: true,
            ..Self::new()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Writes a raw value, bypassing validation.
    pub async fn put_raw(&self, key: &ResourceKey, raw: impl Into<String>) {
        self.values.lock().await.insert(key.clone(), raw.into());
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".to_string()))
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get_count(&self, key: &ResourceKey) -> Result<Option<u64>, StoreError> {
        self.ensure_available()?;
        let values = self.values.lock().await;
        values.get(key).map(|raw| parse_count(key, raw)).transpose()
    }

    async fn set_count(&self, key: &ResourceKey, count: u64) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.values.lock().await.insert(key.clone(), count.to_string());
        Ok(())
    }

    fn atomic_decrement(&self) -> Option<&dyn AtomicDecrement> {
        if self.atomic {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl AtomicDecrement for InMemoryCounterStore {
    async fn decrement_if_available(
        &self,
        key: &ResourceKey,
        quantity: u64,
        initial: Option<u64>,
    ) -> Result<Decrement, StoreError> {
        self.ensure_available()?;
        let mut values = self.values.lock().await;

        let current = match values.get(key) {
            Some(raw) => parse_count(key, raw)?,
            None => match initial {
                Some(initial) => initial,
                None => return Ok(Decrement::Missing),
            },
        };

        if current < quantity || current == 0 {
            return Ok(Decrement::Insufficient { available: current });
        }

        let remaining = current - quantity;
        values.insert(key.clone(), remaining.to_string());
        Ok(Decrement::Applied {
            previous: current,
            remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.get_count(&ResourceKey::seats()).await, Ok(None));
    }

    #[tokio::test]
    async fn set_then_get_returns_written_value() {
        let store = InMemoryCounterStore::new();
        let key = ResourceKey::item(1);
        store.set_count(&key, 3).await.unwrap();
        assert_eq!(store.get_count(&key).await, Ok(Some(3)));
    }

    #[tokio::test]
    async fn garbage_values_are_reported() {
        let store = InMemoryCounterStore::new();
        let key = ResourceKey::seats();
        store.put_raw(&key, "-1").await;
        assert!(matches!(
            store.get_count(&key).await,
            Err(StoreError::InvalidValue { .. })
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = InMemoryCounterStore::new();
        store.set_available(false);
        let key = ResourceKey::seats();
        assert!(matches!(store.get_count(&key).await, Err(StoreError::Unavailable(_))));
        assert!(matches!(store.set_count(&key, 1).await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn atomic_decrement_seeds_missing_keys() {
        let store = InMemoryCounterStore::with_atomic_decrement();
        let key = ResourceKey::item(1);
        let atomic = store.atomic_decrement().expect("atomic support");

        assert_eq!(
            atomic.decrement_if_available(&key, 1, Some(4)).await,
            Ok(Decrement::Applied { previous: 4, remaining: 3 })
        );
        assert_eq!(
            atomic.decrement_if_available(&key, 5, Some(4)).await,
            Ok(Decrement::Insufficient { available: 3 })
        );
        assert_eq!(
            atomic.decrement_if_available(&ResourceKey::item(9), 1, None).await,
            Ok(Decrement::Missing)
        );
        assert_eq!(store.get_count(&key).await, Ok(Some(3)));
    }

    #[tokio::test]
    async fn oversized_request_leaves_missing_key_unwritten() {
        let store = InMemoryCounterStore::with_atomic_decrement();
        let key = ResourceKey::item(3);
        let atomic = store.atomic_decrement().expect("atomic support");

        assert_eq!(
            atomic.decrement_if_available(&key, 5, Some(2)).await,
            Ok(Decrement::Insufficient { available: 2 })
        );
        assert_eq!(store.get_count(&key).await, Ok(None));
    }

    #[test]
    fn plain_store_has_no_atomic_path() {
        assert!(InMemoryCounterStore::new().atomic_decrement().is_none());
    }

    #[test]
    fn parse_count_accepts_padded_decimal() {
        assert_eq!(parse_count(&ResourceKey::seats(), " 49\n"), Ok(49));
    }
}
