//! Coordination store abstraction.
//!
//! Admission control needs a handful of atomic key operations from a
//! shared store: set-if-absent with a TTL, compare-and-delete, and plain
//! reads. Anything offering those primitives can back the lock manager
//! and the deduplication service; the in-memory store here backs tests
//! and single-process deployments.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

/// Failure talking to the coordination store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// What went wrong.
    pub message: String,
}

impl StoreError {
    /// Creates a store error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coordination store error: {}", self.message)
    }
}

impl std::error::Error for StoreError {}

/// Atomic key operations required by admission control.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Atomically sets `key` to `value` with a TTL, only if the key is
    /// absent. Returns true if the key was set by this call.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Atomically deletes `key` only if it currently holds `expected`.
    /// Returns true if the key was deleted by this call.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Reads the current value of `key`, if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Deletes `key` unconditionally.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Returns the time left before `key` expires, if the key is present
    /// and has a TTL.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory coordination store with lazy expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(key)
            && !existing.expired()
        {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() && entry.value == expected => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if !entry.expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).and_then(|entry| {
            entry
                .expires_at
                .checked_duration_since(Instant::now())
                .filter(|remaining| !remaining.is_zero())
        }))
    }
}
