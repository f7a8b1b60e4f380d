//! Event deduplication.
//!
//! Event sources redeliver: webhooks retry, queues deliver at least
//! once. Every incoming event is checked against a short-lived marker
//! key; the first sight of an event ID claims the marker atomically,
//! later sights find it and are suppressed. Markers expire after the
//! TTL, so storage stays bounded and very late redeliveries are
//! accepted rather than remembered forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::lock::UnavailablePolicy;
use crate::store::CoordinationStore;

const DEDUP_PREFIX: &str = "dedup";
const MARKER: &str = "1";

/// Deduplication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// How long an event ID is remembered.
    pub ttl: Duration,
    /// Behavior when the store is unreachable. Dedup defaults to failing
    /// open: a rare double execution beats dropping events wholesale.
    pub on_unavailable: UnavailablePolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            on_unavailable: UnavailablePolicy::FailOpen,
        }
    }
}

/// Counters observed since the service was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DedupStats {
    /// Events checked.
    pub checked: u64,
    /// Events suppressed as duplicates.
    pub duplicates: u64,
    /// Checks that hit a store failure.
    pub store_errors: u64,
}

/// Suppresses redelivered events by marking event IDs in the
/// coordination store.
pub struct DeduplicationService<S> {
    store: Arc<S>,
    config: DedupConfig,
    checked: AtomicU64,
    duplicates: AtomicU64,
    store_errors: AtomicU64,
}

impl<S: CoordinationStore> DeduplicationService<S> {
    /// Creates a service with the default configuration.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, DedupConfig::default())
    }

    /// Creates a service with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<S>, config: DedupConfig) -> Self {
        Self {
            store,
            config,
            checked: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    fn storage_key(source: &str, event_id: &str) -> String {
        format!("{DEDUP_PREFIX}:{source}:{event_id}")
    }

    /// Checks an event and claims its marker in one atomic step.
    ///
    /// Returns false the first time a `(source, event_id)` pair is seen
    /// within the TTL and true for every later sight. On store failure
    /// the configured policy decides: fail-open treats the event as
    /// fresh, fail-closed suppresses it.
    pub async fn is_duplicate(&self, source: &str, event_id: &str) -> bool {
        self.checked.fetch_add(1, Ordering::Relaxed);
        let key = Self::storage_key(source, event_id);
        match self
            .store
            .set_if_absent(&key, MARKER, self.config.ttl)
            .await
        {
            Ok(true) => false,
            Ok(false) => {
                debug!(source, event_id, "duplicate event suppressed");
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!(source, event_id, error = %e, "dedup store unavailable");
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                match self.config.on_unavailable {
                    UnavailablePolicy::FailOpen => false,
                    UnavailablePolicy::FailClosed => true,
                }
            }
        }
    }

    /// Drops the marker for an event, allowing it to be admitted again.
    /// Best-effort: a store failure leaves the marker to its TTL.
    pub async fn forget(&self, source: &str, event_id: &str) {
        let key = Self::storage_key(source, event_id);
        if let Err(e) = self.store.remove(&key).await {
            warn!(source, event_id, error = %e, "failed to drop dedup marker");
        }
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            checked: self.checked.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CoordinationStore for DownStore {
        async fn set_if_absent(
            &self,
            _key: &str,
            _value: &str,
            _ttl: Duration,
        ) -> Result<bool, StoreError> {
            Err(StoreError::new("connection refused"))
        }

        async fn compare_and_delete(
            &self,
            _key: &str,
            _expected: &str,
        ) -> Result<bool, StoreError> {
            Err(StoreError::new("connection refused"))
        }

        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::new("connection refused"))
        }

        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::new("connection refused"))
        }

        async fn remaining_ttl(&self, _key: &str) -> Result<Option<Duration>, StoreError> {
            Err(StoreError::new("connection refused"))
        }
    }

    #[tokio::test]
    async fn first_sight_is_fresh_second_is_duplicate() {
        let dedup = DeduplicationService::new(Arc::new(MemoryStore::new()));
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
        assert!(dedup.is_duplicate("webhook", "evt-1").await);

        let stats = dedup.stats();
        assert_eq!(stats.checked, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.store_errors, 0);
    }

    #[tokio::test]
    async fn sources_are_separate_namespaces() {
        let dedup = DeduplicationService::new(Arc::new(MemoryStore::new()));
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
        assert!(!dedup.is_duplicate("mailbox", "evt-1").await);
    }

    #[tokio::test]
    async fn markers_expire_after_ttl() {
        let dedup = DeduplicationService::with_config(
            Arc::new(MemoryStore::new()),
            DedupConfig {
                ttl: Duration::from_millis(0),
                on_unavailable: UnavailablePolicy::FailOpen,
            },
        );
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
    }

    #[tokio::test]
    async fn forget_allows_readmission() {
        let dedup = DeduplicationService::new(Arc::new(MemoryStore::new()));
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
        dedup.forget("webhook", "evt-1").await;
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
    }

    #[tokio::test]
    async fn store_failure_fails_open_by_default() {
        let dedup = DeduplicationService::new(Arc::new(DownStore));
        assert!(!dedup.is_duplicate("webhook", "evt-1").await);
        assert_eq!(dedup.stats().store_errors, 1);
    }

    #[tokio::test]
    async fn store_failure_can_fail_closed() {
        let dedup = DeduplicationService::with_config(
            Arc::new(DownStore),
            DedupConfig {
                ttl: Duration::from_secs(300),
                on_unavailable: UnavailablePolicy::FailClosed,
            },
        );
        assert!(dedup.is_duplicate("webhook", "evt-1").await);
    }
}
