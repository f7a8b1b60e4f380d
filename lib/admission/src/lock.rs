//! Distributed workflow locks.
//!
//! A lock is a store key holding a unique ownership token with a TTL.
//! Acquisition is a single atomic set-if-absent, so exactly one
//! contender wins; release is compare-and-delete against the token, so
//! a holder whose lock already expired cannot delete a successor's
//! lock. The TTL bounds how long a crashed holder can block others.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::store::{CoordinationStore, StoreError};

const LOCK_PREFIX: &str = "workflow_lock";

/// What to do when the coordination store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Proceed as if the operation allowed the caller through.
    FailOpen,
    /// Refuse the operation.
    #[default]
    FailClosed,
}

/// Lock manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long an acquired lock lives before the store expires it.
    pub ttl: Duration,
    /// Base delay between acquisition attempts; doubles per retry.
    pub retry_delay: Duration,
    /// Total acquisition attempts before giving up.
    pub max_attempts: u32,
    /// Behavior when the store is unreachable. Locks default to failing
    /// closed: without the store there is no mutual exclusion.
    pub on_unavailable: UnavailablePolicy,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(50),
            max_attempts: 5,
            on_unavailable: UnavailablePolicy::FailClosed,
        }
    }
}

/// Proof of lock ownership. Only the holder of the token can release
/// the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// The logical key the lock was taken on.
    pub key: String,
    /// Unique ownership token.
    pub token: String,
}

/// Observed state of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockInfo {
    /// The ownership token currently holding the lock.
    pub holder: String,
    /// Time left before the store expires the lock.
    pub remaining: Option<Duration>,
}

/// Failure acquiring or releasing a lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The coordination store is unreachable and the policy fails
    /// closed.
    Unavailable { source: StoreError },
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { source } => write!(f, "lock store unavailable: {source}"),
        }
    }
}

impl std::error::Error for LockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unavailable { source } => Some(source),
        }
    }
}

/// Manages per-workflow distributed locks over a coordination store.
pub struct LockManager<S> {
    store: Arc<S>,
    config: LockConfig,
}

impl<S: CoordinationStore> LockManager<S> {
    /// Creates a lock manager with the default configuration.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, LockConfig::default())
    }

    /// Creates a lock manager with an explicit configuration.
    #[must_use]
    pub fn with_config(store: Arc<S>, config: LockConfig) -> Self {
        Self { store, config }
    }

    fn storage_key(key: &str) -> String {
        format!("{LOCK_PREFIX}:{key}")
    }

    /// Delay before the next attempt. Saturates so a large attempt count
    /// or delay cannot overflow.
    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .retry_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Tries to acquire the lock for a key, retrying with exponential
    /// backoff while it is contended.
    ///
    /// Returns `None` when the lock is still held by someone else after
    /// every attempt. Store failures follow the configured policy:
    /// fail-closed returns an error, fail-open returns a handle that
    /// grants passage without mutual exclusion.
    pub async fn acquire(&self, key: &str) -> Result<Option<LockHandle>, LockError> {
        let storage_key = Self::storage_key(key);
        let token = Ulid::new().to_string();

        for attempt in 0..self.config.max_attempts {
            match self
                .store
                .set_if_absent(&storage_key, &token, self.config.ttl)
                .await
            {
                Ok(true) => {
                    debug!(key, attempt, "lock acquired");
                    return Ok(Some(LockHandle {
                        key: key.to_string(),
                        token,
                    }));
                }
                Ok(false) => {
                    if attempt + 1 < self.config.max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
                Err(source) => {
                    warn!(key, error = %source, "lock store unavailable");
                    return match self.config.on_unavailable {
                        UnavailablePolicy::FailClosed => Err(LockError::Unavailable { source }),
                        UnavailablePolicy::FailOpen => Ok(Some(LockHandle {
                            key: key.to_string(),
                            token,
                        })),
                    };
                }
            }
        }
        debug!(key, "lock contended after all attempts");
        Ok(None)
    }

    /// Releases a lock. Returns false when the lock was no longer held
    /// by this handle, e.g. after TTL expiry and reacquisition by
    /// someone else.
    pub async fn release(&self, handle: &LockHandle) -> Result<bool, LockError> {
        match self
            .store
            .compare_and_delete(&Self::storage_key(&handle.key), &handle.token)
            .await
        {
            Ok(released) => {
                if !released {
                    debug!(key = %handle.key, "lock already expired or taken over");
                }
                Ok(released)
            }
            Err(source) => {
                warn!(key = %handle.key, error = %source, "lock release failed");
                match self.config.on_unavailable {
                    UnavailablePolicy::FailClosed => Err(LockError::Unavailable { source }),
                    // TTL expiry will clean up the key
                    UnavailablePolicy::FailOpen => Ok(false),
                }
            }
        }
    }

    /// Returns true if the key is currently locked by anyone.
    pub async fn is_locked(&self, key: &str) -> Result<bool, LockError> {
        self.store
            .get(&Self::storage_key(key))
            .await
            .map(|value| value.is_some())
            .map_err(|source| LockError::Unavailable { source })
    }

    /// Observes the current holder and remaining TTL of a lock.
    pub async fn lock_info(&self, key: &str) -> Result<Option<LockInfo>, LockError> {
        let storage_key = Self::storage_key(key);
        let holder = self
            .store
            .get(&storage_key)
            .await
            .map_err(|source| LockError::Unavailable { source })?;
        let Some(holder) = holder else {
            return Ok(None);
        };
        let remaining = self
            .store
            .remaining_ttl(&storage_key)
            .await
            .map_err(|source| LockError::Unavailable { source })?;
        Ok(Some(LockInfo { holder, remaining }))
    }

    /// Deletes a lock regardless of its holder. Operator escape hatch
    /// for a wedged key.
    pub async fn force_release(&self, key: &str) -> Result<(), LockError> {
        warn!(key, "force releasing lock");
        self.store
            .remove(&Self::storage_key(key))
            .await
            .map_err(|source| LockError::Unavailable { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
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

    fn fast_config() -> LockConfig {
        LockConfig {
            ttl: Duration::from_secs(5),
            retry_delay: Duration::from_millis(1),
            max_attempts: 3,
            on_unavailable: UnavailablePolicy::FailClosed,
        }
    }

    #[tokio::test]
    async fn acquire_then_release_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::with_config(store, fast_config());

        let handle = locks.acquire("wf-1").await.expect("store").expect("lock");
        assert!(locks.is_locked("wf-1").await.expect("store"));
        assert!(locks.release(&handle).await.expect("store"));
        assert!(!locks.is_locked("wf-1").await.expect("store"));
    }

    #[tokio::test]
    async fn second_contender_gives_up_after_retries() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::with_config(store, fast_config());

        let _held = locks.acquire("wf-1").await.expect("store").expect("lock");
        assert_eq!(locks.acquire("wf-1").await.expect("store"), None);
    }

    #[tokio::test]
    async fn concurrent_contenders_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(LockManager::with_config(
            store,
            LockConfig {
                max_attempts: 1,
                ..fast_config()
            },
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            tasks.push(tokio::spawn(
                async move { locks.acquire("wf-1").await },
            ));
        }
        let mut winners = 0;
        for task in tasks {
            if task.await.expect("join").expect("store").is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn stale_handle_cannot_release_a_successor() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::with_config(store, fast_config());

        let first = locks.acquire("wf-1").await.expect("store").expect("lock");
        locks.force_release("wf-1").await.expect("store");
        let _second = locks.acquire("wf-1").await.expect("store").expect("lock");

        assert!(!locks.release(&first).await.expect("store"));
        assert!(locks.is_locked("wf-1").await.expect("store"));
    }

    #[tokio::test]
    async fn lock_info_reports_holder_and_ttl() {
        let store = Arc::new(MemoryStore::new());
        let locks = LockManager::with_config(store, fast_config());

        assert_eq!(locks.lock_info("wf-1").await.expect("store"), None);
        let handle = locks.acquire("wf-1").await.expect("store").expect("lock");
        let info = locks.lock_info("wf-1").await.expect("store").expect("info");
        assert_eq!(info.holder, handle.token);
        assert!(info.remaining.is_some());
    }

    #[test]
    fn backoff_saturates_for_large_attempt_counts() {
        let locks = LockManager::with_config(
            Arc::new(MemoryStore::new()),
            LockConfig {
                retry_delay: Duration::from_secs(1),
                max_attempts: 64,
                ..fast_config()
            },
        );
        assert_eq!(locks.backoff(0), Duration::from_secs(1));
        assert_eq!(locks.backoff(3), Duration::from_secs(8));
        // 2^40 saturates to u32::MAX instead of overflowing
        assert_eq!(locks.backoff(40), Duration::from_secs(u64::from(u32::MAX)));
    }

    #[tokio::test]
    async fn unreachable_store_fails_closed_by_default() {
        let locks = LockManager::new(Arc::new(DownStore));
        let err = locks.acquire("wf-1").await.expect_err("fail closed");
        assert!(matches!(err, LockError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn unreachable_store_can_fail_open() {
        let locks = LockManager::with_config(
            Arc::new(DownStore),
            LockConfig {
                on_unavailable: UnavailablePolicy::FailOpen,
                ..fast_config()
            },
        );
        let handle = locks.acquire("wf-1").await.expect("fail open");
        assert!(handle.is_some());
    }
}
