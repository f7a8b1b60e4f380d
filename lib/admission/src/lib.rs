//! Distributed admission control for the switchyard execution core.
//!
//! Several instances may receive the same event stream. This crate keeps
//! each event's effect single: a short-lived dedup marker suppresses
//! redeliveries, and a per-workflow distributed lock serializes
//! executions of the same workflow across instances. Both are built on a
//! small atomic key-value abstraction, so any store offering
//! set-if-absent and compare-and-delete can back them.

pub mod controller;
pub mod dedup;
pub mod lock;
pub mod repository;
pub mod store;

pub use controller::{Admission, AdmissionController, RejectReason, TriggerEvent};
pub use dedup::{DedupConfig, DedupStats, DeduplicationService};
pub use lock::{LockConfig, LockError, LockHandle, LockInfo, LockManager, UnavailablePolicy};
pub use repository::{
    ExecutionRepository, MemoryExecutionRepository, MemoryWorkflowRepository, RepositoryError,
    WorkflowRepository,
};
pub use store::{CoordinationStore, MemoryStore, StoreError};
