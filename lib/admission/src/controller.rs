//! The admission controller.
//!
//! One incoming event walks a fixed pipeline: deduplicate, look up the
//! candidate workflows in the trigger index, then for each candidate
//! take the workflow's distributed lock, execute, persist the record,
//! and release the lock. Several controller instances can ingest the
//! same event stream concurrently; the dedup marker and the lock keep
//! each event's effect single.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchyard_core::{ExecutionId, TriggerId, WorkflowId};
use switchyard_engine::ExecutionEngine;
use switchyard_scheduler::{TriggerIndex, TriggerKind};
use switchyard_workflow::{NodeId, Workflow};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dedup::{DedupConfig, DeduplicationService};
use crate::lock::{LockConfig, LockManager};
use crate::repository::{ExecutionRepository, RepositoryError, WorkflowRepository};
use crate::store::CoordinationStore;

/// An event arriving from the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// The kind of trigger this event addresses.
    pub kind: TriggerKind,
    /// The raw routing key, e.g. a webhook path or a cron expression.
    pub key: String,
    /// Where the event came from; namespaces the event ID.
    pub source: String,
    /// Delivery-stable identifier of the event. Redeliveries reuse it.
    pub event_id: String,
    /// The event payload handed to fired triggers.
    pub payload: JsonValue,
}

impl TriggerEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(
        kind: TriggerKind,
        key: impl Into<String>,
        source: impl Into<String>,
        event_id: impl Into<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            kind,
            key: key.into(),
            source: source.into(),
            event_id: event_id.into(),
            payload,
        }
    }
}

/// Why an event was not admitted for a workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// The event was already seen within the dedup window.
    Duplicate,
    /// No active trigger registration matched the event.
    NoTriggerMatch,
    /// The workflow's lock was held throughout every attempt.
    LockContended,
    /// The registered workflow no longer exists.
    WorkflowMissing,
    /// The execution plan could not be built.
    PlanningFailed { message: String },
    /// A backing service failed.
    Internal { message: String },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "duplicate event"),
            Self::NoTriggerMatch => write!(f, "no matching trigger"),
            Self::LockContended => write!(f, "workflow lock contended"),
            Self::WorkflowMissing => write!(f, "workflow missing"),
            Self::PlanningFailed { message } => write!(f, "planning failed: {message}"),
            Self::Internal { message } => write!(f, "internal failure: {message}"),
        }
    }
}

/// Outcome of admitting one event for one candidate workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The event was admitted and an execution was recorded.
    Admitted {
        workflow_id: WorkflowId,
        execution_id: ExecutionId,
    },
    /// The event was not admitted.
    Rejected {
        workflow_id: Option<WorkflowId>,
        reason: RejectReason,
    },
}

impl Admission {
    fn rejected(workflow_id: Option<WorkflowId>, reason: RejectReason) -> Self {
        Self::Rejected {
            workflow_id,
            reason,
        }
    }
}

/// Admits trigger events into workflow executions.
pub struct AdmissionController<S, W, E> {
    index: RwLock<TriggerIndex>,
    locks: LockManager<S>,
    dedup: DeduplicationService<S>,
    workflows: Arc<W>,
    executions: Arc<E>,
    engine: Arc<ExecutionEngine>,
}

impl<S, W, E> AdmissionController<S, W, E>
where
    S: CoordinationStore,
    W: WorkflowRepository,
    E: ExecutionRepository,
{
    /// Creates a controller with default lock and dedup configuration.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        workflows: Arc<W>,
        executions: Arc<E>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self::with_config(
            store,
            workflows,
            executions,
            engine,
            LockConfig::default(),
            DedupConfig::default(),
        )
    }

    /// Creates a controller with explicit lock and dedup configuration.
    #[must_use]
    pub fn with_config(
        store: Arc<S>,
        workflows: Arc<W>,
        executions: Arc<E>,
        engine: Arc<ExecutionEngine>,
        lock_config: LockConfig,
        dedup_config: DedupConfig,
    ) -> Self {
        Self {
            index: RwLock::new(TriggerIndex::new()),
            locks: LockManager::with_config(store.clone(), lock_config),
            dedup: DeduplicationService::with_config(store, dedup_config),
            workflows,
            executions,
            engine,
        }
    }

    /// Stores a workflow and registers its trigger nodes.
    pub async fn deploy(&self, workflow: Workflow) -> Result<Vec<TriggerId>, RepositoryError> {
        let workflow_id = workflow.id;
        let triggers: Vec<_> = {
            let mut index = self.index.write().await;
            index.index_workflow(&workflow)
        };
        self.workflows.put(workflow).await?;
        info!(workflow_id = %workflow_id, triggers = triggers.len(), "workflow deployed");
        Ok(triggers)
    }

    /// Removes a workflow and every trigger registration pointing at it.
    pub async fn undeploy(&self, workflow_id: WorkflowId) -> Result<(), RepositoryError> {
        self.index.write().await.remove_workflow(workflow_id);
        self.workflows.remove(workflow_id).await?;
        info!(workflow_id = %workflow_id, "workflow undeployed");
        Ok(())
    }

    /// Gives mutable access to the trigger index, e.g. to pause a
    /// registration.
    pub async fn with_index<R>(&self, f: impl FnOnce(&mut TriggerIndex) -> R) -> R {
        let mut index = self.index.write().await;
        f(&mut index)
    }

    /// Ingests one event: deduplicates it, finds the matching workflows,
    /// and admits each one under its lock. Returns one admission per
    /// candidate, or a single rejection when the event goes nowhere.
    pub async fn ingest(&self, event: TriggerEvent) -> Vec<Admission> {
        if self.dedup.is_duplicate(&event.source, &event.event_id).await {
            return vec![Admission::rejected(None, RejectReason::Duplicate)];
        }

        let candidates: Vec<(WorkflowId, NodeId)> = {
            let index = self.index.read().await;
            index
                .matching(event.kind, &event.key)
                .into_iter()
                .map(|registration| (registration.workflow_id, registration.node_id))
                .collect()
        };
        if candidates.is_empty() {
            return vec![Admission::rejected(None, RejectReason::NoTriggerMatch)];
        }

        let mut admissions = Vec::with_capacity(candidates.len());
        for (workflow_id, node_id) in candidates {
            admissions.push(self.admit(workflow_id, node_id, event.payload.clone()).await);
        }
        admissions
    }

    /// Runs a workflow's manual trigger on behalf of a user. Manual runs
    /// skip deduplication.
    pub async fn run_manual(&self, workflow_id: WorkflowId, payload: JsonValue) -> Admission {
        let node_id = {
            let index = self.index.read().await;
            index
                .manual(workflow_id)
                .first()
                .map(|registration| registration.node_id)
        };
        match node_id {
            Some(node_id) => self.admit(workflow_id, node_id, payload).await,
            None => Admission::rejected(Some(workflow_id), RejectReason::NoTriggerMatch),
        }
    }

    /// Admits one workflow under its distributed lock.
    async fn admit(&self, workflow_id: WorkflowId, node_id: NodeId, payload: JsonValue) -> Admission {
        let lock_key = workflow_id.to_string();
        let handle = match self.locks.acquire(&lock_key).await {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                return Admission::rejected(Some(workflow_id), RejectReason::LockContended);
            }
            Err(e) => {
                return Admission::rejected(
                    Some(workflow_id),
                    RejectReason::Internal {
                        message: e.to_string(),
                    },
                );
            }
        };

        let admission = self.admit_locked(workflow_id, node_id, payload).await;

        if let Err(e) = self.locks.release(&handle).await {
            warn!(workflow_id = %workflow_id, error = %e, "failed to release workflow lock");
        }
        admission
    }

    async fn admit_locked(
        &self,
        workflow_id: WorkflowId,
        node_id: NodeId,
        payload: JsonValue,
    ) -> Admission {
        let workflow = match self.workflows.get(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                return Admission::rejected(Some(workflow_id), RejectReason::WorkflowMissing);
            }
            Err(e) => {
                return Admission::rejected(
                    Some(workflow_id),
                    RejectReason::Internal {
                        message: e.to_string(),
                    },
                );
            }
        };

        let execution = match self
            .engine
            .execute(&workflow, &[node_id], payload, CancellationToken::new())
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                warn!(workflow_id = %workflow_id, error = %e, "execution plan rejected");
                return Admission::rejected(
                    Some(workflow_id),
                    RejectReason::PlanningFailed {
                        message: e.to_string(),
                    },
                );
            }
        };

        let execution_id = execution.id;
        // The execution already happened; a lost record is logged, not
        // turned into a rejection.
        if let Err(e) = self.executions.insert(execution).await {
            warn!(execution_id = %execution_id, error = %e, "failed to persist execution");
        }
        info!(workflow_id = %workflow_id, execution_id = %execution_id, "event admitted");
        Admission::Admitted {
            workflow_id,
            execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::UnavailablePolicy;
    use crate::repository::{MemoryExecutionRepository, MemoryWorkflowRepository};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::time::Duration;
    use switchyard_workflow::{Connection, Node, NodeKind, Port};

    fn webhook_workflow(path: &str) -> Workflow {
        let mut workflow = Workflow::new("hooked");
        let t = workflow.add_node(
            Node::new("hook", NodeKind::Trigger)
                .with_subtype("webhook")
                .with_parameter("path", json!(path))
                .with_output(Port::main()),
        );
        let a = workflow.add_node(
            Node::new("work", NodeKind::Action)
                .with_subtype("transform")
                .with_parameter("script", json!("fn convert(input) { input }"))
                .with_input(Port::main())
                .with_output(Port::main()),
        );
        workflow.connect(Connection::between(t, a));
        workflow
    }

    fn manual_workflow() -> Workflow {
        let mut workflow = Workflow::new("button");
        workflow.add_node(
            Node::new("button", NodeKind::Trigger)
                .with_subtype("manual")
                .with_output(Port::main()),
        );
        workflow
    }

    struct Harness {
        store: Arc<MemoryStore>,
        workflows: Arc<MemoryWorkflowRepository>,
        executions: Arc<MemoryExecutionRepository>,
        controller:
            AdmissionController<MemoryStore, MemoryWorkflowRepository, MemoryExecutionRepository>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let workflows = Arc::new(MemoryWorkflowRepository::new());
        let executions = Arc::new(MemoryExecutionRepository::new());
        let controller = AdmissionController::with_config(
            store.clone(),
            workflows.clone(),
            executions.clone(),
            Arc::new(ExecutionEngine::with_defaults()),
            LockConfig {
                ttl: Duration::from_secs(5),
                retry_delay: Duration::from_millis(1),
                max_attempts: 2,
                on_unavailable: UnavailablePolicy::FailClosed,
            },
            DedupConfig::default(),
        );
        Harness {
            store,
            workflows,
            executions,
            controller,
        }
    }

    fn webhook_event(event_id: &str) -> TriggerEvent {
        TriggerEvent::new(
            TriggerKind::Webhook,
            "/orders",
            "webhook",
            event_id,
            json!({"order": 7}),
        )
    }

    #[tokio::test]
    async fn double_delivery_admits_exactly_once() {
        let h = harness();
        let workflow = webhook_workflow("/orders");
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");

        let first = h.controller.ingest(webhook_event("evt-1")).await;
        assert!(
            matches!(first.as_slice(), [Admission::Admitted { workflow_id: w, .. }] if *w == workflow_id)
        );

        let second = h.controller.ingest(webhook_event("evt-1")).await;
        assert_eq!(
            second,
            vec![Admission::rejected(None, RejectReason::Duplicate)]
        );

        let recorded = h.executions.for_workflow(workflow_id).await.expect("list");
        assert_eq!(recorded.len(), 1);
    }

    #[tokio::test]
    async fn unmatched_event_is_rejected() {
        let h = harness();
        h.controller
            .deploy(webhook_workflow("/orders"))
            .await
            .expect("deploy");

        let admissions = h
            .controller
            .ingest(TriggerEvent::new(
                TriggerKind::Webhook,
                "/unknown",
                "webhook",
                "evt-1",
                json!({}),
            ))
            .await;
        assert_eq!(
            admissions,
            vec![Admission::rejected(None, RejectReason::NoTriggerMatch)]
        );
    }

    #[tokio::test]
    async fn shared_key_fans_out_to_every_workflow() {
        let h = harness();
        let first = webhook_workflow("/orders");
        let second = webhook_workflow("/orders");
        h.controller.deploy(first).await.expect("deploy");
        h.controller.deploy(second).await.expect("deploy");

        let admissions = h.controller.ingest(webhook_event("evt-1")).await;
        assert_eq!(admissions.len(), 2);
        assert!(
            admissions
                .iter()
                .all(|a| matches!(a, Admission::Admitted { .. }))
        );
    }

    #[tokio::test]
    async fn held_lock_rejects_the_event() {
        let h = harness();
        let workflow = webhook_workflow("/orders");
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");

        // Another process holds the workflow lock.
        let other = LockManager::new(h.store.clone());
        let _held = other
            .acquire(&workflow_id.to_string())
            .await
            .expect("store")
            .expect("lock");

        let admissions = h.controller.ingest(webhook_event("evt-1")).await;
        assert_eq!(
            admissions,
            vec![Admission::rejected(
                Some(workflow_id),
                RejectReason::LockContended
            )]
        );
    }

    #[tokio::test]
    async fn lock_is_released_after_admission() {
        let h = harness();
        let workflow = webhook_workflow("/orders");
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");

        h.controller.ingest(webhook_event("evt-1")).await;

        let probe = LockManager::new(h.store.clone());
        assert!(!probe.is_locked(&workflow_id.to_string()).await.expect("store"));
    }

    #[tokio::test]
    async fn missing_workflow_is_rejected() {
        let h = harness();
        let workflow = webhook_workflow("/orders");
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");
        h.workflows.remove(workflow_id).await.expect("remove");

        let admissions = h.controller.ingest(webhook_event("evt-1")).await;
        assert_eq!(
            admissions,
            vec![Admission::rejected(
                Some(workflow_id),
                RejectReason::WorkflowMissing
            )]
        );
    }

    #[tokio::test]
    async fn manual_run_admits_without_dedup() {
        let h = harness();
        let workflow = manual_workflow();
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");

        for _ in 0..2 {
            let admission = h.controller.run_manual(workflow_id, json!({})).await;
            assert!(matches!(admission, Admission::Admitted { .. }));
        }
        let recorded = h.executions.for_workflow(workflow_id).await.expect("list");
        assert_eq!(recorded.len(), 2);
    }

    #[tokio::test]
    async fn undeploy_stops_matching() {
        let h = harness();
        let workflow = webhook_workflow("/orders");
        let workflow_id = workflow.id;
        h.controller.deploy(workflow).await.expect("deploy");
        h.controller.undeploy(workflow_id).await.expect("undeploy");

        let admissions = h.controller.ingest(webhook_event("evt-1")).await;
        assert_eq!(
            admissions,
            vec![Admission::rejected(None, RejectReason::NoTriggerMatch)]
        );
    }
}
