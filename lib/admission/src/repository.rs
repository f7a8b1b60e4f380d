//! Persistence seams for workflows and executions.
//!
//! Admission control only needs narrow interfaces: fetch a deployed
//! workflow by ID and record finished executions. The in-memory
//! implementations back tests and single-process deployments.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use switchyard_core::{ExecutionId, WorkflowId};
use switchyard_engine::Execution;
use switchyard_workflow::Workflow;
use tokio::sync::RwLock;

/// Failure talking to a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// What went wrong.
    pub message: String,
}

impl RepositoryError {
    /// Creates a repository error with a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository error: {}", self.message)
    }
}

impl std::error::Error for RepositoryError {}

/// Read access to deployed workflow documents.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Fetches a workflow by ID.
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError>;

    /// Stores a workflow, replacing any previous version.
    async fn put(&self, workflow: Workflow) -> Result<(), RepositoryError>;

    /// Removes a workflow.
    async fn remove(&self, id: WorkflowId) -> Result<(), RepositoryError>;
}

/// Storage for execution records.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Records a finished or running execution.
    async fn insert(&self, execution: Execution) -> Result<(), RepositoryError>;

    /// Fetches an execution by ID.
    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError>;

    /// Lists the executions of a workflow, oldest first.
    async fn for_workflow(&self, id: WorkflowId) -> Result<Vec<Execution>, RepositoryError>;
}

/// In-memory workflow repository.
#[derive(Default)]
pub struct MemoryWorkflowRepository {
    workflows: RwLock<HashMap<WorkflowId, Workflow>>,
}

impl MemoryWorkflowRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryWorkflowRepository {
    async fn get(&self, id: WorkflowId) -> Result<Option<Workflow>, RepositoryError> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn put(&self, workflow: Workflow) -> Result<(), RepositoryError> {
        self.workflows.write().await.insert(workflow.id, workflow);
        Ok(())
    }

    async fn remove(&self, id: WorkflowId) -> Result<(), RepositoryError> {
        self.workflows.write().await.remove(&id);
        Ok(())
    }
}

/// In-memory execution repository.
#[derive(Default)]
pub struct MemoryExecutionRepository {
    executions: RwLock<Vec<Execution>>,
}

impl MemoryExecutionRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for MemoryExecutionRepository {
    async fn insert(&self, execution: Execution) -> Result<(), RepositoryError> {
        self.executions.write().await.push(execution);
        Ok(())
    }

    async fn get(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .find(|execution| execution.id == id)
            .cloned())
    }

    async fn for_workflow(&self, id: WorkflowId) -> Result<Vec<Execution>, RepositoryError> {
        Ok(self
            .executions
            .read()
            .await
            .iter()
            .filter(|execution| execution.workflow_id == id)
            .cloned()
            .collect())
    }
}
