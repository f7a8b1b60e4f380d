//! Trigger registrations and the reverse lookup index.
//!
//! When a workflow is deployed, each of its trigger nodes is registered
//! under a normalized index key. An incoming event carries the same kind
//! of key, so finding the workflows to wake is a single map lookup
//! rather than a scan over every deployed workflow.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use switchyard_core::{TriggerId, WorkflowId};
use switchyard_workflow::{Node, NodeId, NodeKind, Workflow};
use tracing::debug;

/// The kind of event a trigger reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Fires on a cron schedule.
    Schedule,
    /// Fires on an HTTP delivery to a path.
    Webhook,
    /// Fires on a chat message in a workspace.
    ChatMessage,
    /// Fires on a push to a repository.
    RepositoryPush,
    /// Fires on mail delivered to an address.
    MailboxMessage,
    /// Fired explicitly by a user; never indexed by key.
    Manual,
}

impl TriggerKind {
    /// Maps a trigger node subtype to its kind.
    #[must_use]
    pub fn from_subtype(subtype: &str) -> Option<Self> {
        match subtype {
            "schedule" => Some(Self::Schedule),
            "webhook" => Some(Self::Webhook),
            "chat_message" => Some(Self::ChatMessage),
            "repository_push" => Some(Self::RepositoryPush),
            "mailbox_message" => Some(Self::MailboxMessage),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }

    /// The configuration key the index key is read from, if this kind
    /// is indexed at all.
    #[must_use]
    pub fn config_key(&self) -> Option<&'static str> {
        match self {
            Self::Schedule => Some("cron"),
            Self::Webhook => Some("path"),
            Self::ChatMessage => Some("workspace"),
            Self::RepositoryPush => Some("repository"),
            Self::MailboxMessage => Some("address"),
            Self::Manual => None,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::ChatMessage => "chat_message",
            Self::RepositoryPush => "repository_push",
            Self::MailboxMessage => "mailbox_message",
            Self::Manual => "manual",
        };
        write!(f, "{name}")
    }
}

/// Deployment state of a registration. Only active registrations match
/// incoming events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    #[default]
    Active,
    Paused,
    Stopped,
}

/// Normalizes a raw key into its canonical indexed form.
///
/// Both registration and lookup go through this, so an event matches a
/// registration regardless of case or stray whitespace differences.
/// Manual triggers are never indexed by key.
#[must_use]
pub fn normalize_index_key(kind: TriggerKind, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    match kind {
        TriggerKind::Manual => None,
        TriggerKind::Schedule => {
            // canonical single-space cron expression
            Some(
                trimmed
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
        TriggerKind::Webhook => {
            let lowered = trimmed.to_ascii_lowercase();
            let with_slash = if lowered.starts_with('/') {
                lowered
            } else {
                format!("/{lowered}")
            };
            let canonical = if with_slash.len() > 1 {
                with_slash.trim_end_matches('/').to_string()
            } else {
                with_slash
            };
            Some(canonical)
        }
        TriggerKind::ChatMessage | TriggerKind::RepositoryPush | TriggerKind::MailboxMessage => {
            Some(trimmed.to_ascii_lowercase())
        }
    }
}

/// One deployed trigger node, registered for reverse lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRegistration {
    /// Unique identifier of this registration.
    pub id: TriggerId,
    /// The workflow the trigger belongs to.
    pub workflow_id: WorkflowId,
    /// The trigger node within the workflow.
    pub node_id: NodeId,
    /// The kind of event this trigger reacts to.
    pub kind: TriggerKind,
    /// Normalized index key, absent for manual triggers.
    pub index_key: Option<String>,
    /// Deployment state.
    pub status: DeploymentStatus,
}

impl TriggerRegistration {
    /// Creates an active registration with a normalized key.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, node_id: NodeId, kind: TriggerKind, raw_key: &str) -> Self {
        Self {
            id: TriggerId::new(),
            workflow_id,
            node_id,
            kind,
            index_key: normalize_index_key(kind, raw_key),
            status: DeploymentStatus::Active,
        }
    }

    /// Builds a registration from a workflow's trigger node, reading the
    /// index key from the node's configuration. Returns `None` for
    /// non-trigger nodes and unknown trigger subtypes.
    #[must_use]
    pub fn from_node(workflow_id: WorkflowId, node: &Node) -> Option<Self> {
        if node.kind != NodeKind::Trigger {
            return None;
        }
        let kind = TriggerKind::from_subtype(node.subtype()?)?;
        let raw_key = kind.config_key().and_then(|key| {
            node.configuration
                .get(key)
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        });
        Some(Self {
            id: TriggerId::new(),
            workflow_id,
            node_id: node.id,
            kind,
            index_key: raw_key.and_then(|raw| normalize_index_key(kind, &raw)),
            status: DeploymentStatus::Active,
        })
    }
}

/// Reverse lookup index over trigger registrations.
#[derive(Debug, Clone, Default)]
pub struct TriggerIndex {
    by_key: HashMap<(TriggerKind, String), Vec<TriggerId>>,
    by_id: HashMap<TriggerId, TriggerRegistration>,
    by_workflow: HashMap<WorkflowId, Vec<TriggerId>>,
}

impl TriggerIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns true if no registrations exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Inserts a registration and returns its ID.
    pub fn insert(&mut self, registration: TriggerRegistration) -> TriggerId {
        let id = registration.id;
        if let Some(key) = &registration.index_key {
            self.by_key
                .entry((registration.kind, key.clone()))
                .or_default()
                .push(id);
        }
        self.by_workflow
            .entry(registration.workflow_id)
            .or_default()
            .push(id);
        debug!(
            trigger_id = %id,
            workflow_id = %registration.workflow_id,
            kind = %registration.kind,
            "registered trigger"
        );
        self.by_id.insert(id, registration);
        id
    }

    /// Registers every trigger node of a workflow and returns the new
    /// registration IDs.
    pub fn index_workflow(&mut self, workflow: &Workflow) -> Vec<TriggerId> {
        workflow
            .trigger_nodes()
            .filter_map(|node| TriggerRegistration::from_node(workflow.id, node))
            .map(|registration| self.insert(registration))
            .collect()
    }

    /// Removes a registration.
    pub fn remove(&mut self, id: TriggerId) -> Option<TriggerRegistration> {
        let registration = self.by_id.remove(&id)?;
        if let Some(key) = &registration.index_key {
            if let Some(ids) = self.by_key.get_mut(&(registration.kind, key.clone())) {
                ids.retain(|candidate| *candidate != id);
                if ids.is_empty() {
                    self.by_key.remove(&(registration.kind, key.clone()));
                }
            }
        }
        if let Some(ids) = self.by_workflow.get_mut(&registration.workflow_id) {
            ids.retain(|candidate| *candidate != id);
            if ids.is_empty() {
                self.by_workflow.remove(&registration.workflow_id);
            }
        }
        Some(registration)
    }

    /// Removes every registration of a workflow, e.g. on undeploy.
    pub fn remove_workflow(&mut self, workflow_id: WorkflowId) -> Vec<TriggerRegistration> {
        let ids = self.by_workflow.get(&workflow_id).cloned().unwrap_or_default();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Updates the deployment status of a registration.
    pub fn set_status(&mut self, id: TriggerId, status: DeploymentStatus) -> bool {
        match self.by_id.get_mut(&id) {
            Some(registration) => {
                registration.status = status;
                true
            }
            None => false,
        }
    }

    /// Looks up a registration by ID.
    #[must_use]
    pub fn get(&self, id: TriggerId) -> Option<&TriggerRegistration> {
        self.by_id.get(&id)
    }

    /// Returns the active registrations matching an incoming event's
    /// kind and raw key. The key is normalized before the lookup.
    #[must_use]
    pub fn matching(&self, kind: TriggerKind, raw_key: &str) -> Vec<&TriggerRegistration> {
        let Some(key) = normalize_index_key(kind, raw_key) else {
            return Vec::new();
        };
        self.by_key
            .get(&(kind, key))
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|registration| registration.status == DeploymentStatus::Active)
            .collect()
    }

    /// Returns the active manual registrations of a workflow, for
    /// explicit user-initiated runs.
    #[must_use]
    pub fn manual(&self, workflow_id: WorkflowId) -> Vec<&TriggerRegistration> {
        self.by_workflow
            .get(&workflow_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .filter(|registration| {
                registration.kind == TriggerKind::Manual
                    && registration.status == DeploymentStatus::Active
            })
            .collect()
    }
}
