//! Workflow persistence.
//!
//! The [`WorkflowStore`] trait is the authority for workflow state: every
//! editing tool re-reads the record before staging and commits through a
//! transactional read-modify-write, so concurrent turns editing the same
//! workflow serialize here. The in-memory implementation backs tests and
//! single-process deployments; production deployments supply their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Edge, Node, OutputSpec, Variable};

/// A persisted workflow row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub workflow_id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    pub is_draft: bool,
    pub output_type: String,
    #[serde(default)]
    pub validation_score: f64,
    #[serde(default)]
    pub validation_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Create an empty draft workflow owned by `user_id`.
    pub fn new_draft(
        workflow_id: impl Into<String>,
        user_id: impl Into<String>,
        name: impl Into<String>,
        output_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            user_id: user_id.into(),
            name: name.into(),
            description: String::new(),
            domain: None,
            tags: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Vec::new(),
            outputs: Vec::new(),
            is_draft: true,
            output_type: output_type.into(),
            validation_score: 0.0,
            validation_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Store-level failures surfaced to tools as structured errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// No workflow with the requested id.
    NotFound(String),
    /// The workflow exists but belongs to a different user.
    NotOwned { workflow_id: String, user_id: String },
    /// Backend failure (I/O, serialization, …).
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Workflow not found: {}", id),
            StoreError::NotOwned { workflow_id, user_id } => write!(
                f,
                "Workflow {} does not belong to user {}",
                workflow_id, user_id
            ),
            StoreError::Backend(message) => write!(f, "Workflow store error: {}", message),
        }
    }
}

impl Error for StoreError {}

/// Mutation closure applied inside the store's write transaction.
pub type WorkflowMutation = Box<dyn FnOnce(&mut WorkflowRecord) + Send>;

/// Per-conversation workflow persistence authority.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Insert a new record. Fails on id collision.
    async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError>;

    /// Fetch a record by id, enforcing ownership.
    async fn get(&self, workflow_id: &str, user_id: &str) -> Result<WorkflowRecord, StoreError>;

    /// Transactional read-modify-write. The closure runs under the store's
    /// write lock so edits to one workflow are linearized. Ownership is
    /// checked before the closure runs; `updated_at` is bumped after.
    async fn update(
        &self,
        workflow_id: &str,
        user_id: &str,
        mutation: WorkflowMutation,
    ) -> Result<WorkflowRecord, StoreError>;

    /// List all workflows owned by `user_id`.
    async fn list(&self, user_id: &str) -> Result<Vec<WorkflowRecord>, StoreError>;
}

/// In-memory store used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    records: Arc<RwLock<HashMap<String, WorkflowRecord>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, record: WorkflowRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.workflow_id) {
            return Err(StoreError::Backend(format!(
                "Workflow id already exists: {}",
                record.workflow_id
            )));
        }
        records.insert(record.workflow_id.clone(), record);
        Ok(())
    }

    async fn get(&self, workflow_id: &str, user_id: &str) -> Result<WorkflowRecord, StoreError> {
        let records = self.records.read().await;
        let record = records
            .get(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        if record.user_id != user_id {
            return Err(StoreError::NotOwned {
                workflow_id: workflow_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        Ok(record.clone())
    }

    async fn update(
        &self,
        workflow_id: &str,
        user_id: &str,
        mutation: WorkflowMutation,
    ) -> Result<WorkflowRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(workflow_id)
            .ok_or_else(|| StoreError::NotFound(workflow_id.to_string()))?;
        if record.user_id != user_id {
            return Err(StoreError::NotOwned {
                workflow_id: workflow_id.to_string(),
                user_id: user_id.to_string(),
            });
        }
        mutation(record);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<WorkflowRecord>, StoreError> {
        let records = self.records.read().await;
        let mut out: Vec<WorkflowRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ownership_is_enforced() {
        let store = InMemoryWorkflowStore::new();
        store
            .create(WorkflowRecord::new_draft("wf_1", "alice", "Test", "string"))
            .await
            .unwrap();

        assert!(store.get("wf_1", "alice").await.is_ok());
        match store.get("wf_1", "bob").await {
            Err(StoreError::NotOwned { .. }) => {}
            other => panic!("expected NotOwned, got {:?}", other.map(|r| r.workflow_id)),
        }
        match store.get("wf_missing", "alice").await {
            Err(StoreError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|r| r.workflow_id)),
        }
    }

    #[tokio::test]
    async fn update_bumps_updated_at() {
        let store = InMemoryWorkflowStore::new();
        store
            .create(WorkflowRecord::new_draft("wf_1", "alice", "Test", "string"))
            .await
            .unwrap();
        let before = store.get("wf_1", "alice").await.unwrap().updated_at;
        let record = store
            .update(
                "wf_1",
                "alice",
                Box::new(|r| r.description = "updated".into()),
            )
            .await
            .unwrap();
        assert_eq!(record.description, "updated");
        assert!(record.updated_at >= before);
    }
}
