//! In-memory implementation of the workflow state store.
//!
//! Thread-safe over `parking_lot` read-write locks, with the same
//! optimistic-locking semantics a durable backend must provide. Suitable
//! for local runs and tests; nothing here survives the process.

use parking_lot::RwLock;
use prflow_domain::port::store::{ActionGate, StoreError, WorkflowStore};
use prflow_domain::{ActionRecord, ActionStatus, IdempotencyKey, Revision, VersionedWorkflow, Workflow};
use prflow_shared::WorkflowKey;
use std::collections::HashMap;

/// In-memory workflow store.
///
/// Revisions start at 1 on create and increment on every successful swap.
/// A swap against a stale revision returns [`StoreError::Conflict`]
/// without touching the record.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    workflows: RwLock<HashMap<String, (Workflow, Revision)>>,
    actions: RwLock<HashMap<String, ActionRecord>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of workflow records held.
    pub fn workflow_count(&self) -> usize {
        self.workflows.read().len()
    }

    /// Number of action records held.
    pub fn action_count(&self) -> usize {
        self.actions.read().len()
    }

    /// Drop all records. Useful between test cases.
    pub fn clear(&self) {
        self.workflows.write().clear();
        self.actions.write().clear();
    }
}

#[async_trait::async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn load(&self, key: &WorkflowKey) -> Result<Option<VersionedWorkflow>, StoreError> {
        let workflows = self.workflows.read();
        Ok(workflows
            .get(&key.storage_id())
            .map(|(workflow, revision)| VersionedWorkflow {
                workflow: workflow.clone(),
                revision: *revision,
            }))
    }

    async fn create(&self, workflow: &Workflow) -> Result<Revision, StoreError> {
        let mut workflows = self.workflows.write();
        let id = workflow.key.storage_id();
        if workflows.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                key: workflow.key.clone(),
            });
        }
        workflows.insert(id, (workflow.clone(), 1));
        Ok(1)
    }

    async fn compare_and_swap(
        &self,
        key: &WorkflowKey,
        expected: Revision,
        workflow: &Workflow,
    ) -> Result<Revision, StoreError> {
        let mut workflows = self.workflows.write();
        let entry = workflows
            .get_mut(&key.storage_id())
            .ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        let (stored, revision) = entry;
        if *revision != expected {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected,
                actual: *revision,
            });
        }
        *stored = workflow.clone();
        *revision += 1;
        Ok(*revision)
    }

    async fn find_action(&self, key: &IdempotencyKey) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self.actions.read().get(key.as_str()).cloned())
    }

    async fn begin_action(&self, record: ActionRecord) -> Result<ActionGate, StoreError> {
        let mut actions = self.actions.write();
        if let Some(existing) = actions.get(record.key.as_str()) {
            return Ok(ActionGate::AlreadyRecorded(existing.clone()));
        }
        actions.insert(record.key.as_str().to_string(), record);
        Ok(ActionGate::Started)
    }

    async fn complete_action(
        &self,
        key: &IdempotencyKey,
        status: ActionStatus,
        external_ref: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut actions = self.actions.write();
        let record = actions
            .get_mut(key.as_str())
            .ok_or_else(|| StoreError::ActionNotFound { key: key.clone() })?;
        record.status = status;
        record.external_ref = external_ref;
        record.last_error = error;
        record.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prflow_domain::{Action, CommentNote, WorkflowContext, WorkflowState};
    use prflow_shared::RepositoryName;
    use std::sync::Arc;

    fn workflow(state: WorkflowState) -> Workflow {
        Workflow::new(
            WorkflowKey::pull_request("svc", "42"),
            WorkflowContext::for_repository(RepositoryName::new("svc")),
            state,
        )
    }

    #[tokio::test]
    async fn create_load_round_trip() {
        let store = InMemoryWorkflowStore::new();
        let created = workflow(WorkflowState::AwaitingBuild);
        assert_eq!(store.create(&created).await.unwrap(), 1);

        let loaded = store.load(&created.key).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 1);
        assert_eq!(loaded.workflow.state, WorkflowState::AwaitingBuild);

        let missing = store
            .load(&WorkflowKey::pull_request("svc", "99"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_create_conflicts() {
        let store = InMemoryWorkflowStore::new();
        let created = workflow(WorkflowState::AwaitingBuild);
        store.create(&created).await.unwrap();
        let err = store.create(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn stale_swap_conflicts_and_leaves_record_untouched() {
        let store = InMemoryWorkflowStore::new();
        let created = workflow(WorkflowState::AwaitingBuild);
        store.create(&created).await.unwrap();

        let next = created.advanced(WorkflowState::TornDown);
        assert_eq!(
            store.compare_and_swap(&created.key, 1, &next).await.unwrap(),
            2
        );

        // second writer still holds revision 1
        let err = store
            .compare_and_swap(&created.key, 1, &next)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        let loaded = store.load(&created.key).await.unwrap().unwrap();
        assert_eq!(loaded.revision, 2);
    }

    #[tokio::test]
    async fn concurrent_swaps_have_exactly_one_winner() {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let created = workflow(WorkflowState::AwaitingBuild);
        store.create(&created).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let next = created.advanced(WorkflowState::TornDown);
            let key = created.key.clone();
            handles.push(tokio::spawn(async move {
                store.compare_and_swap(&key, 1, &next).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn action_gate_admits_first_writer_only() {
        let store = InMemoryWorkflowStore::new();
        let key = WorkflowKey::pull_request("svc", "42");
        let action = Action::PostComment {
            note: CommentNote::BuildFailed {
                logs: "https://logs.example/7".into(),
            },
        };
        let idempotency = action.idempotency_key(&key);
        let record = ActionRecord::pending(key.clone(), idempotency.clone(), action.kind());

        assert!(matches!(
            store.begin_action(record.clone()).await.unwrap(),
            ActionGate::Started
        ));
        assert!(matches!(
            store.begin_action(record).await.unwrap(),
            ActionGate::AlreadyRecorded(_)
        ));

        store
            .complete_action(&idempotency, ActionStatus::Succeeded, None, None)
            .await
            .unwrap();
        let found = store.find_action(&idempotency).await.unwrap().unwrap();
        assert!(found.succeeded());
    }

    #[tokio::test]
    async fn completing_an_unknown_action_fails() {
        let store = InMemoryWorkflowStore::new();
        let key = WorkflowKey::pull_request("svc", "42");
        let action = Action::TeardownEnvironment {
            environment: "pr-42".into(),
        };
        let err = store
            .complete_action(
                &action.idempotency_key(&key),
                ActionStatus::Failed,
                None,
                Some("boom".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ActionNotFound { .. }));
    }
}
