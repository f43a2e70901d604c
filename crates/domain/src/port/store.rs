//! Workflow state store port.
//!
//! All state mutation goes through compare-and-swap keyed on the revision
//! the caller previously loaded. Two concurrent deliveries of the same
//! event race safely: exactly one write wins and the other observes
//! [`StoreError::Conflict`], discarding its computed actions.

use crate::action::{ActionRecord, ActionStatus, IdempotencyKey};
use crate::workflow::{Revision, VersionedWorkflow, Workflow};
use async_trait::async_trait;
use prflow_shared::WorkflowKey;
use thiserror::Error;

/// Errors from workflow store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic locking detected a revision mismatch. The expected
    /// outcome of a duplicate-delivery race, not a failure.
    #[error("Conflict on {key}: expected revision {expected}, but current is {actual}")]
    Conflict {
        key: WorkflowKey,
        expected: Revision,
        actual: Revision,
    },

    /// A create raced with another create for the same key.
    #[error("Workflow already exists: {key}")]
    AlreadyExists { key: WorkflowKey },

    /// Swap or completion against a record that was never written.
    #[error("Workflow not found: {key}")]
    NotFound { key: WorkflowKey },

    /// The action record for a completion was never begun.
    #[error("Action record not found: {key}")]
    ActionNotFound { key: IdempotencyKey },

    /// Backend-specific failure.
    #[error("Backend error: {reason}")]
    Backend { reason: String },
}

impl StoreError {
    /// Conflicts (including create races) are the normal loser side of
    /// compare-and-swap.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::AlreadyExists { .. })
    }
}

/// Outcome of the insert-if-absent gate on action records.
#[derive(Debug, Clone)]
pub enum ActionGate {
    /// No record existed; the pending record was written and the caller
    /// owns execution.
    Started,
    /// A record already existed; the caller decides based on its status.
    AlreadyRecorded(ActionRecord),
}

/// Durable mapping from workflow key to workflow record, plus the action
/// records backing dispatch idempotency.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Load the workflow record and its current revision.
    async fn load(&self, key: &WorkflowKey) -> Result<Option<VersionedWorkflow>, StoreError>;

    /// Create the record for a new key at revision 1.
    ///
    /// # Errors
    ///
    /// [`StoreError::AlreadyExists`] if another writer created it first.
    async fn create(&self, workflow: &Workflow) -> Result<Revision, StoreError>;

    /// Replace the record if its revision still equals `expected`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Conflict`] if the revision moved since the load;
    /// [`StoreError::NotFound`] if the record was never created.
    async fn compare_and_swap(
        &self,
        key: &WorkflowKey,
        expected: Revision,
        workflow: &Workflow,
    ) -> Result<Revision, StoreError>;

    /// Look up the action record for an idempotency key.
    async fn find_action(&self, key: &IdempotencyKey) -> Result<Option<ActionRecord>, StoreError>;

    /// Insert `record` unless a record for its key already exists.
    async fn begin_action(&self, record: ActionRecord) -> Result<ActionGate, StoreError>;

    /// Record the outcome of a dispatched action.
    async fn complete_action(
        &self,
        key: &IdempotencyKey,
        status: ActionStatus,
        external_ref: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError>;
}
