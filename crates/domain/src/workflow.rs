use crate::state::WorkflowState;
use chrono::{DateTime, Utc};
use prflow_shared::{CommitId, RepositoryName, WorkflowKey};
use serde::{Deserialize, Serialize};

/// Correlation data captured when a workflow is created and enriched as
/// later events arrive. Build triggers transport these values as
/// environment variables (see [`crate::event::correlation`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub repository: RepositoryName,
    pub source_commit: Option<CommitId>,
    pub destination_commit: Option<CommitId>,
    pub source_reference: Option<String>,
    pub destination_reference: Option<String>,
    pub requester: Option<String>,
}

impl WorkflowContext {
    pub fn for_repository(repository: RepositoryName) -> Self {
        Self {
            repository,
            source_commit: None,
            destination_commit: None,
            source_reference: None,
            destination_reference: None,
            requester: None,
        }
    }

    /// Fill fields this context is missing from a later event's context.
    /// Values already present are never overwritten; the creation-time
    /// context wins over redelivered payloads.
    pub fn absorb(&mut self, other: &WorkflowContext) {
        if self.source_commit.is_none() {
            self.source_commit = other.source_commit.clone();
        }
        if self.destination_commit.is_none() {
            self.destination_commit = other.destination_commit.clone();
        }
        if self.source_reference.is_none() {
            self.source_reference = other.source_reference.clone();
        }
        if self.destination_reference.is_none() {
            self.destination_reference = other.destination_reference.clone();
        }
        if self.requester.is_none() {
            self.requester = other.requester.clone();
        }
    }
}

/// One tracked unit of work: key, correlation context and current state.
///
/// Workflow records are owned by the workflow state store and mutated only
/// through its compare-and-swap operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub key: WorkflowKey,
    pub context: WorkflowContext,
    pub state: WorkflowState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(key: WorkflowKey, context: WorkflowContext, state: WorkflowState) -> Self {
        let now = Utc::now();
        Self {
            key,
            context,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this workflow advanced to `state`.
    pub fn advanced(&self, state: WorkflowState) -> Self {
        Self {
            state,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Revision number used for optimistic locking on workflow records.
pub type Revision = u64;

/// A workflow record together with the revision it was read at.
#[derive(Debug, Clone)]
pub struct VersionedWorkflow {
    pub workflow: Workflow,
    pub revision: Revision,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowState;

    fn context() -> WorkflowContext {
        WorkflowContext {
            repository: RepositoryName::new("svc"),
            source_commit: Some(CommitId::new("c0ffee")),
            destination_commit: None,
            source_reference: Some("refs/heads/feature".into()),
            destination_reference: None,
            requester: None,
        }
    }

    #[test]
    fn absorb_fills_missing_fields_only() {
        let mut base = context();
        let mut later = WorkflowContext::for_repository(RepositoryName::new("svc"));
        later.source_commit = Some(CommitId::new("deadbeef"));
        later.destination_reference = Some("refs/heads/main".into());

        base.absorb(&later);

        // present value wins, missing value is filled
        assert_eq!(base.source_commit, Some(CommitId::new("c0ffee")));
        assert_eq!(base.destination_reference.as_deref(), Some("refs/heads/main"));
    }

    #[test]
    fn advanced_keeps_key_and_context() {
        let workflow = Workflow::new(
            WorkflowKey::pull_request("svc", "42"),
            context(),
            WorkflowState::AwaitingBuild,
        );
        let next = workflow.advanced(WorkflowState::TornDown);
        assert_eq!(next.key, workflow.key);
        assert_eq!(next.context, workflow.context);
        assert_eq!(next.state, WorkflowState::TornDown);
        assert_eq!(next.created_at, workflow.created_at);
    }
}
