//! Ports for the external collaborators the coordinator drives.
//!
//! Every call may be retried by the trigger infrastructure, so adapters
//! must tolerate repeated identical requests; the dispatcher additionally
//! guards each action with an idempotency record.

use crate::action::{BuildSource, EnvVar};
use crate::action::ObjectLocation;
use crate::workflow::WorkflowContext;
use async_trait::async_trait;
use prflow_shared::{BuildRef, WorkflowKey};
use std::time::Duration;
use thiserror::Error;

/// Failure talking to an external collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// The call did not complete within the bounded timeout.
    #[error("Collaborator timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Transient failure (unreachable, 5xx-class). Redelivery expected.
    #[error("Collaborator unavailable: {reason}")]
    Unavailable { reason: String },

    /// The collaborator rejected the request outright; retrying the same
    /// request cannot succeed.
    #[error("Collaborator rejected the request: {reason}")]
    Rejected { reason: String },
}

impl CollaboratorError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

/// Build execution service.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Start a build of `project` from `source`, with `env` forwarded into
    /// the build environment. Returns the service-assigned build id.
    async fn start_build(
        &self,
        project: &str,
        source: &BuildSource,
        env: &[EnvVar],
    ) -> Result<BuildRef, CollaboratorError>;
}

/// Artifact object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Copy the object at `source` (a `bucket/key` path) onto
    /// `destination`. Destination keys are deterministic, so repeating the
    /// copy overwrites the same object.
    async fn copy_object(
        &self,
        source: &str,
        destination: &ObjectLocation,
    ) -> Result<(), CollaboratorError>;
}

/// Source-control comment transport.
#[async_trait]
pub trait CommentGateway: Send + Sync {
    /// Post `body` on the conversation identified by `key`. The
    /// `request_token` deduplicates retried posts on the transport side.
    async fn post_comment(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
        body: &str,
        request_token: &str,
    ) -> Result<(), CollaboratorError>;
}

/// Read-only view of a provisioned infrastructure stack.
#[async_trait]
pub trait StackInspector: Send + Sync {
    /// Describe the output key/value pairs of `stack_name`.
    async fn describe_outputs(
        &self,
        stack_name: &str,
    ) -> Result<Vec<(String, String)>, CollaboratorError>;
}
