//! Idempotency-keyed execution of saga actions.
//!
//! Before touching a collaborator, the dispatcher consults the action
//! record store under the action's deterministic idempotency key: a
//! `Succeeded` record short-circuits to the cached outcome. Failures are
//! recorded and surfaced as retryable errors — the trigger infrastructure
//! redelivers the event, and `transition` plus `dispatch` are jointly
//! idempotent, so redelivery is safe.

use prflow_domain::port::collaborators::{
    BuildService, CollaboratorError, CommentGateway, ObjectStore,
};
use prflow_domain::port::store::{ActionGate, StoreError, WorkflowStore};
use prflow_domain::{
    correlation, Action, ActionKind, ActionRecord, ActionStatus, BuildSource, EnvVar,
    IdempotencyKey, Notifier, WorkflowContext,
};
use prflow_shared::WorkflowKey;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Build project all builds (including teardown builds) run in.
    pub build_project: String,
    /// Bound applied to every collaborator call.
    pub call_timeout: Duration,
}

/// Outcome of dispatching one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The collaborator was invoked during this dispatch.
    Executed { external_ref: Option<String> },
    /// A succeeded record already existed; the collaborator was not
    /// invoked again.
    Cached { external_ref: Option<String> },
}

impl ActionOutcome {
    pub fn external_ref(&self) -> Option<&str> {
        match self {
            ActionOutcome::Executed { external_ref } | ActionOutcome::Cached { external_ref } => {
                external_ref.as_deref()
            }
        }
    }
}

/// Errors surfaced by dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Collaborator call failed for {kind}: {source}")]
    Collaborator {
        kind: ActionKind,
        #[source]
        source: CollaboratorError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DispatchError::Collaborator { source, .. } => source.is_retryable(),
            DispatchError::Store(StoreError::Backend { .. }) => true,
            DispatchError::Store(_) => false,
        }
    }
}

/// Executes actions against the collaborator ports.
pub struct ActionDispatcher {
    store: Arc<dyn WorkflowStore>,
    builds: Arc<dyn BuildService>,
    objects: Arc<dyn ObjectStore>,
    comments: Arc<dyn CommentGateway>,
    notifier: Notifier,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        builds: Arc<dyn BuildService>,
        objects: Arc<dyn ObjectStore>,
        comments: Arc<dyn CommentGateway>,
        notifier: Notifier,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            builds,
            objects,
            comments,
            notifier,
            config,
        }
    }

    /// Apply `action` at most once.
    pub async fn dispatch(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
        action: &Action,
    ) -> Result<ActionOutcome, DispatchError> {
        let idempotency = action.idempotency_key(key);

        if let Some(record) = self.store.find_action(&idempotency).await? {
            if record.succeeded() {
                debug!(%key, %idempotency, "action already applied; returning cached outcome");
                return Ok(ActionOutcome::Cached {
                    external_ref: record.external_ref,
                });
            }
        }

        let pending = ActionRecord::pending(key.clone(), idempotency.clone(), action.kind());
        match self.store.begin_action(pending).await? {
            ActionGate::Started => {}
            ActionGate::AlreadyRecorded(record) if record.succeeded() => {
                debug!(%key, %idempotency, "action already applied; returning cached outcome");
                return Ok(ActionOutcome::Cached {
                    external_ref: record.external_ref,
                });
            }
            ActionGate::AlreadyRecorded(record) => {
                debug!(%key, %idempotency, status = %record.status, "re-dispatching recorded action");
            }
        }

        let call = self.execute(key, context, action, &idempotency);
        let result = match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                timeout: self.config.call_timeout,
            }),
        };

        match result {
            Ok(external_ref) => {
                self.store
                    .complete_action(
                        &idempotency,
                        ActionStatus::Succeeded,
                        external_ref.clone(),
                        None,
                    )
                    .await?;
                info!(%key, %idempotency, kind = %action.kind(), "action applied");
                Ok(ActionOutcome::Executed { external_ref })
            }
            Err(source) => {
                self.store
                    .complete_action(
                        &idempotency,
                        ActionStatus::Failed,
                        None,
                        Some(source.to_string()),
                    )
                    .await?;
                warn!(%key, %idempotency, kind = %action.kind(), error = %source, "action failed");
                Err(DispatchError::Collaborator {
                    kind: action.kind(),
                    source,
                })
            }
        }
    }

    async fn execute(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
        action: &Action,
        idempotency: &IdempotencyKey,
    ) -> Result<Option<String>, CollaboratorError> {
        match action {
            Action::StartBuild { params } => {
                let build = self
                    .builds
                    .start_build(&self.config.build_project, &params.source, &params.env)
                    .await?;
                Ok(Some(build.to_string()))
            }
            Action::CopyArtifact {
                source,
                destination,
            } => {
                self.objects.copy_object(source, destination).await?;
                Ok(Some(destination.to_string()))
            }
            Action::PostComment { note } => {
                let message = self.notifier.render(note);
                self.comments
                    .post_comment(key, context, &message.body, idempotency.as_str())
                    .await?;
                Ok(None)
            }
            Action::TeardownEnvironment { environment } => {
                // teardown runs as a dedicated build against the
                // destination reference with the alias override
                let Some(reference) = context.destination_reference.clone() else {
                    return Err(CollaboratorError::rejected(
                        "no destination reference to run teardown from",
                    ));
                };
                let source = BuildSource::Reference {
                    reference,
                    commit: None,
                };
                let mut env = vec![
                    EnvVar::new(correlation::ENV_ALIAS, environment),
                    EnvVar::new(correlation::REPO_NAME, context.repository.as_str()),
                ];
                if let WorkflowKey::PullRequest { pull_request, .. } = key {
                    // completion of the teardown build then routes back to
                    // this (terminal) workflow and is dropped there
                    env.push(EnvVar::new(correlation::PR_ID, pull_request.as_str()));
                }
                let build = self
                    .builds
                    .start_build(&self.config.build_project, &source, &env)
                    .await?;
                Ok(Some(build.to_string()))
            }
        }
    }
}
