//! The per-event use case: normalize, load, transition, compare-and-swap,
//! dispatch, and feed internal follow-up events back through the same
//! path.
//!
//! Every trigger delivery is handled by one stateless invocation. Losing
//! the compare-and-swap race is a normal outcome ([`Outcome::Superseded`])
//! and discards the computed actions; events that match no transition are
//! debug-logged and dropped ([`Outcome::Ignored`]).

use crate::config::CoordinatorConfig;
use crate::dispatcher::{ActionDispatcher, DispatchError, DispatcherConfig};
use prflow_domain::port::collaborators::{
    BuildService, CollaboratorError, CommentGateway, ObjectStore, StackInspector,
};
use prflow_domain::port::store::{StoreError, WorkflowStore};
use prflow_domain::{
    normalize, Action, Notifier, NotifierConfig, PayloadError, Saga, SagaConfig, Transition,
    TriggerKind, Workflow, WorkflowContext, WorkflowEvent, WorkflowState,
};
use prflow_shared::{BuildRef, WorkflowKey};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Stack output key holding the preview-environment URL.
pub const ENVIRONMENT_URL_OUTPUT: &str = "EnvironmentUrl";

/// Processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Per-pull-request stack names are `{prefix}{pull request id}`.
    pub stack_name_prefix: String,
    /// Bound applied to collaborator calls made by the processor itself.
    pub call_timeout: Duration,
}

/// How one delivered event was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A transition was committed.
    Applied { state: WorkflowState },
    /// The event matched no transition (duplicate, out-of-order, or
    /// terminal workflow) and was dropped.
    Ignored,
    /// A concurrent delivery won the compare-and-swap race; the computed
    /// actions were discarded.
    Superseded,
}

/// Errors surfaced to the trigger infrastructure.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Non-retryable: the payload is unusable and must be discarded.
    #[error(transparent)]
    MalformedPayload(#[from] PayloadError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Collaborator call failed: {0}")]
    Collaborator(CollaboratorError),

    #[error(transparent)]
    Store(StoreError),
}

impl ProcessError {
    /// Whether redelivering the triggering event can help.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::MalformedPayload(_) => false,
            ProcessError::Dispatch(err) => err.is_retryable(),
            ProcessError::Collaborator(err) => err.is_retryable(),
            ProcessError::Store(StoreError::Backend { .. }) => true,
            ProcessError::Store(_) => false,
        }
    }
}

/// Coordinates one event delivery end to end.
pub struct EventProcessor {
    store: Arc<dyn WorkflowStore>,
    stacks: Arc<dyn StackInspector>,
    dispatcher: ActionDispatcher,
    saga: Saga,
    config: ProcessorConfig,
}

impl EventProcessor {
    pub fn new(
        config: &CoordinatorConfig,
        store: Arc<dyn WorkflowStore>,
        builds: Arc<dyn BuildService>,
        objects: Arc<dyn ObjectStore>,
        comments: Arc<dyn CommentGateway>,
        stacks: Arc<dyn StackInspector>,
    ) -> Self {
        let saga = Saga::new(SagaConfig::new(
            &config.environment_alias,
            &config.artifact_bucket,
        ));
        let notifier = Notifier::new(NotifierConfig::for_region(&config.badge_region));
        let dispatcher = ActionDispatcher::new(
            store.clone(),
            builds,
            objects,
            comments,
            notifier,
            DispatcherConfig {
                build_project: config.build_project.clone(),
                call_timeout: config.call_timeout,
            },
        );
        Self {
            store,
            stacks,
            dispatcher,
            saga,
            config: ProcessorConfig {
                stack_name_prefix: config.stack_name_prefix.clone(),
                call_timeout: config.call_timeout,
            },
        }
    }

    /// Handle one raw trigger delivery.
    pub async fn handle(&self, kind: TriggerKind, payload: &Value) -> Result<Outcome, ProcessError> {
        let normalized = normalize(kind, payload)?;
        debug!(key = %normalized.key, event = %normalized.event, "normalized trigger");
        self.process(&normalized.key, Some(normalized.context), normalized.event)
            .await
    }

    /// Process one canonical event, then drain the internal follow-ups it
    /// produces (`BuildRequested`, `BuildStarted`). The returned outcome is
    /// that of the delivered event; follow-up outcomes are logged.
    pub async fn process(
        &self,
        key: &WorkflowKey,
        context: Option<WorkflowContext>,
        event: WorkflowEvent,
    ) -> Result<Outcome, ProcessError> {
        let mut queue = VecDeque::from([event]);
        let mut incoming = context;
        let mut first_outcome = None;
        while let Some(event) = queue.pop_front() {
            let outcome = self
                .apply(key, incoming.take().as_ref(), &event, &mut queue)
                .await?;
            if first_outcome.is_none() {
                first_outcome = Some(outcome);
            }
        }
        Ok(first_outcome.unwrap_or(Outcome::Ignored))
    }

    /// Resolve the preview-environment URL from the stack inspector and
    /// feed the resulting `EnvironmentReady` event into the saga.
    pub async fn check_environment(&self, key: &WorkflowKey) -> Result<Outcome, ProcessError> {
        let WorkflowKey::PullRequest { pull_request, .. } = key else {
            debug!(%key, "release workflows have no preview environment");
            return Ok(Outcome::Ignored);
        };
        let stack_name = format!("{}{}", self.config.stack_name_prefix, pull_request);
        let describe = self.stacks.describe_outputs(&stack_name);
        let outputs = match tokio::time::timeout(self.config.call_timeout, describe).await {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(err)) => return Err(ProcessError::Collaborator(err)),
            Err(_) => {
                return Err(ProcessError::Collaborator(CollaboratorError::Timeout {
                    timeout: self.config.call_timeout,
                }))
            }
        };
        let Some((_, url)) = outputs
            .iter()
            .find(|(name, _)| name == ENVIRONMENT_URL_OUTPUT)
        else {
            return Err(ProcessError::Collaborator(CollaboratorError::rejected(
                format!("stack {stack_name} has no {ENVIRONMENT_URL_OUTPUT} output"),
            )));
        };
        self.process(
            key,
            None,
            WorkflowEvent::EnvironmentReady { url: url.clone() },
        )
        .await
    }

    async fn apply(
        &self,
        key: &WorkflowKey,
        incoming: Option<&WorkflowContext>,
        event: &WorkflowEvent,
        queue: &mut VecDeque<WorkflowEvent>,
    ) -> Result<Outcome, ProcessError> {
        let loaded = self.store.load(key).await.map_err(ProcessError::Store)?;

        // fold correlation data carried by this event into the stored
        // context; creation-time values win
        let context = match (&loaded, incoming) {
            (Some(versioned), Some(incoming)) => {
                let mut context = versioned.workflow.context.clone();
                context.absorb(incoming);
                context
            }
            (Some(versioned), None) => versioned.workflow.context.clone(),
            (None, Some(incoming)) => incoming.clone(),
            (None, None) => {
                debug!(%key, %event, "event for unknown workflow carries no context; ignoring");
                return Ok(Outcome::Ignored);
            }
        };

        let current = loaded.as_ref().map(|versioned| &versioned.workflow.state);
        if let Some(state) = current {
            if state.is_terminal() {
                debug!(%key, %state, %event, "workflow is terminal; ignoring event");
                return Ok(Outcome::Ignored);
            }
        }

        let Transition::Advance { next, actions } =
            self.saga.transition(key, &context, current, event)
        else {
            debug!(
                %key,
                state = current.map(WorkflowState::name).unwrap_or("none"),
                %event,
                "no transition for event; ignoring"
            );
            return Ok(Outcome::Ignored);
        };

        match &loaded {
            None => {
                let workflow = Workflow::new(key.clone(), context.clone(), next.clone());
                match self.store.create(&workflow).await {
                    Ok(_) => {}
                    Err(err) if err.is_conflict() => {
                        debug!(%key, %event, "lost the create race; discarding actions");
                        return Ok(Outcome::Superseded);
                    }
                    Err(err) => return Err(ProcessError::Store(err)),
                }
            }
            Some(versioned) => {
                let mut workflow = versioned.workflow.advanced(next.clone());
                workflow.context = context.clone();
                match self
                    .store
                    .compare_and_swap(key, versioned.revision, &workflow)
                    .await
                {
                    Ok(_) => {}
                    Err(err) if err.is_conflict() => {
                        debug!(%key, %event, "lost the compare-and-swap race; discarding actions");
                        return Ok(Outcome::Superseded);
                    }
                    Err(err) => return Err(ProcessError::Store(err)),
                }
            }
        }
        info!(
            %key,
            from = current.map(WorkflowState::name).unwrap_or("none"),
            to = next.name(),
            %event,
            "workflow advanced"
        );

        for action in &actions {
            let outcome = self.dispatcher.dispatch(key, &context, action).await?;
            if matches!(action, Action::StartBuild { .. }) {
                if let Some(reference) = outcome.external_ref() {
                    queue.push_back(WorkflowEvent::BuildStarted {
                        build: BuildRef::new(reference),
                    });
                }
            }
        }

        // internal trigger: a freshly created workflow immediately asks
        // for its validation build
        if next == WorkflowState::AwaitingBuild {
            queue.push_back(WorkflowEvent::BuildRequested);
        }

        Ok(Outcome::Applied { state: next })
    }
}
