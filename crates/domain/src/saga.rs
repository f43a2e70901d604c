//! The orchestration saga: a pure transition function from
//! `(current state, event)` to `(next state, actions)`.
//!
//! No I/O happens here. The saga only ever computes what should happen;
//! persisting the next state (compare-and-swap) and applying the actions
//! (idempotency-keyed dispatch) belong to the application layer. Because
//! actions are recomputed from state on every delivery, a loser of the
//! compare-and-swap race can simply discard its actions.

use crate::action::{
    artifact_build_id, artifact_copy_source, artifact_destination_key, Action, BuildParams,
    BuildSource, CommentNote, EnvVar, ObjectLocation,
};
use crate::event::{correlation, WorkflowEvent};
use crate::state::{BuildGoal, WorkflowState};
use crate::workflow::WorkflowContext;
use prflow_shared::WorkflowKey;

/// Deploy-time saga configuration.
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// Alias of the environment release artifacts are promoted to.
    pub environment_alias: String,
    /// Bucket promoted artifacts are copied into.
    pub artifact_bucket: String,
}

impl SagaConfig {
    pub fn new(environment_alias: impl Into<String>, artifact_bucket: impl Into<String>) -> Self {
        Self {
            environment_alias: environment_alias.into(),
            artifact_bucket: artifact_bucket.into(),
        }
    }
}

/// Result of applying one event to one workflow.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The event matched: commit `next` and dispatch `actions`.
    Advance {
        next: WorkflowState,
        actions: Vec<Action>,
    },
    /// The event matched no transition for the current state. A normal
    /// consequence of at-least-once delivery; the caller logs and drops it.
    Ignore,
}

impl Transition {
    fn advance(next: WorkflowState, actions: Vec<Action>) -> Self {
        Transition::Advance { next, actions }
    }
}

/// The state machine. Holds only immutable configuration; `transition` is
/// a pure function of its arguments.
#[derive(Debug, Clone)]
pub struct Saga {
    config: SagaConfig,
}

impl Saga {
    pub fn new(config: SagaConfig) -> Self {
        Self { config }
    }

    pub fn transition(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
        current: Option<&WorkflowState>,
        event: &WorkflowEvent,
    ) -> Transition {
        use WorkflowEvent as E;
        use WorkflowState as S;

        match (current, event) {
            (None, E::SourceOpened) => Transition::advance(S::AwaitingBuild, vec![]),

            // release workflows start straight from the arriving artifact
            (None, E::ArtifactArrived { location }) => {
                let params = self.release_build_from_artifact(key, location);
                Transition::advance(
                    S::BuildRunning {
                        goal: BuildGoal::Release,
                        build: None,
                    },
                    vec![Action::StartBuild { params }],
                )
            }

            (Some(S::AwaitingBuild), E::BuildRequested) => {
                let Some(params) = self.validation_build(key, context) else {
                    return Transition::Ignore;
                };
                Transition::advance(
                    S::BuildRunning {
                        goal: BuildGoal::Validation,
                        build: None,
                    },
                    vec![Action::StartBuild { params }],
                )
            }

            (Some(S::BuildRunning { goal, build: None }), E::BuildStarted { build }) => {
                let mut actions = Vec::new();
                if *goal == BuildGoal::Validation {
                    actions.push(Action::PostComment {
                        note: CommentNote::BuildStarted {
                            build: build.clone(),
                        },
                    });
                }
                Transition::advance(
                    S::BuildRunning {
                        goal: *goal,
                        build: Some(build.clone()),
                    },
                    actions,
                )
            }

            (
                Some(S::BuildRunning {
                    goal: BuildGoal::Validation,
                    ..
                }),
                E::BuildCompleted {
                    status,
                    artifact: Some(location),
                    logs,
                },
            ) if status.is_success() => Transition::advance(
                S::EnvironmentProvisioning { logs: logs.clone() },
                vec![self.copy_artifact(key, context, location)],
            ),

            (
                Some(S::BuildRunning {
                    goal: BuildGoal::Release,
                    ..
                }),
                E::BuildCompleted {
                    status,
                    artifact: Some(location),
                    logs,
                },
            ) if status.is_success() => Transition::advance(
                S::Merged,
                vec![
                    self.copy_artifact(key, context, location),
                    Action::PostComment {
                        note: CommentNote::BuildPassed {
                            logs: logs.clone(),
                            environment_url: None,
                        },
                    },
                ],
            ),

            (Some(S::BuildRunning { .. }), E::BuildCompleted { status, logs, .. })
                if !status.is_success() =>
            {
                Transition::advance(
                    S::BuildFailed { logs: logs.clone() },
                    vec![Action::PostComment {
                        note: CommentNote::BuildFailed { logs: logs.clone() },
                    }],
                )
            }

            (Some(S::EnvironmentProvisioning { logs }), E::EnvironmentReady { url }) => {
                Transition::advance(
                    S::EnvironmentReady { url: url.clone() },
                    vec![Action::PostComment {
                        note: CommentNote::BuildPassed {
                            logs: logs.clone(),
                            environment_url: Some(url.clone()),
                        },
                    }],
                )
            }

            (
                Some(S::EnvironmentReady { .. } | S::BuildFailed { .. }),
                E::SourceClosed { merged: false },
            ) => {
                let Some(environment) = key.environment_alias() else {
                    return Transition::Ignore;
                };
                Transition::advance(
                    S::TornDown,
                    vec![Action::TeardownEnvironment { environment }],
                )
            }

            (
                Some(S::EnvironmentReady { .. } | S::BuildFailed { .. }),
                E::SourceClosed { merged: true },
            ) => {
                let Some(params) = self.release_build_from_merge(key, context) else {
                    return Transition::Ignore;
                };
                Transition::advance(
                    S::BuildRunning {
                        goal: BuildGoal::Release,
                        build: None,
                    },
                    vec![Action::StartBuild { params }],
                )
            }

            // everything else: duplicate, out-of-order or too-early delivery
            _ => Transition::Ignore,
        }
    }

    /// Validation build: check out the proposed change, carry the
    /// correlation ids needed to route the completion back here.
    fn validation_build(&self, key: &WorkflowKey, context: &WorkflowContext) -> Option<BuildParams> {
        let WorkflowKey::PullRequest { pull_request, .. } = key else {
            return None;
        };
        let reference = context.source_reference.clone()?;
        let commit = context.source_commit.clone()?;
        let alias = key.environment_alias()?;

        let mut env = vec![
            EnvVar::new(correlation::COMMIT_ID, commit.as_str()),
            EnvVar::new(correlation::ENV_ALIAS, alias),
            EnvVar::new(correlation::PR_ID, pull_request.as_str()),
            EnvVar::new(correlation::REPO_NAME, context.repository.as_str()),
        ];
        if let Some(destination) = &context.destination_commit {
            env.push(EnvVar::new(
                correlation::DEST_COMMIT_ID,
                destination.as_str(),
            ));
        }

        Some(BuildParams {
            source: BuildSource::Reference {
                reference,
                commit: Some(commit),
            },
            env,
        })
    }

    /// Release build after a merge: check out the destination reference at
    /// the merged commit.
    fn release_build_from_merge(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
    ) -> Option<BuildParams> {
        let WorkflowKey::PullRequest { pull_request, .. } = key else {
            return None;
        };
        let reference = context.destination_reference.clone()?;
        let commit = context.source_commit.clone()?;

        let mut env = vec![
            EnvVar::new(correlation::COMMIT_ID, commit.as_str()),
            EnvVar::new(correlation::REPO_REF_FULL_NAME, reference.as_str()),
            EnvVar::new(correlation::REPO_NAME, context.repository.as_str()),
            EnvVar::new(correlation::PR_ID, pull_request.as_str()),
        ];
        if let Some(requester) = &context.requester {
            env.push(EnvVar::new(correlation::CALLER_ARN, requester));
        }

        Some(BuildParams {
            source: BuildSource::Reference {
                reference,
                commit: Some(commit),
            },
            env,
        })
    }

    /// Release build from an arriving versioned artifact: override the
    /// build source with the artifact location.
    fn release_build_from_artifact(
        &self,
        key: &WorkflowKey,
        location: &ObjectLocation,
    ) -> BuildParams {
        let mut env = vec![EnvVar::new(
            correlation::ENV_ALIAS,
            &self.config.environment_alias,
        )];
        if let WorkflowKey::Release {
            repository,
            version,
        } = key
        {
            env.push(EnvVar::new(correlation::RELEASE_VERSION, version.as_str()));
            env.push(EnvVar::new(correlation::REPO_NAME, repository.as_str()));
        }
        BuildParams {
            source: BuildSource::Artifact {
                location: location.to_string(),
            },
            env,
        }
    }

    /// Copy the produced artifact onto its deterministic destination key.
    fn copy_artifact(
        &self,
        key: &WorkflowKey,
        context: &WorkflowContext,
        location: &str,
    ) -> Action {
        let (alias, segment) = match key {
            WorkflowKey::PullRequest { .. } => (
                key.environment_alias().unwrap_or_default(),
                context
                    .source_commit
                    .as_ref()
                    .map(|commit| commit.as_str().to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            WorkflowKey::Release { version, .. } => (
                self.config.environment_alias.clone(),
                version.as_str().to_string(),
            ),
        };
        let build_id = artifact_build_id(location);
        Action::CopyArtifact {
            source: artifact_copy_source(location),
            destination: ObjectLocation::new(
                &self.config.artifact_bucket,
                artifact_destination_key(&alias, &segment, build_id),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::BuildStatus;
    use prflow_shared::{BuildRef, CommitId, RepositoryName};

    fn saga() -> Saga {
        Saga::new(SagaConfig::new("staging", "artifacts"))
    }

    fn pr_key() -> WorkflowKey {
        WorkflowKey::pull_request("svc", "42")
    }

    fn pr_context() -> WorkflowContext {
        WorkflowContext {
            repository: RepositoryName::new("svc"),
            source_commit: Some(CommitId::new("c0ffee")),
            destination_commit: Some(CommitId::new("beef01")),
            source_reference: Some("refs/heads/feature".into()),
            destination_reference: Some("refs/heads/main".into()),
            requester: Some("arn:user/dev".into()),
        }
    }

    fn completed(status: BuildStatus) -> WorkflowEvent {
        WorkflowEvent::BuildCompleted {
            status,
            artifact: Some("arn:aws:s3:::builds/42/build-7".into()),
            logs: "https://logs.example/7".into(),
        }
    }

    #[test]
    fn source_opened_creates_awaiting_build_with_no_actions() {
        let transition = saga().transition(&pr_key(), &pr_context(), None, &WorkflowEvent::SourceOpened);
        assert_eq!(
            transition,
            Transition::Advance {
                next: WorkflowState::AwaitingBuild,
                actions: vec![],
            }
        );
    }

    #[test]
    fn build_requested_starts_validation_build() {
        let transition = saga().transition(
            &pr_key(),
            &pr_context(),
            Some(&WorkflowState::AwaitingBuild),
            &WorkflowEvent::BuildRequested,
        );
        let Transition::Advance { next, actions } = transition else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::BuildRunning {
                goal: BuildGoal::Validation,
                build: None,
            }
        );
        let [Action::StartBuild { params }] = actions.as_slice() else {
            panic!("expected a single StartBuild, got {actions:?}");
        };
        assert_eq!(
            params.source.source_version().as_deref(),
            Some("refs/heads/feature^{c0ffee}")
        );
        let names: Vec<&str> = params.env.iter().map(|v| v.name.as_str()).collect();
        assert!(names.contains(&"PR_ID"));
        assert!(names.contains(&"ENV_ALIAS"));
        assert!(names.contains(&"COMMIT_ID"));
    }

    #[test]
    fn build_started_records_id_and_comments_once() {
        let running = WorkflowState::BuildRunning {
            goal: BuildGoal::Validation,
            build: None,
        };
        let event = WorkflowEvent::BuildStarted {
            build: BuildRef::new("proj:build-7"),
        };
        let Transition::Advance { next, actions } =
            saga().transition(&pr_key(), &pr_context(), Some(&running), &event)
        else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::BuildRunning {
                goal: BuildGoal::Validation,
                build: Some(BuildRef::new("proj:build-7")),
            }
        );
        assert_eq!(actions.len(), 1);

        // duplicate BuildStarted once the id is recorded is a no-op
        let duplicate = saga().transition(&pr_key(), &pr_context(), Some(&next), &event);
        assert_eq!(duplicate, Transition::Ignore);
    }

    #[test]
    fn successful_validation_build_copies_artifact() {
        let running = WorkflowState::BuildRunning {
            goal: BuildGoal::Validation,
            build: Some(BuildRef::new("proj:build-7")),
        };
        let Transition::Advance { next, actions } = saga().transition(
            &pr_key(),
            &pr_context(),
            Some(&running),
            &completed(BuildStatus::Succeeded),
        ) else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::EnvironmentProvisioning {
                logs: "https://logs.example/7".into()
            }
        );
        let [Action::CopyArtifact {
            source,
            destination,
        }] = actions.as_slice()
        else {
            panic!("expected a single CopyArtifact, got {actions:?}");
        };
        assert_eq!(source, "builds/42/build-7/artifact.zip");
        assert_eq!(destination.bucket, "artifacts");
        assert_eq!(destination.key, "pr-42/c0ffee/build-7/artifact.zip");
    }

    #[test]
    fn failed_build_comments_and_records_logs() {
        let running = WorkflowState::BuildRunning {
            goal: BuildGoal::Validation,
            build: None,
        };
        let Transition::Advance { next, actions } = saga().transition(
            &pr_key(),
            &pr_context(),
            Some(&running),
            &completed(BuildStatus::Failed),
        ) else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::BuildFailed {
                logs: "https://logs.example/7".into()
            }
        );
        assert_eq!(
            actions,
            vec![Action::PostComment {
                note: CommentNote::BuildFailed {
                    logs: "https://logs.example/7".into()
                }
            }]
        );
    }

    #[test]
    fn environment_ready_comments_with_url() {
        let provisioning = WorkflowState::EnvironmentProvisioning {
            logs: "https://logs.example/7".into(),
        };
        let event = WorkflowEvent::EnvironmentReady {
            url: "https://pr42.preview.example".into(),
        };
        let Transition::Advance { next, actions } =
            saga().transition(&pr_key(), &pr_context(), Some(&provisioning), &event)
        else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::EnvironmentReady {
                url: "https://pr42.preview.example".into()
            }
        );
        assert_eq!(
            actions,
            vec![Action::PostComment {
                note: CommentNote::BuildPassed {
                    logs: "https://logs.example/7".into(),
                    environment_url: Some("https://pr42.preview.example".into()),
                }
            }]
        );
    }

    #[test]
    fn close_without_merge_tears_down() {
        let ready = WorkflowState::EnvironmentReady {
            url: "https://pr42.preview.example".into(),
        };
        let Transition::Advance { next, actions } = saga().transition(
            &pr_key(),
            &pr_context(),
            Some(&ready),
            &WorkflowEvent::SourceClosed { merged: false },
        ) else {
            panic!("expected advance");
        };
        assert_eq!(next, WorkflowState::TornDown);
        assert_eq!(
            actions,
            vec![Action::TeardownEnvironment {
                environment: "pr-42".into()
            }]
        );
    }

    #[test]
    fn close_with_merge_starts_release_build() {
        let failed = WorkflowState::BuildFailed {
            logs: "https://logs.example/7".into(),
        };
        let Transition::Advance { next, actions } = saga().transition(
            &pr_key(),
            &pr_context(),
            Some(&failed),
            &WorkflowEvent::SourceClosed { merged: true },
        ) else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::BuildRunning {
                goal: BuildGoal::Release,
                build: None,
            }
        );
        let [Action::StartBuild { params }] = actions.as_slice() else {
            panic!("expected a single StartBuild, got {actions:?}");
        };
        assert_eq!(
            params.source.source_version().as_deref(),
            Some("refs/heads/main^{c0ffee}")
        );
    }

    #[test]
    fn release_build_success_promotes_and_comments() {
        let key = WorkflowKey::release("releases", "v1.2.3");
        let context = WorkflowContext::for_repository(RepositoryName::new("releases"));
        let running = WorkflowState::BuildRunning {
            goal: BuildGoal::Release,
            build: None,
        };
        let event = WorkflowEvent::BuildCompleted {
            status: BuildStatus::Succeeded,
            artifact: Some("arn:aws:s3:::builds/releases/build-9".into()),
            logs: "https://logs.example/9".into(),
        };
        let Transition::Advance { next, actions } =
            saga().transition(&key, &context, Some(&running), &event)
        else {
            panic!("expected advance");
        };
        assert_eq!(next, WorkflowState::Merged);
        assert_eq!(actions.len(), 2);
        let Action::CopyArtifact { destination, .. } = &actions[0] else {
            panic!("expected CopyArtifact first, got {actions:?}");
        };
        assert_eq!(destination.key, "staging/v1.2.3/build-9/artifact.zip");
    }

    #[test]
    fn artifact_arrival_starts_release_workflow() {
        let key = WorkflowKey::release("releases", "v1.2.3");
        let context = WorkflowContext::for_repository(RepositoryName::new("releases"));
        let event = WorkflowEvent::ArtifactArrived {
            location: ObjectLocation::new("releases", "v1.2.3/app.zip"),
        };
        let Transition::Advance { next, actions } = saga().transition(&key, &context, None, &event)
        else {
            panic!("expected advance");
        };
        assert_eq!(
            next,
            WorkflowState::BuildRunning {
                goal: BuildGoal::Release,
                build: None,
            }
        );
        let [Action::StartBuild { params }] = actions.as_slice() else {
            panic!("expected a single StartBuild, got {actions:?}");
        };
        assert_eq!(
            params.source,
            BuildSource::Artifact {
                location: "releases/v1.2.3/app.zip".into()
            }
        );
    }

    #[test]
    fn too_early_and_duplicate_events_are_ignored() {
        let saga = saga();
        // completion before any build was ever recorded
        assert_eq!(
            saga.transition(
                &pr_key(),
                &pr_context(),
                Some(&WorkflowState::AwaitingBuild),
                &completed(BuildStatus::Succeeded),
            ),
            Transition::Ignore
        );
        // duplicate completion while already provisioning
        assert_eq!(
            saga.transition(
                &pr_key(),
                &pr_context(),
                Some(&WorkflowState::EnvironmentProvisioning {
                    logs: "https://logs.example/7".into()
                }),
                &completed(BuildStatus::Succeeded),
            ),
            Transition::Ignore
        );
        // completion with no workflow at all
        assert_eq!(
            saga.transition(&pr_key(), &pr_context(), None, &completed(BuildStatus::Failed)),
            Transition::Ignore
        );
    }

    #[test]
    fn terminal_states_reject_everything() {
        let saga = saga();
        for state in [WorkflowState::Merged, WorkflowState::TornDown] {
            for event in [
                WorkflowEvent::SourceOpened,
                WorkflowEvent::SourceClosed { merged: false },
                WorkflowEvent::BuildRequested,
                completed(BuildStatus::Succeeded),
            ] {
                assert_eq!(
                    saga.transition(&pr_key(), &pr_context(), Some(&state), &event),
                    Transition::Ignore,
                    "{state} should ignore {event}"
                );
            }
        }
    }
}
