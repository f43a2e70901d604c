//! Canonical workflow events and the event normalizer.
//!
//! The normalizer converts heterogeneous trigger payloads into one
//! [`WorkflowEvent`] plus the [`WorkflowKey`] it belongs to. Required
//! fields are decoded eagerly; anything missing fails with
//! [`PayloadError`], which is non-retryable — the caller surfaces it and
//! discards the event instead of redelivering.

use crate::action::{EnvVar, ObjectLocation};
use crate::workflow::WorkflowContext;
use prflow_shared::event_topics::{
    artifact_topics, build_topics, environment_topics, source_topics,
};
use prflow_shared::{BuildRef, CommitId, RepositoryName, WorkflowKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Well-known environment-variable names used to correlate build
/// completions with the workflow that started the build.
pub mod correlation {
    pub const PR_ID: &str = "PR_ID";
    pub const REPO_NAME: &str = "REPO_NAME";
    pub const COMMIT_ID: &str = "COMMIT_ID";
    pub const DEST_COMMIT_ID: &str = "DEST_COMMIT_ID";
    pub const REPO_REF_FULL_NAME: &str = "REPO_REF_FULL_NAME";
    pub const CALLER_ARN: &str = "CALLER_ARN";
    pub const ENV_ALIAS: &str = "ENV_ALIAS";
    pub const RELEASE_VERSION: &str = "RELEASE_VERSION";
}

/// The trigger sources the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerKind {
    PullRequestOpened,
    PullRequestClosed,
    BuildStateChanged,
    ObjectCreated,
    EnvironmentReady,
}

impl TriggerKind {
    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            source_topics::PR_OPENED => Some(Self::PullRequestOpened),
            source_topics::PR_CLOSED => Some(Self::PullRequestClosed),
            build_topics::STATE_CHANGED => Some(Self::BuildStateChanged),
            artifact_topics::OBJECT_CREATED => Some(Self::ObjectCreated),
            environment_topics::READY => Some(Self::EnvironmentReady),
            _ => None,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Self::PullRequestOpened => source_topics::PR_OPENED,
            Self::PullRequestClosed => source_topics::PR_CLOSED,
            Self::BuildStateChanged => build_topics::STATE_CHANGED,
            Self::ObjectCreated => artifact_topics::OBJECT_CREATED,
            Self::EnvironmentReady => environment_topics::READY,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.topic())
    }
}

/// Terminal status of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    Succeeded,
    Failed,
}

impl BuildStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BuildStatus::Succeeded)
    }
}

impl FromStr for BuildStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCEEDED" => Ok(BuildStatus::Succeeded),
            "FAILED" | "FAULT" | "STOPPED" | "TIMED_OUT" => Ok(BuildStatus::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Succeeded => write!(f, "SUCCEEDED"),
            BuildStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Canonical event feeding the saga. External variants are produced by the
/// normalizer; `BuildRequested` and `BuildStarted` are internal follow-ups
/// fed back by the event processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowEvent {
    SourceOpened,
    SourceClosed {
        merged: bool,
    },
    /// Internal trigger moving `AwaitingBuild` into `BuildRunning`.
    BuildRequested,
    /// Dispatcher completion callback carrying the assigned build id.
    BuildStarted {
        build: BuildRef,
    },
    BuildCompleted {
        status: BuildStatus,
        /// Artifact location reported by the build service; always present
        /// on successful builds.
        artifact: Option<String>,
        logs: String,
    },
    ArtifactArrived {
        location: ObjectLocation,
    },
    EnvironmentReady {
        url: String,
    },
}

impl WorkflowEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::SourceOpened => "SourceOpened",
            WorkflowEvent::SourceClosed { .. } => "SourceClosed",
            WorkflowEvent::BuildRequested => "BuildRequested",
            WorkflowEvent::BuildStarted { .. } => "BuildStarted",
            WorkflowEvent::BuildCompleted { .. } => "BuildCompleted",
            WorkflowEvent::ArtifactArrived { .. } => "ArtifactArrived",
            WorkflowEvent::EnvironmentReady { .. } => "EnvironmentReady",
        }
    }

    /// Internal events never arrive from the trigger infrastructure.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::BuildRequested | WorkflowEvent::BuildStarted { .. }
        )
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Output of the normalizer: the workflow the event belongs to, the
/// canonical event, and whatever correlation context the payload carried.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub key: WorkflowKey,
    pub event: WorkflowEvent,
    pub context: WorkflowContext,
}

/// Non-retryable decode failure: the trigger payload is missing a required
/// field or carries a value the coordinator cannot interpret.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed payload: missing required field `{field}`")]
    Missing { field: String },

    #[error("Malformed payload: field `{field}` has unexpected value `{value}`")]
    Invalid { field: String, value: String },
}

impl PayloadError {
    /// Malformed payloads never become well-formed on redelivery.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

/// Convert a raw trigger payload into a canonical event.
///
/// Performs no side effects and no I/O; pure decoding.
pub fn normalize(kind: TriggerKind, payload: &Value) -> Result<NormalizedEvent, PayloadError> {
    match kind {
        TriggerKind::PullRequestOpened => decode_pull_request(payload, false),
        TriggerKind::PullRequestClosed => decode_pull_request(payload, true),
        TriggerKind::BuildStateChanged => decode_build(payload),
        TriggerKind::ObjectCreated => decode_object_created(payload),
        TriggerKind::EnvironmentReady => decode_environment(payload),
    }
}

fn decode_pull_request(payload: &Value, closed: bool) -> Result<NormalizedEvent, PayloadError> {
    let detail = field(payload, "detail", "detail")?;
    let pull_request = str_field(detail, "pullRequestId", "detail.pullRequestId")?;
    let repository = detail
        .get("repositoryNames")
        .and_then(|names| names.get(0))
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::Missing {
            field: "detail.repositoryNames[0]".into(),
        })?;
    let source_commit = str_field(detail, "sourceCommit", "detail.sourceCommit")?;
    let destination_commit = str_field(detail, "destinationCommit", "detail.destinationCommit")?;
    let requester = str_field(detail, "callerUserArn", "detail.callerUserArn")?;

    let key = WorkflowKey::pull_request(repository, pull_request);
    let mut context = WorkflowContext::for_repository(RepositoryName::new(repository));
    context.source_commit = Some(CommitId::new(source_commit));
    context.destination_commit = Some(CommitId::new(destination_commit));
    context.source_reference = opt_str_field(detail, "sourceReference").map(str::to_string);
    context.destination_reference =
        opt_str_field(detail, "destinationReference").map(str::to_string);
    context.requester = Some(requester.to_string());

    let event = if closed {
        // the release build checks out the destination reference, so a
        // close payload without one is unusable
        if context.destination_reference.is_none() {
            return Err(PayloadError::Missing {
                field: "detail.destinationReference".into(),
            });
        }
        WorkflowEvent::SourceClosed {
            merged: bool_field(detail, "isMerged", "detail.isMerged")?,
        }
    } else {
        if context.source_reference.is_none() {
            return Err(PayloadError::Missing {
                field: "detail.sourceReference".into(),
            });
        }
        WorkflowEvent::SourceOpened
    };

    Ok(NormalizedEvent {
        key,
        event,
        context,
    })
}

fn decode_build(payload: &Value) -> Result<NormalizedEvent, PayloadError> {
    let detail = field(payload, "detail", "detail")?;
    let status_raw = str_field(detail, "build-status", "detail.build-status")?;
    let status = status_raw
        .parse::<BuildStatus>()
        .map_err(|_| PayloadError::Invalid {
            field: "detail.build-status".into(),
            value: status_raw.to_string(),
        })?;

    let info = field(
        detail,
        "additional-information",
        "detail.additional-information",
    )?;
    let env_raw = info
        .get("environment")
        .and_then(|e| e.get("environment-variables"))
        .ok_or_else(|| PayloadError::Missing {
            field: "detail.additional-information.environment.environment-variables".into(),
        })?;
    let env: Vec<EnvVar> =
        serde_json::from_value(env_raw.clone()).map_err(|_| PayloadError::Invalid {
            field: "detail.additional-information.environment.environment-variables".into(),
            value: env_raw.to_string(),
        })?;

    let logs = info
        .get("logs")
        .and_then(|l| l.get("deep-link"))
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::Missing {
            field: "detail.additional-information.logs.deep-link".into(),
        })?;
    let artifact = info
        .get("artifact")
        .and_then(|a| a.get("location"))
        .and_then(Value::as_str)
        .filter(|location| !location.is_empty())
        .map(str::to_string);
    if status.is_success() && artifact.is_none() {
        return Err(PayloadError::Missing {
            field: "detail.additional-information.artifact.location".into(),
        });
    }

    let repository = require_env(&env, correlation::REPO_NAME)?;
    let key = if let Some(pull_request) = env_value(&env, correlation::PR_ID) {
        WorkflowKey::pull_request(repository, pull_request)
    } else if let Some(version) = env_value(&env, correlation::RELEASE_VERSION) {
        WorkflowKey::release(repository, version)
    } else {
        return Err(PayloadError::Missing {
            field: format!("environment-variables.{}", correlation::PR_ID),
        });
    };

    let mut context = WorkflowContext::for_repository(RepositoryName::new(repository));
    context.source_commit = env_value(&env, correlation::COMMIT_ID).map(CommitId::new);
    context.destination_commit = env_value(&env, correlation::DEST_COMMIT_ID).map(CommitId::new);
    context.destination_reference =
        env_value(&env, correlation::REPO_REF_FULL_NAME).map(str::to_string);
    context.requester = env_value(&env, correlation::CALLER_ARN).map(str::to_string);
    if !key.is_release() && context.source_commit.is_none() {
        // the promoted-artifact key embeds the commit, so it must travel
        // with every pull-request build
        return Err(PayloadError::Missing {
            field: format!("environment-variables.{}", correlation::COMMIT_ID),
        });
    }

    Ok(NormalizedEvent {
        key,
        event: WorkflowEvent::BuildCompleted {
            status,
            artifact,
            logs: logs.to_string(),
        },
        context,
    })
}

fn decode_object_created(payload: &Value) -> Result<NormalizedEvent, PayloadError> {
    let record = payload
        .get("Records")
        .and_then(|records| records.get(0))
        .ok_or_else(|| PayloadError::Missing {
            field: "Records[0]".into(),
        })?;
    let s3 = field(record, "s3", "Records[0].s3")?;
    let bucket = s3
        .get("bucket")
        .and_then(|b| b.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::Missing {
            field: "Records[0].s3.bucket.name".into(),
        })?;
    let object_key = s3
        .get("object")
        .and_then(|o| o.get("key"))
        .and_then(Value::as_str)
        .ok_or_else(|| PayloadError::Missing {
            field: "Records[0].s3.object.key".into(),
        })?;

    // the release version is the leading path segment of the object key
    let version = object_key
        .split('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| PayloadError::Invalid {
            field: "Records[0].s3.object.key".into(),
            value: object_key.to_string(),
        })?;

    Ok(NormalizedEvent {
        key: WorkflowKey::release(bucket, version),
        event: WorkflowEvent::ArtifactArrived {
            location: ObjectLocation::new(bucket, object_key),
        },
        context: WorkflowContext::for_repository(RepositoryName::new(bucket)),
    })
}

fn decode_environment(payload: &Value) -> Result<NormalizedEvent, PayloadError> {
    let detail = field(payload, "detail", "detail")?;
    let pull_request = str_field(detail, "pullRequestId", "detail.pullRequestId")?;
    let repository = str_field(detail, "repositoryName", "detail.repositoryName")?;
    let url = str_field(detail, "environmentUrl", "detail.environmentUrl")?;

    Ok(NormalizedEvent {
        key: WorkflowKey::pull_request(repository, pull_request),
        event: WorkflowEvent::EnvironmentReady {
            url: url.to_string(),
        },
        context: WorkflowContext::for_repository(RepositoryName::new(repository)),
    })
}

fn field<'a>(value: &'a Value, name: &str, path: &str) -> Result<&'a Value, PayloadError> {
    value.get(name).ok_or_else(|| PayloadError::Missing {
        field: path.to_string(),
    })
}

fn str_field<'a>(value: &'a Value, name: &str, path: &str) -> Result<&'a str, PayloadError> {
    let raw = field(value, name, path)?;
    raw.as_str().ok_or_else(|| PayloadError::Invalid {
        field: path.to_string(),
        value: raw.to_string(),
    })
}

fn opt_str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

// Source-control events serialize booleans inconsistently (`true` vs
// `"True"`), so accept both.
fn bool_field(value: &Value, name: &str, path: &str) -> Result<bool, PayloadError> {
    let raw = field(value, name, path)?;
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.as_str() {
            "True" | "true" => Ok(true),
            "False" | "false" => Ok(false),
            other => Err(PayloadError::Invalid {
                field: path.to_string(),
                value: other.to_string(),
            }),
        },
        other => Err(PayloadError::Invalid {
            field: path.to_string(),
            value: other.to_string(),
        }),
    }
}

fn env_value<'a>(vars: &'a [EnvVar], name: &str) -> Option<&'a str> {
    vars.iter()
        .find(|var| var.name == name)
        .map(|var| var.value.as_str())
}

fn require_env<'a>(vars: &'a [EnvVar], name: &str) -> Result<&'a str, PayloadError> {
    env_value(vars, name).ok_or_else(|| PayloadError::Missing {
        field: format!("environment-variables.{name}"),
    })
}
