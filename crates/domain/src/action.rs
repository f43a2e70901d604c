//! Side-effecting actions the saga issues against external collaborators.
//!
//! Every action derives a deterministic idempotency key from the workflow
//! key, the action kind and a fingerprint of the parameters that matter.
//! Dispatch consults the [`ActionRecord`] store under that key, so a
//! redelivered event can recompute the same action and still apply it at
//! most once.

use chrono::{DateTime, Utc};
use prflow_shared::{BuildRef, CommitId, WorkflowKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Name/value pair forwarded to (or received from) the build service
/// environment. Carries the correlation ids that stitch build completions
/// back to their workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where the build service fetches sources from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildSource {
    /// Check out a source-control reference, optionally pinned to a commit.
    Reference {
        reference: String,
        commit: Option<CommitId>,
    },
    /// Fetch a prepared artifact from object storage.
    Artifact { location: String },
}

impl BuildSource {
    /// Source-version string understood by the build service:
    /// `reference^{commit}` when pinned, the bare reference otherwise.
    /// Artifact sources have no source version; they override the source
    /// location instead.
    pub fn source_version(&self) -> Option<String> {
        match self {
            BuildSource::Reference {
                reference,
                commit: Some(commit),
            } => Some(format!("{reference}^{{{commit}}}")),
            BuildSource::Reference {
                reference,
                commit: None,
            } => Some(reference.clone()),
            BuildSource::Artifact { .. } => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            BuildSource::Reference { .. } => {
                format!("ref:{}", self.source_version().unwrap_or_default())
            }
            BuildSource::Artifact { location } => format!("artifact:{location}"),
        }
    }
}

/// Parameters for a `StartBuild` action. The build project itself is
/// deploy-time configuration supplied by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    pub source: BuildSource,
    pub env: Vec<EnvVar>,
}

/// Object-store location: bucket plus object key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Semantic content of a comment; the notifier renders the actual text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentNote {
    BuildStarted {
        build: BuildRef,
    },
    BuildFailed {
        logs: String,
    },
    BuildPassed {
        logs: String,
        environment_url: Option<String>,
    },
}

impl CommentNote {
    fn fingerprint(&self) -> String {
        match self {
            CommentNote::BuildStarted { build } => format!("started:{build}"),
            CommentNote::BuildFailed { logs } => format!("failed:{logs}"),
            CommentNote::BuildPassed {
                logs,
                environment_url,
            } => format!(
                "passed:{logs}:{}",
                environment_url.as_deref().unwrap_or("-")
            ),
        }
    }
}

/// One side effect to apply against an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    StartBuild { params: BuildParams },
    CopyArtifact { source: String, destination: ObjectLocation },
    PostComment { note: CommentNote },
    TeardownEnvironment { environment: String },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::StartBuild { .. } => ActionKind::StartBuild,
            Action::CopyArtifact { .. } => ActionKind::CopyArtifact,
            Action::PostComment { .. } => ActionKind::PostComment,
            Action::TeardownEnvironment { .. } => ActionKind::TeardownEnvironment,
        }
    }

    /// Deterministic key: same workflow, same kind, same relevant
    /// parameters — same key, regardless of when or how often the action
    /// is recomputed.
    pub fn idempotency_key(&self, key: &WorkflowKey) -> IdempotencyKey {
        IdempotencyKey::derive(key, self.kind(), &self.fingerprint())
    }

    fn fingerprint(&self) -> String {
        match self {
            Action::StartBuild { params } => {
                let env: Vec<String> = params
                    .env
                    .iter()
                    .map(|v| format!("{}={}", v.name, v.value))
                    .collect();
                format!("{}|{}", params.source.describe(), env.join(","))
            }
            Action::CopyArtifact {
                source,
                destination,
            } => format!("{source}->{destination}"),
            Action::PostComment { note } => note.fingerprint(),
            Action::TeardownEnvironment { environment } => environment.clone(),
        }
    }
}

/// Discriminant of an [`Action`], used in idempotency keys and records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    StartBuild,
    CopyArtifact,
    PostComment,
    TeardownEnvironment,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::StartBuild => write!(f, "start-build"),
            ActionKind::CopyArtifact => write!(f, "copy-artifact"),
            ActionKind::PostComment => write!(f, "post-comment"),
            ActionKind::TeardownEnvironment => write!(f, "teardown-environment"),
        }
    }
}

/// Deterministic identifier ensuring an action applies at most once.
///
/// Shape: `{workflow storage id}/{action kind}/{short parameter digest}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(key: &WorkflowKey, kind: ActionKind, fingerprint: &str) -> Self {
        let digest = Sha256::digest(fingerprint.as_bytes());
        let short: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self(format!("{}/{kind}/{short}", key.storage_id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Processing status of a dispatched action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Succeeded,
    Failed,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Pending => write!(f, "PENDING"),
            ActionStatus::Succeeded => write!(f, "SUCCEEDED"),
            ActionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Persisted outcome of a dispatched action, keyed by idempotency key.
///
/// Invariant: at most one record with status `Succeeded` exists per key;
/// the store's insert-if-absent gate plus single-writer completion keep it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub record_id: Uuid,
    pub key: IdempotencyKey,
    pub kind: ActionKind,
    pub workflow: WorkflowKey,
    pub status: ActionStatus,
    /// Collaborator-assigned reference (build id, destination key, ...).
    pub external_ref: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionRecord {
    pub fn pending(workflow: WorkflowKey, key: IdempotencyKey, kind: ActionKind) -> Self {
        let now = Utc::now();
        Self {
            record_id: Uuid::new_v4(),
            key,
            kind,
            workflow,
            status: ActionStatus::Pending,
            external_ref: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Succeeded
    }
}

/// Strip any scheme or resource-name prefix from a reported artifact
/// location, leaving `bucket/key...`.
pub fn artifact_source_key(location: &str) -> &str {
    location
        .rsplit(':')
        .next()
        .unwrap_or(location)
        .trim_start_matches('/')
}

/// The build id is the last path segment of the artifact location.
pub fn artifact_build_id(location: &str) -> &str {
    artifact_source_key(location)
        .rsplit('/')
        .next()
        .unwrap_or_default()
}

/// Deterministic destination key for a promoted artifact. A retried copy
/// lands on the same object, so the copy is idempotent at the storage
/// layer as well.
pub fn artifact_destination_key(alias: &str, commit: &str, build_id: &str) -> String {
    format!("{alias}/{commit}/{build_id}/artifact.zip")
}

/// Copy source is the artifact directory's `artifact.zip` object.
pub fn artifact_copy_source(location: &str) -> String {
    format!("{}/artifact.zip", artifact_source_key(location))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_version_pins_commit() {
        let source = BuildSource::Reference {
            reference: "refs/heads/feature".into(),
            commit: Some(CommitId::new("c0ffee")),
        };
        assert_eq!(
            source.source_version().as_deref(),
            Some("refs/heads/feature^{c0ffee}")
        );

        let bare = BuildSource::Reference {
            reference: "refs/heads/main".into(),
            commit: None,
        };
        assert_eq!(bare.source_version().as_deref(), Some("refs/heads/main"));

        let artifact = BuildSource::Artifact {
            location: "releases/v1.2.3/app.zip".into(),
        };
        assert_eq!(artifact.source_version(), None);
    }

    #[test]
    fn artifact_key_derivation() {
        // resource-name style location reported by the build service
        let location = "arn:aws:s3:::builds/42/build-7";
        assert_eq!(artifact_source_key(location), "builds/42/build-7");
        assert_eq!(artifact_build_id(location), "build-7");
        assert_eq!(
            artifact_copy_source(location),
            "builds/42/build-7/artifact.zip"
        );

        // url style location
        let url = "s3://bucket/42/build-7";
        assert_eq!(artifact_source_key(url), "bucket/42/build-7");
        assert_eq!(artifact_build_id(url), "build-7");

        assert_eq!(
            artifact_destination_key("pr-42", "c0ffee", "build-7"),
            "pr-42/c0ffee/build-7/artifact.zip"
        );
    }

    #[test]
    fn idempotency_key_is_deterministic() {
        let key = WorkflowKey::pull_request("svc", "42");
        let action = Action::CopyArtifact {
            source: "builds/42/build-7/artifact.zip".into(),
            destination: ObjectLocation::new("artifacts", "pr-42/c0ffee/build-7/artifact.zip"),
        };
        let a = action.idempotency_key(&key);
        let b = action.idempotency_key(&key);
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("pr/svc/42/copy-artifact/"));
    }

    #[test]
    fn idempotency_key_changes_with_parameters() {
        let key = WorkflowKey::pull_request("svc", "42");
        let first = Action::PostComment {
            note: CommentNote::BuildFailed {
                logs: "https://logs.example/1".into(),
            },
        };
        let second = Action::PostComment {
            note: CommentNote::BuildPassed {
                logs: "https://logs.example/1".into(),
                environment_url: None,
            },
        };
        assert_ne!(first.idempotency_key(&key), second.idempotency_key(&key));

        let other_key = WorkflowKey::pull_request("svc", "43");
        assert_ne!(first.idempotency_key(&key), first.idempotency_key(&other_key));
    }

    #[test]
    fn pending_record_defaults() {
        let workflow = WorkflowKey::pull_request("svc", "42");
        let action = Action::TeardownEnvironment {
            environment: "pr-42".into(),
        };
        let record = ActionRecord::pending(
            workflow.clone(),
            action.idempotency_key(&workflow),
            action.kind(),
        );
        assert_eq!(record.status, ActionStatus::Pending);
        assert!(!record.succeeded());
        assert_eq!(record.external_ref, None);
    }
}
