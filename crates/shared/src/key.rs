use crate::error::SharedError;
use crate::ids::{PullRequestId, ReleaseVersion, RepositoryName};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies one tracked unit of coordinated work.
///
/// A workflow key is stable for the lifetime of its workflow and doubles as
/// the storage key for the workflow state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowKey {
    /// Pull-request validation workflow.
    PullRequest {
        repository: RepositoryName,
        pull_request: PullRequestId,
    },
    /// Release workflow tracked per artifact version.
    Release {
        repository: RepositoryName,
        version: ReleaseVersion,
    },
}

impl WorkflowKey {
    pub fn pull_request(
        repository: impl Into<String>,
        pull_request: impl Into<String>,
    ) -> Self {
        Self::PullRequest {
            repository: RepositoryName::new(repository),
            pull_request: PullRequestId::new(pull_request),
        }
    }

    pub fn release(repository: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Release {
            repository: RepositoryName::new(repository),
            version: ReleaseVersion::new(version),
        }
    }

    pub fn repository(&self) -> &RepositoryName {
        match self {
            Self::PullRequest { repository, .. } => repository,
            Self::Release { repository, .. } => repository,
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, Self::Release { .. })
    }

    /// Preview-environment alias for pull-request workflows (`pr-{id}`).
    ///
    /// Release workflows deploy to the configured environment instead, so
    /// they have no per-workflow alias.
    pub fn environment_alias(&self) -> Option<String> {
        match self {
            Self::PullRequest { pull_request, .. } => Some(format!("pr-{pull_request}")),
            Self::Release { .. } => None,
        }
    }

    /// Canonical storage identifier, `pr/{repo}/{id}` or `release/{repo}/{version}`.
    pub fn storage_id(&self) -> String {
        match self {
            Self::PullRequest {
                repository,
                pull_request,
            } => format!("pr/{repository}/{pull_request}"),
            Self::Release {
                repository,
                version,
            } => format!("release/{repository}/{version}"),
        }
    }
}

impl fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.storage_id())
    }
}

impl FromStr for WorkflowKey {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SharedError::InvalidWorkflowKey {
            value: s.to_string(),
        };
        let mut parts = s.splitn(3, '/');
        let kind = parts.next().ok_or_else(invalid)?;
        let repository = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        let id = parts.next().filter(|p| !p.is_empty()).ok_or_else(invalid)?;
        match kind {
            "pr" => Ok(Self::pull_request(repository, id)),
            "release" => Ok(Self::release(repository, id)),
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_id_round_trips() {
        let pr = WorkflowKey::pull_request("svc", "42");
        assert_eq!(pr.storage_id(), "pr/svc/42");
        assert_eq!(pr.storage_id().parse::<WorkflowKey>().unwrap(), pr);

        let release = WorkflowKey::release("releases", "v1.2.3");
        assert_eq!(release.storage_id(), "release/releases/v1.2.3");
        assert_eq!(release.storage_id().parse::<WorkflowKey>().unwrap(), release);
    }

    #[test]
    fn environment_alias_only_for_pull_requests() {
        let pr = WorkflowKey::pull_request("svc", "42");
        assert_eq!(pr.environment_alias().as_deref(), Some("pr-42"));
        assert_eq!(WorkflowKey::release("releases", "v1.2.3").environment_alias(), None);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!("pr/svc".parse::<WorkflowKey>().is_err());
        assert!("deploy/svc/42".parse::<WorkflowKey>().is_err());
        assert!("pr//42".parse::<WorkflowKey>().is_err());
    }
}
