use prflow_shared::BuildRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a running build is for.
///
/// A validation build checks out the proposed change and feeds the preview
/// environment; a release build checks out the merged destination (or a
/// versioned artifact) and feeds promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildGoal {
    Validation,
    Release,
}

impl fmt::Display for BuildGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildGoal::Validation => write!(f, "VALIDATION"),
            BuildGoal::Release => write!(f, "RELEASE"),
        }
    }
}

/// State of one workflow. Exactly one state holds per workflow key at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowState {
    /// Created, build not yet requested.
    AwaitingBuild,
    /// A build was issued. `build` is filled once the build service reports
    /// the assigned id.
    BuildRunning {
        goal: BuildGoal,
        build: Option<BuildRef>,
    },
    /// The build finished unsuccessfully. Keeps the log link for rendering.
    BuildFailed { logs: String },
    /// Artifact copied, preview environment coming up. Keeps the log link
    /// for the eventual passing comment.
    EnvironmentProvisioning { logs: String },
    /// Preview environment is live.
    EnvironmentReady { url: String },
    /// Release build promoted. Terminal.
    Merged,
    /// Preview environment torn down. Terminal.
    TornDown,
}

impl WorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::AwaitingBuild => "AWAITING_BUILD",
            WorkflowState::BuildRunning { .. } => "BUILD_RUNNING",
            WorkflowState::BuildFailed { .. } => "BUILD_FAILED",
            WorkflowState::EnvironmentProvisioning { .. } => "ENVIRONMENT_PROVISIONING",
            WorkflowState::EnvironmentReady { .. } => "ENVIRONMENT_READY",
            WorkflowState::Merged => "MERGED",
            WorkflowState::TornDown => "TORN_DOWN",
        }
    }

    /// Terminal states reject all further transitions; that is the only
    /// cancellation mechanism the coordinator has.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Merged | WorkflowState::TornDown)
    }

    pub fn is_build_running(&self) -> bool {
        matches!(self, WorkflowState::BuildRunning { .. })
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(WorkflowState::Merged.is_terminal());
        assert!(WorkflowState::TornDown.is_terminal());
        assert!(!WorkflowState::AwaitingBuild.is_terminal());
        assert!(!WorkflowState::BuildRunning {
            goal: BuildGoal::Validation,
            build: None
        }
        .is_terminal());
        assert!(!WorkflowState::BuildFailed {
            logs: "https://logs.example/1".into()
        }
        .is_terminal());
    }

    #[test]
    fn state_names() {
        assert_eq!(WorkflowState::AwaitingBuild.to_string(), "AWAITING_BUILD");
        assert_eq!(
            WorkflowState::EnvironmentReady {
                url: "https://pr42.preview.example".into()
            }
            .to_string(),
            "ENVIRONMENT_READY"
        );
    }
}
