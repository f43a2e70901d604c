//! Deploy-time configuration, sourced from the environment.
//!
//! There is no CLI surface; everything the coordinator needs arrives as
//! opaque strings supplied at deploy time. Components receive the loaded
//! configuration at construction — no process-wide mutable state.

use std::time::Duration;
use thiserror::Error;

/// Build project to run validation, release and teardown builds in.
pub const ENV_BUILD_PROJECT: &str = "PRFLOW_BUILD_PROJECT";
/// Alias of the environment release artifacts are promoted to.
pub const ENV_ENVIRONMENT_ALIAS: &str = "PRFLOW_ENVIRONMENT_ALIAS";
/// Bucket promoted artifacts are copied into.
pub const ENV_ARTIFACT_BUCKET: &str = "PRFLOW_ARTIFACT_BUCKET";
/// Prefix of per-pull-request infrastructure stack names.
pub const ENV_STACK_NAME_PREFIX: &str = "PRFLOW_STACK_NAME_PREFIX";
/// Region the status badges are served from. Optional.
pub const ENV_BADGE_REGION: &str = "PRFLOW_BADGE_REGION";
/// Bound on every collaborator call, in seconds. Optional.
pub const ENV_CALL_TIMEOUT_SECS: &str = "PRFLOW_CALL_TIMEOUT_SECS";

const DEFAULT_BADGE_REGION: &str = "us-east-1";
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration errors surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {name}")]
    MissingVar { name: &'static str },

    #[error("Invalid value for {name}: {value}")]
    InvalidVar { name: &'static str, value: String },
}

/// Everything the coordinator needs to run, loaded once at startup.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub build_project: String,
    pub environment_alias: String,
    pub artifact_bucket: String,
    pub stack_name_prefix: String,
    pub badge_region: String,
    pub call_timeout: Duration,
}

impl CoordinatorConfig {
    pub fn new(
        build_project: impl Into<String>,
        environment_alias: impl Into<String>,
        artifact_bucket: impl Into<String>,
        stack_name_prefix: impl Into<String>,
    ) -> Self {
        Self {
            build_project: build_project.into(),
            environment_alias: environment_alias.into(),
            artifact_bucket: artifact_bucket.into(),
            stack_name_prefix: stack_name_prefix.into(),
            badge_region: DEFAULT_BADGE_REGION.to_string(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_badge_region(mut self, region: impl Into<String>) -> Self {
        self.badge_region = region.into();
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let call_timeout = match std::env::var(ENV_CALL_TIMEOUT_SECS) {
            Ok(raw) => {
                let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidVar {
                    name: ENV_CALL_TIMEOUT_SECS,
                    value: raw.clone(),
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_CALL_TIMEOUT,
        };
        Ok(Self {
            build_project: require(ENV_BUILD_PROJECT)?,
            environment_alias: require(ENV_ENVIRONMENT_ALIAS)?,
            artifact_bucket: require(ENV_ARTIFACT_BUCKET)?,
            stack_name_prefix: require(ENV_STACK_NAME_PREFIX)?,
            badge_region: std::env::var(ENV_BADGE_REGION)
                .unwrap_or_else(|_| DEFAULT_BADGE_REGION.to_string()),
            call_timeout,
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar { name })
}
