//! Human-facing message rendering.
//!
//! Pure formatting only; the action dispatcher performs the actual post.

use crate::action::CommentNote;

/// Rendering configuration: where the status badges live.
///
/// Badge hosting is environment-specific plumbing, so it stays here rather
/// than in the saga.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub badge_passing_url: String,
    pub badge_failing_url: String,
}

impl NotifierConfig {
    pub fn new(badge_passing_url: impl Into<String>, badge_failing_url: impl Into<String>) -> Self {
        Self {
            badge_passing_url: badge_passing_url.into(),
            badge_failing_url: badge_failing_url.into(),
        }
    }

    /// Badge URLs for the hosted badge bucket of a region. The bucket host
    /// is plain `s3` in `us-east-1` and `s3-{region}` everywhere else.
    pub fn for_region(region: &str) -> Self {
        let host = if region == "us-east-1" {
            "s3".to_string()
        } else {
            format!("s3-{region}")
        };
        Self {
            badge_passing_url: format!(
                "https://{host}.amazonaws.com/codefactory-{region}-prod-default-build-badges/passing.svg"
            ),
            badge_failing_url: format!(
                "https://{host}.amazonaws.com/codefactory-{region}-prod-default-build-badges/failing.svg"
            ),
        }
    }
}

/// A rendered message body, ready for a comment gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: String,
}

/// Renders workflow outcomes into markdown comments.
#[derive(Debug, Clone)]
pub struct Notifier {
    config: NotifierConfig,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self { config }
    }

    /// Full comment for the pull-request conversation.
    pub fn render(&self, note: &CommentNote) -> Message {
        let body = match note {
            CommentNote::BuildStarted { build } => {
                format!("Build with id {build} has started....")
            }
            CommentNote::BuildFailed { logs } => format!(
                "![Failing]({} \"Failing\") - See: [Logs]({logs})",
                self.config.badge_failing_url
            ),
            CommentNote::BuildPassed {
                logs,
                environment_url: Some(url),
            } => format!(
                "![Passing]({} \"Passing\") - See: [Logs]({logs}) | [Test Environment]({url})",
                self.config.badge_passing_url
            ),
            CommentNote::BuildPassed {
                logs,
                environment_url: None,
            } => format!(
                "![Passing]({} \"Passing\") - See: [Logs]({logs})",
                self.config.badge_passing_url
            ),
        };
        Message { body }
    }

    /// Short form without the environment link, for channel-style
    /// transports.
    pub fn render_summary(&self, note: &CommentNote) -> Message {
        let body = match note {
            CommentNote::BuildStarted { build } => {
                format!("Build with id {build} has started....")
            }
            CommentNote::BuildFailed { logs } => format!(
                "![Failing]({} \"Failing\") - See the [Logs]({logs})",
                self.config.badge_failing_url
            ),
            CommentNote::BuildPassed { logs, .. } => format!(
                "![Passing]({} \"Passing\") - See the [Logs]({logs})",
                self.config.badge_passing_url
            ),
        };
        Message { body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prflow_shared::BuildRef;

    fn notifier() -> Notifier {
        Notifier::new(NotifierConfig::new(
            "https://badges.example/passing.svg",
            "https://badges.example/failing.svg",
        ))
    }

    #[test]
    fn passing_comment_links_logs_and_environment() {
        let message = notifier().render(&CommentNote::BuildPassed {
            logs: "https://logs.example/7".into(),
            environment_url: Some("https://pr42.preview.example".into()),
        });
        assert_eq!(
            message.body,
            "![Passing](https://badges.example/passing.svg \"Passing\") - \
             See: [Logs](https://logs.example/7) | [Test Environment](https://pr42.preview.example)"
        );
    }

    #[test]
    fn failing_comment_links_logs_only() {
        let message = notifier().render(&CommentNote::BuildFailed {
            logs: "https://logs.example/7".into(),
        });
        assert_eq!(
            message.body,
            "![Failing](https://badges.example/failing.svg \"Failing\") - \
             See: [Logs](https://logs.example/7)"
        );
    }

    #[test]
    fn started_comment_names_the_build() {
        let message = notifier().render(&CommentNote::BuildStarted {
            build: BuildRef::new("proj:build-7"),
        });
        assert_eq!(message.body, "Build with id proj:build-7 has started....");
    }

    #[test]
    fn summary_never_links_the_environment() {
        let message = notifier().render_summary(&CommentNote::BuildPassed {
            logs: "https://logs.example/7".into(),
            environment_url: Some("https://pr42.preview.example".into()),
        });
        assert!(!message.body.contains("preview.example"));
        assert!(message.body.contains("See the [Logs]"));
    }

    #[test]
    fn regional_badge_hosts() {
        let east = NotifierConfig::for_region("us-east-1");
        assert!(east
            .badge_passing_url
            .starts_with("https://s3.amazonaws.com/"));

        let west = NotifierConfig::for_region("eu-west-1");
        assert!(west
            .badge_failing_url
            .starts_with("https://s3-eu-west-1.amazonaws.com/"));
        assert!(west.badge_failing_url.ends_with("failing.svg"));
    }
}
