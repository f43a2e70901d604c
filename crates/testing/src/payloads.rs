//! Builders for raw trigger payloads, shaped like the transports deliver
//! them. Used to exercise the event normalizer end to end.

use serde_json::{json, Value};

/// Pull-request opened payload.
pub fn pull_request_opened(
    repository: &str,
    pull_request: &str,
    source_reference: &str,
    source_commit: &str,
    destination_commit: &str,
) -> Value {
    json!({
        "detail": {
            "pullRequestId": pull_request,
            "repositoryNames": [repository],
            "sourceReference": source_reference,
            "sourceCommit": source_commit,
            "destinationCommit": destination_commit,
            "destinationReference": "refs/heads/main",
            "callerUserArn": "arn:user/dev",
            "author": "dev",
        }
    })
}

/// Pull-request closed payload. `merged` is serialized as the string form
/// some transports use.
pub fn pull_request_closed(
    repository: &str,
    pull_request: &str,
    source_commit: &str,
    destination_reference: &str,
    merged: bool,
) -> Value {
    json!({
        "detail": {
            "pullRequestId": pull_request,
            "repositoryNames": [repository],
            "sourceCommit": source_commit,
            "destinationCommit": "beef01",
            "destinationReference": destination_reference,
            "callerUserArn": "arn:user/dev",
            "author": "dev",
            "isMerged": (if merged { "True" } else { "False" }),
        }
    })
}

/// Build completion payload carrying correlation environment variables.
pub fn build_completed(
    status: &str,
    env: &[(&str, &str)],
    artifact_location: &str,
    logs_link: &str,
) -> Value {
    let vars: Vec<Value> = env
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value, "type": "PLAINTEXT"}))
        .collect();
    json!({
        "detail": {
            "build-status": status,
            "additional-information": {
                "environment": {"environment-variables": vars},
                "logs": {"deep-link": logs_link},
                "artifact": {"location": artifact_location},
            }
        }
    })
}

/// Object-created payload for a versioned artifact key.
pub fn artifact_arrived(bucket: &str, object_key: &str) -> Value {
    json!({
        "Records": [{
            "s3": {
                "bucket": {"name": bucket},
                "object": {"key": object_key},
            }
        }]
    })
}

/// Environment-ready callback payload.
pub fn environment_ready(repository: &str, pull_request: &str, url: &str) -> Value {
    json!({
        "detail": {
            "pullRequestId": pull_request,
            "repositoryName": repository,
            "environmentUrl": url,
        }
    })
}
