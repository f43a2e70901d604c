//! Recording fakes for the collaborator ports.
//!
//! Each fake records the calls it receives and can be flipped into a
//! failing mode to exercise the retry path.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use prflow_domain::port::collaborators::{
    BuildService, CollaboratorError, CommentGateway, ObjectStore, StackInspector,
};
use prflow_domain::{BuildSource, EnvVar, ObjectLocation, WorkflowContext};
use prflow_shared::{BuildRef, WorkflowKey};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// One recorded `start_build` invocation.
#[derive(Debug, Clone)]
pub struct StartedBuild {
    pub project: String,
    pub source: BuildSource,
    pub env: Vec<EnvVar>,
    pub build: BuildRef,
}

/// Build service fake handing out sequential build ids.
#[derive(Debug, Default)]
pub struct RecordingBuildService {
    starts: Mutex<Vec<StartedBuild>>,
    next_id: AtomicU64,
    fail: AtomicBool,
}

impl RecordingBuildService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a retryable error.
    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> Vec<StartedBuild> {
        self.starts.lock().clone()
    }

    pub fn start_count(&self) -> usize {
        self.starts.lock().len()
    }
}

#[async_trait]
impl BuildService for RecordingBuildService {
    async fn start_build(
        &self,
        project: &str,
        source: &BuildSource,
        env: &[EnvVar],
    ) -> Result<BuildRef, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("build service down"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let build = BuildRef::new(format!("{project}:build-{id}"));
        self.starts.lock().push(StartedBuild {
            project: project.to_string(),
            source: source.clone(),
            env: env.to_vec(),
            build: build.clone(),
        });
        Ok(build)
    }
}

/// Object store fake recording copies.
#[derive(Debug, Default)]
pub struct RecordingObjectStore {
    copies: Mutex<Vec<(String, ObjectLocation)>>,
    fail: AtomicBool,
}

impl RecordingObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn copies(&self) -> Vec<(String, ObjectLocation)> {
        self.copies.lock().clone()
    }

    pub fn copy_count(&self) -> usize {
        self.copies.lock().len()
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn copy_object(
        &self,
        source: &str,
        destination: &ObjectLocation,
    ) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("object store down"));
        }
        self.copies
            .lock()
            .push((source.to_string(), destination.clone()));
        Ok(())
    }
}

/// One recorded comment.
#[derive(Debug, Clone)]
pub struct PostedComment {
    pub key: WorkflowKey,
    pub body: String,
    pub request_token: String,
}

/// Comment gateway fake recording posts, deduplicated by request token the
/// way a real transport would be.
#[derive(Debug, Default)]
pub struct RecordingCommentGateway {
    comments: Mutex<Vec<PostedComment>>,
    seen_tokens: DashMap<String, ()>,
    fail: AtomicBool,
}

impl RecordingCommentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn comments(&self) -> Vec<PostedComment> {
        self.comments.lock().clone()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.lock().len()
    }
}

#[async_trait]
impl CommentGateway for RecordingCommentGateway {
    async fn post_comment(
        &self,
        key: &WorkflowKey,
        _context: &WorkflowContext,
        body: &str,
        request_token: &str,
    ) -> Result<(), CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("comment gateway down"));
        }
        if self
            .seen_tokens
            .insert(request_token.to_string(), ())
            .is_some()
        {
            // transport-side dedup: token already consumed
            return Ok(());
        }
        self.comments.lock().push(PostedComment {
            key: key.clone(),
            body: body.to_string(),
            request_token: request_token.to_string(),
        });
        Ok(())
    }
}

/// Stack inspector answering from a fixed output list.
#[derive(Debug, Default)]
pub struct StaticStackInspector {
    outputs: Vec<(String, String)>,
    fail: AtomicBool,
}

impl StaticStackInspector {
    pub fn new(outputs: Vec<(String, String)>) -> Self {
        Self {
            outputs,
            fail: AtomicBool::new(false),
        }
    }

    /// Inspector exposing a single `EnvironmentUrl` output.
    pub fn with_environment_url(url: impl Into<String>) -> Self {
        Self::new(vec![("EnvironmentUrl".to_string(), url.into())])
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StackInspector for StaticStackInspector {
    async fn describe_outputs(
        &self,
        _stack_name: &str,
    ) -> Result<Vec<(String, String)>, CollaboratorError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("stack inspector down"));
        }
        Ok(self.outputs.clone())
    }
}
