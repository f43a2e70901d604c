//! Test support for the prflow workspace: recording fakes for the
//! collaborator ports and builders for raw trigger payloads.

pub mod collaborators;
pub mod payloads;

pub use collaborators::{
    PostedComment, RecordingBuildService, RecordingCommentGateway, RecordingObjectStore,
    StartedBuild, StaticStackInspector,
};
