//! # prflow-domain
//!
//! Core domain for the change-lifecycle coordinator. This crate holds the
//! pure parts of the system and the ports the application layer drives:
//!
//! - [`event`]: canonical [`WorkflowEvent`], trigger kinds and the event
//!   normalizer that decodes raw trigger payloads
//! - [`state`]: the [`WorkflowState`] machine states
//! - [`workflow`]: the workflow aggregate and its correlation context
//! - [`saga`]: the pure transition function deciding next state and actions
//! - [`action`]: side-effecting [`Action`]s with deterministic idempotency keys
//! - [`notify`]: human-facing message rendering
//! - [`port`]: traits for the workflow state store and external collaborators
//!
//! Nothing in this crate performs I/O; all side effects live behind the
//! ports and are executed by the application layer.

pub mod action;
pub mod event;
pub mod notify;
pub mod port;
pub mod saga;
pub mod state;
pub mod workflow;

pub use action::{
    Action, ActionKind, ActionRecord, ActionStatus, BuildParams, BuildSource, CommentNote, EnvVar,
    IdempotencyKey, ObjectLocation,
};
pub use event::{
    correlation, normalize, BuildStatus, NormalizedEvent, PayloadError, TriggerKind, WorkflowEvent,
};
pub use notify::{Message, Notifier, NotifierConfig};
pub use port::{
    ActionGate, BuildService, CollaboratorError, CommentGateway, ObjectStore, StackInspector,
    StoreError, WorkflowStore,
};
pub use saga::{Saga, SagaConfig, Transition};
pub use state::{BuildGoal, WorkflowState};
pub use workflow::{Revision, VersionedWorkflow, Workflow, WorkflowContext};
