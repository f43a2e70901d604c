//! # prflow-application
//!
//! Application layer for the change-lifecycle coordinator:
//!
//! - [`config`]: environment-sourced deploy-time configuration
//! - [`dispatcher`]: idempotency-keyed execution of saga actions against
//!   the collaborator ports
//! - [`processor`]: the per-event use case — normalize, load, transition,
//!   compare-and-swap, dispatch, feed internal follow-ups back
//!
//! Each trigger delivery is handled by one stateless invocation; all
//! shared state lives behind the workflow store port.

pub mod config;
pub mod dispatcher;
pub mod processor;

pub use config::{ConfigError, CoordinatorConfig};
pub use dispatcher::{ActionDispatcher, ActionOutcome, DispatchError, DispatcherConfig};
pub use processor::{EventProcessor, Outcome, ProcessError, ProcessorConfig};
