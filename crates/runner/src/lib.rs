#![forbid(unsafe_code)]

//! Effectful side of healthgate: runtime queries, HTTP discovery and probing,
//! repairs, persisted run state and report rendering.

pub mod context;
pub mod discovery;
pub mod engine;
pub mod preflight;
pub mod probe;
pub mod repair;
pub mod report;
pub mod runtime;
pub mod store;
pub mod topology;
pub mod util;

pub use context::{RunContext, RunOptions};
pub use engine::{run, RunOutcome};
pub use runtime::{CommandOutcome, CommandRuntime, Runtime, RuntimeError};
pub use store::StateStore;
