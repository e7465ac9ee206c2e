#![forbid(unsafe_code)]

//! Shared model and pure logic for validating a multi-service deployment.
//!
//! Everything here is deterministic: probing, process execution and state
//! persistence live in `healthgate-runner`.

pub mod classify;
pub mod diff;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod hashing;
pub mod issue;
pub mod manifest;
pub mod model;
pub mod priority;
pub mod run;
pub mod safety;
pub mod time;

pub use error::ConfigError;
pub use issue::*;
pub use model::*;
pub use run::*;
pub use time::*;
