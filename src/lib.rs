//! drover drives a stateless external coding agent through a bounded
//! iteration loop: assemble context, invoke the agent, validate its
//! planning artifacts, detect stalls and loops, checkpoint, repeat. A
//! swarm layer spawns and coordinates subordinate loops over a shared
//! filesystem namespace.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod id;
pub mod invoke;
pub mod metrics;
pub mod swarm;
pub mod tasks;
pub mod validate;

pub use config::GlobalConfig;
pub use controller::{Controller, Outcome, RunOptions};
pub use error::{DroverError, Result};
pub use invoke::Tool;
