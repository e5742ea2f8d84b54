//! dockflow job scheduling
//!
//! Runs batches of independent external-program invocations and returns once
//! every one of them has finished.
//!
//! ## Key Components
//!
//! - `Job` / `JobOutcome`: one invocation and what it left on disk
//! - `LocalScheduler`: bounded pool of child processes
//! - `HpcScheduler`: batch scripts submitted through a `QueueBackend`
//! - `get_engine`: scheduler factory keyed by execution mode

pub mod engine;
mod error;
pub mod fakes;
pub mod hpc;
pub mod job;
pub mod local;
pub mod queue;

pub use engine::{engine_from_params, get_engine, EngineMode, RunReport, Scheduler};
pub use error::{Result, SchedError};
pub use hpc::{HpcConfig, HpcScheduler};
pub use job::{swap_extension, Job, JobOutcome};
pub use local::{parse_ncores, LocalScheduler};
pub use queue::{QueueBackend, QueueJobId, QueueState, SlurmBackend};
