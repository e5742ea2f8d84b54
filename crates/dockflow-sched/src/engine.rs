//! Scheduler trait, run reports and the engine factory.

use crate::error::{Result, SchedError};
use crate::hpc::{HpcConfig, HpcScheduler};
use crate::job::{Job, JobOutcome};
use crate::local::LocalScheduler;
use crate::queue::SlurmBackend;
use async_trait::async_trait;
use dockflow_core::{Params, ParamsExt};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Result of one scheduler barrier, one outcome per job in submission order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub outcomes: Vec<JobOutcome>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(outcomes: Vec<JobOutcome>, duration_ms: u64) -> Self {
        Self {
            outcomes,
            duration_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Outcomes whose output file exists.
    pub fn produced(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.produced)
    }

    /// Outcomes whose output file is absent.
    pub fn missing(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.produced)
    }

    pub fn produced_count(&self) -> usize {
        self.produced().count()
    }
}

/// Runs a batch of jobs and returns once all of them are finished.
///
/// Individual job failures never fail `run`; callers inspect the report.
#[async_trait]
pub trait Scheduler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, jobs: &[Job]) -> Result<RunReport>;
}

/// Execution modes understood by [`get_engine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Hpc,
    Local,
}

impl EngineMode {
    pub const ALL: [EngineMode; 2] = [EngineMode::Hpc, EngineMode::Local];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Hpc => "hpc",
            EngineMode::Local => "local",
        }
    }

    fn available() -> String {
        Self::ALL
            .iter()
            .map(EngineMode::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineMode {
    type Err = SchedError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hpc" => Ok(EngineMode::Hpc),
            "local" => Ok(EngineMode::Local),
            other => Err(SchedError::UnknownMode {
                mode: other.to_string(),
                available: Self::available(),
            }),
        }
    }
}

/// Build the scheduler for `mode`, configured from module parameters.
///
/// `local` reads `ncores`; `hpc` reads `queue`, `queue_limit` and `concat`
/// and submits through Slurm.
pub fn get_engine(mode: &str, params: &Params) -> Result<Box<dyn Scheduler>> {
    let mode: EngineMode = mode.parse()?;
    debug!(mode = %mode, "building execution engine");
    match mode {
        EngineMode::Local => Ok(Box::new(LocalScheduler::new(
            params.opt_i64_param("ncores")?,
        ))),
        EngineMode::Hpc => Ok(Box::new(HpcScheduler::new(
            Arc::new(SlurmBackend::new()),
            HpcConfig::from_params(params)?,
        ))),
    }
}

/// [`get_engine`] for the `mode` parameter, `local` when unset.
pub fn engine_from_params(params: &Params) -> Result<Box<dyn Scheduler>> {
    let mode = params.opt_str_param("mode")?.unwrap_or("local");
    get_engine(mode, params)
}
