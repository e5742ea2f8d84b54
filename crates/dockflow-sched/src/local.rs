//! Local scheduler: a bounded pool of child processes on this machine.

use crate::engine::{RunReport, Scheduler};
use crate::error::Result;
use crate::job::{Job, JobOutcome};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Number of workers for a requested core count.
///
/// `None` uses every logical core, values `<= 0` use one, values above the
/// available parallelism are clamped to it.
pub fn parse_ncores(requested: Option<i64>) -> usize {
    let available = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match requested {
        None => available,
        Some(n) if n <= 0 => 1,
        Some(n) => (n as usize).min(available),
    }
}

/// Runs jobs as local child processes, at most `ncores` at a time.
#[derive(Debug, Clone)]
pub struct LocalScheduler {
    ncores: usize,
    job_timeout: Option<Duration>,
}

impl LocalScheduler {
    pub fn new(ncores: Option<i64>) -> Self {
        let ncores = parse_ncores(ncores);
        info!("Scheduler configured for {} cpu cores.", ncores);
        Self {
            ncores,
            job_timeout: None,
        }
    }

    /// Kill jobs that run longer than `timeout`.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn ncores(&self) -> usize {
        self.ncores
    }
}

#[async_trait]
impl Scheduler for LocalScheduler {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn run(&self, jobs: &[Job]) -> Result<RunReport> {
        if jobs.is_empty() {
            return Ok(RunReport::default());
        }

        let start = Instant::now();
        let workers = self.ncores.min(jobs.len()).max(1);
        info!(tasks = jobs.len(), workers, "{} tasks ready.", jobs.len());

        let permits = Arc::new(Semaphore::new(workers));
        let handles: Vec<JoinHandle<JobOutcome>> = jobs
            .iter()
            .cloned()
            .map(|job| {
                let permits = Arc::clone(&permits);
                let timeout = self.job_timeout;
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    job.execute(timeout).await
                })
            })
            .collect();

        // Awaiting in submission order keeps outcomes aligned with `jobs`.
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (job, handle) in jobs.iter().zip(handles) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(job = %job.input.display(), error = %e, "job task aborted");
                    JobOutcome::observe(job, None, 0)
                }
            };
            outcomes.push(outcome);
        }

        let report = RunReport::new(outcomes, start.elapsed().as_millis() as u64);
        info!(
            tasks = report.len(),
            produced = report.produced_count(),
            duration_ms = report.duration_ms,
            "{} tasks finished",
            report.len()
        );
        Ok(report)
    }
}
