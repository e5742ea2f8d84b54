//! HPC scheduler: jobs are grouped into batch scripts and sent to a queue.
//!
//! - `concat` jobs share one script, one shell line each, so every job keeps
//!   its own output path
//! - at most `queue_limit` scripts are outstanding; a slot is released when the
//!   script leaves the queue, when submission fails, when the queue cannot be
//!   queried repeatedly, or when `batch_timeout` expires
//! - `run` returns once every script has been accounted for

use crate::engine::{RunReport, Scheduler};
use crate::error::{Result, SchedError};
use crate::job::{Job, JobOutcome};
use crate::queue::{QueueBackend, QueueState};
use async_trait::async_trait;
use futures::future::join_all;
use dockflow_core::{Params, ParamsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Consecutive status errors after which a batch is given up on.
const MAX_STATUS_ERRORS: u32 = 3;

/// Queue configuration of the HPC scheduler.
#[derive(Debug, Clone)]
pub struct HpcConfig {
    /// Target queue / partition; backend default when `None`.
    pub queue: Option<String>,
    /// Maximum outstanding submissions.
    pub queue_limit: usize,
    /// Jobs per submitted script.
    pub concat: usize,
    pub poll_interval: Duration,
    /// Cancel and release a batch after this long.
    pub batch_timeout: Option<Duration>,
    /// Where batch scripts are written. Defaults to a folder next to the first
    /// job's output.
    pub work_dir: Option<PathBuf>,
}

impl Default for HpcConfig {
    fn default() -> Self {
        Self {
            queue: None,
            queue_limit: 100,
            concat: 1,
            poll_interval: Duration::from_secs(10),
            batch_timeout: None,
            work_dir: None,
        }
    }
}

impl HpcConfig {
    /// Read `queue`, `queue_limit` and `concat` from module parameters.
    pub fn from_params(params: &Params) -> Result<Self> {
        let mut config = Self {
            queue: params.opt_str_param("queue")?.map(str::to_string),
            ..Self::default()
        };
        if let Some(limit) = params.opt_i64_param("queue_limit")? {
            config.queue_limit = positive("queue_limit", limit)?;
        }
        if let Some(concat) = params.opt_i64_param("concat")? {
            config.concat = positive("concat", concat)?;
        }
        Ok(config)
    }
}

fn positive(name: &str, value: i64) -> Result<usize> {
    if value < 1 {
        return Err(SchedError::InvalidParameter {
            name: name.to_string(),
            reason: format!("must be at least 1, got {}", value),
        });
    }
    Ok(value as usize)
}

/// Runs jobs through a [`QueueBackend`].
pub struct HpcScheduler {
    backend: Arc<dyn QueueBackend>,
    config: HpcConfig,
}

impl HpcScheduler {
    pub fn new(backend: Arc<dyn QueueBackend>, config: HpcConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &HpcConfig {
        &self.config
    }

    fn batch_dir(&self, jobs: &[Job]) -> PathBuf {
        let base = match &self.config.work_dir {
            Some(dir) => dir.clone(),
            None => jobs
                .first()
                .and_then(|job| job.output.parent())
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
        };
        let run_id = Uuid::new_v4().simple().to_string();
        base.join(format!("hpc_{}", &run_id[..8]))
    }
}

/// Body of the script running one batch of jobs.
///
/// The queue log is written as `<name>.out` in `batch_dir`.
pub fn render_batch_script(name: &str, batch: &[Job], batch_dir: &Path, cwd: &Path) -> String {
    let log = batch_dir.join(format!("{}.out", name));
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        format!("#SBATCH --job-name={}", name),
        format!("#SBATCH --output={}", log.display()),
        format!("cd {}", crate::job::shell_quote(&cwd.to_string_lossy())),
    ];
    lines.extend(batch.iter().map(Job::shell_line));
    lines.join("\n") + "\n"
}

async fn run_batch(
    backend: Arc<dyn QueueBackend>,
    permits: Arc<Semaphore>,
    script: PathBuf,
    queue: Option<String>,
    poll_interval: Duration,
    batch_timeout: Option<Duration>,
) {
    // Dropping the permit on any return path frees the queue slot.
    let _permit = permits.acquire_owned().await.ok();

    let id = match backend.submit(&script, queue.as_deref()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(batch = %script.display(), error = %e, "batch submission failed");
            return;
        }
    };

    let submitted = Instant::now();
    let mut status_errors = 0;
    loop {
        tokio::time::sleep(poll_interval).await;

        match backend.status(&id).await {
            Ok(state) if state.is_terminal() => {
                if state == QueueState::Failed {
                    warn!(batch = %script.display(), job_id = %id, "batch failed in queue");
                } else {
                    debug!(batch = %script.display(), job_id = %id, ?state, "batch left the queue");
                }
                return;
            }
            Ok(_) => status_errors = 0,
            Err(e) => {
                status_errors += 1;
                warn!(job_id = %id, error = %e, attempt = status_errors, "queue status failed");
                if status_errors >= MAX_STATUS_ERRORS {
                    warn!(job_id = %id, "giving up on batch after repeated status failures");
                    return;
                }
            }
        }

        if let Some(limit) = batch_timeout {
            if submitted.elapsed() >= limit {
                warn!(job_id = %id, timeout_secs = limit.as_secs(), "batch timed out, cancelling");
                if let Err(e) = backend.cancel(&id).await {
                    warn!(job_id = %id, error = %e, "cancel failed");
                }
                return;
            }
        }
    }
}

#[async_trait]
impl Scheduler for HpcScheduler {
    fn name(&self) -> &'static str {
        "hpc"
    }

    async fn run(&self, jobs: &[Job]) -> Result<RunReport> {
        if jobs.is_empty() {
            return Ok(RunReport::default());
        }

        let start = Instant::now();
        let concat = self.config.concat.max(1);
        let queue_limit = self.config.queue_limit.max(1);
        let batch_dir = self.batch_dir(jobs);
        std::fs::create_dir_all(&batch_dir)?;
        let cwd = std::env::current_dir()?;
        let log_dir = if batch_dir.is_absolute() {
            batch_dir.clone()
        } else {
            cwd.join(&batch_dir)
        };

        let mut scripts = Vec::new();
        for (index, batch) in jobs.chunks(concat).enumerate() {
            let name = format!("dockflow_{:04}", index + 1);
            let script = batch_dir.join(format!("{}.sh", name));
            std::fs::write(&script, render_batch_script(&name, batch, &log_dir, &cwd))?;
            scripts.push(script);
        }

        info!(
            backend = self.backend.name(),
            tasks = jobs.len(),
            batches = scripts.len(),
            concat,
            queue_limit,
            "submitting {} tasks in {} batches",
            jobs.len(),
            scripts.len()
        );

        let permits = Arc::new(Semaphore::new(queue_limit));
        let handles: Vec<_> = scripts
            .into_iter()
            .map(|script| {
                tokio::spawn(run_batch(
                    Arc::clone(&self.backend),
                    Arc::clone(&permits),
                    script,
                    self.config.queue.clone(),
                    self.config.poll_interval,
                    self.config.batch_timeout,
                ))
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "batch task aborted");
            }
        }

        let outcomes: Vec<JobOutcome> = jobs
            .iter()
            .map(|job| JobOutcome::observe(job, None, 0))
            .collect();
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
