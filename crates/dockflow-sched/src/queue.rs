//! Batch-queue backends used by the HPC scheduler.

use crate::error::{Result, SchedError};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Identifier the queue system assigned to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueJobId(pub String);

impl fmt::Display for QueueJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queue-side state of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Pending,
    Running,
    Completed,
    Failed,
    /// The queue no longer knows the submission.
    Unknown,
}

impl QueueState {
    /// Whether the submission left the queue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueueState::Completed | QueueState::Failed | QueueState::Unknown
        )
    }
}

/// A batch queue able to run shell scripts.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit `script` to `queue` (the backend default when `None`).
    async fn submit(&self, script: &Path, queue: Option<&str>) -> Result<QueueJobId>;

    async fn status(&self, id: &QueueJobId) -> Result<QueueState>;

    async fn cancel(&self, id: &QueueJobId) -> Result<()>;
}

/// Slurm through its command-line tools.
#[derive(Debug, Clone)]
pub struct SlurmBackend {
    sbatch: String,
    squeue: String,
    scancel: String,
}

impl Default for SlurmBackend {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            squeue: "squeue".to_string(),
            scancel: "scancel".to_string(),
        }
    }
}

impl SlurmBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Map a `squeue -o %T` state to a [`QueueState`].
///
/// Empty output means the queue forgot the job. Any other state not listed
/// here is taken as still running, so its slot stays held.
pub fn parse_slurm_state(raw: &str) -> QueueState {
    match raw.trim().to_ascii_uppercase().as_str() {
        "" => QueueState::Unknown,
        "PENDING" | "CONFIGURING" | "REQUEUED" | "SUSPENDED" => QueueState::Pending,
        "RUNNING" | "COMPLETING" | "STAGE_OUT" => QueueState::Running,
        "COMPLETED" => QueueState::Completed,
        "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "OUT_OF_MEMORY" | "PREEMPTED"
        | "BOOT_FAIL" | "DEADLINE" => QueueState::Failed,
        _ => QueueState::Running,
    }
}

/// Job id printed by `sbatch --parsable` (`<id>` or `<id>;<cluster>`).
pub fn parse_sbatch_id(stdout: &str) -> Option<QueueJobId> {
    let id = stdout.trim().split(';').next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(QueueJobId(id.to_string()))
    }
}

#[async_trait]
impl QueueBackend for SlurmBackend {
    fn name(&self) -> &'static str {
        "slurm"
    }

    async fn submit(&self, script: &Path, queue: Option<&str>) -> Result<QueueJobId> {
        let mut command = Command::new(&self.sbatch);
        command.arg("--parsable");
        if let Some(queue) = queue {
            command.arg("-p").arg(queue);
        }
        let output = command
            .arg(script)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SchedError::Submission(format!("{}: {}", self.sbatch, e)))?;

        if !output.status.success() {
            return Err(SchedError::Submission(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = parse_sbatch_id(&stdout).ok_or_else(|| {
            SchedError::Submission(format!("unexpected sbatch output: {:?}", stdout))
        })?;
        debug!(script = %script.display(), job_id = %id, "submitted batch");
        Ok(id)
    }

    async fn status(&self, id: &QueueJobId) -> Result<QueueState> {
        let output = Command::new(&self.squeue)
            .args(["-h", "-j", id.0.as_str(), "-o", "%T"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SchedError::Status {
                job_id: id.0.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // purged from the controller: the job has left the queue
            if stderr.contains("Invalid job id") {
                return Ok(QueueState::Unknown);
            }
            return Err(SchedError::Status {
                job_id: id.0.clone(),
                reason: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_slurm_state(stdout.lines().next().unwrap_or("")))
    }

    async fn cancel(&self, id: &QueueJobId) -> Result<()> {
        let status = Command::new(&self.scancel)
            .arg(&id.0)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            debug!(job_id = %id, code = ?status.code(), "scancel returned failure");
        }
        Ok(())
    }
}
