//! In-process queue backend (testing only)
//!
//! `InlineQueue` runs each submitted script with `sh` at submission time and
//! reports it as pending for a configurable number of polls. It records how
//! many submissions were outstanding at once.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Result, SchedError};
use crate::queue::{QueueBackend, QueueJobId, QueueState};

#[derive(Debug, Default)]
struct Ledger {
    attempts: usize,
    submitted: Vec<PathBuf>,
    /// Remaining polls before each submission reports completion.
    pending: HashMap<String, usize>,
    outstanding: usize,
    peak: usize,
}

/// Queue backend that executes scripts locally.
#[derive(Debug, Default)]
pub struct InlineQueue {
    polls_before_done: usize,
    reject: HashSet<usize>,
    failing_status: bool,
    ledger: Mutex<Ledger>,
}

impl InlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report each submission as pending for `polls` status queries.
    pub fn with_polls_before_done(mut self, polls: usize) -> Self {
        self.polls_before_done = polls;
        self
    }

    /// Refuse the submission attempts with these zero-based indexes.
    pub fn rejecting(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.reject.extend(attempts);
        self
    }

    /// Make every status query fail.
    pub fn with_failing_status(mut self) -> Self {
        self.failing_status = true;
        self
    }

    /// Scripts accepted so far, in submission order.
    pub fn submitted(&self) -> Vec<PathBuf> {
        self.ledger.lock().unwrap().submitted.clone()
    }

    /// Highest number of submissions outstanding at the same time.
    pub fn peak_outstanding(&self) -> usize {
        self.ledger.lock().unwrap().peak
    }

    pub fn attempts(&self) -> usize {
        self.ledger.lock().unwrap().attempts
    }
}

#[async_trait]
impl QueueBackend for InlineQueue {
    fn name(&self) -> &'static str {
        "inline"
    }

    async fn submit(&self, script: &Path, _queue: Option<&str>) -> Result<QueueJobId> {
        let id = {
            let mut ledger = self.ledger.lock().unwrap();
            let attempt = ledger.attempts;
            ledger.attempts += 1;
            if self.reject.contains(&attempt) {
                return Err(SchedError::Submission(format!(
                    "submission {} rejected",
                    attempt
                )));
            }
            ledger.outstanding += 1;
            ledger.peak = ledger.peak.max(ledger.outstanding);
            ledger.submitted.push(script.to_path_buf());
            let id = format!("inline-{}", attempt);
            ledger.pending.insert(id.clone(), self.polls_before_done);
            id
        };

        Command::new("sh")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        Ok(QueueJobId(id))
    }

    async fn status(&self, id: &QueueJobId) -> Result<QueueState> {
        if self.failing_status {
            return Err(SchedError::Status {
                job_id: id.0.clone(),
                reason: "queue controller unreachable".to_string(),
            });
        }

        let mut ledger = self.ledger.lock().unwrap();
        let remaining = ledger.pending.get(&id.0).copied();
        match remaining {
            Some(0) => {
                ledger.pending.remove(&id.0);
                ledger.outstanding -= 1;
                Ok(QueueState::Completed)
            }
            Some(n) => {
                ledger.pending.insert(id.0.clone(), n - 1);
                Ok(QueueState::Running)
            }
            None => Ok(QueueState::Unknown),
        }
    }

    async fn cancel(&self, id: &QueueJobId) -> Result<()> {
        let mut ledger = self.ledger.lock().unwrap();
        if ledger.pending.remove(&id.0).is_some() {
            ledger.outstanding -= 1;
        }
        Ok(())
    }
}
