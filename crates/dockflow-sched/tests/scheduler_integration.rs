//! Scheduler barrier behaviour with real child processes.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dockflow_sched::fakes::InlineQueue;
use dockflow_sched::{HpcConfig, HpcScheduler, Job, LocalScheduler, Scheduler};

/// `count` cat jobs copying `in_i.txt` to `out_i.txt`.
fn cat_jobs(dir: &Path, count: usize) -> Vec<Job> {
    (0..count)
        .map(|i| {
            let input = dir.join(format!("in_{}.txt", i));
            std::fs::write(&input, format!("contact {}\n", i)).unwrap();
            Job::new(input, dir.join(format!("out_{}.txt", i)), "cat", vec![])
        })
        .collect()
}

fn hpc_config(dir: &Path, queue_limit: usize, concat: usize) -> HpcConfig {
    HpcConfig {
        queue_limit,
        concat,
        poll_interval: Duration::from_millis(10),
        work_dir: Some(dir.to_path_buf()),
        ..HpcConfig::default()
    }
}

#[tokio::test]
async fn local_scheduler_returns_after_every_job() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 12);

    let report = LocalScheduler::new(Some(4)).run(&jobs).await.unwrap();

    assert_eq!(report.len(), 12);
    assert_eq!(report.produced_count(), 12);
    for (i, job) in jobs.iter().enumerate() {
        assert_eq!(
            std::fs::read_to_string(&job.output).unwrap(),
            format!("contact {}\n", i)
        );
    }
}

#[tokio::test]
async fn local_scheduler_with_single_worker() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 3);

    let report = LocalScheduler::new(Some(1)).run(&jobs).await.unwrap();
    assert_eq!(report.produced_count(), 3);
}

#[tokio::test]
async fn hpc_scheduler_respects_queue_limit() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 9);
    let queue = Arc::new(InlineQueue::new().with_polls_before_done(2));

    let scheduler = HpcScheduler::new(queue.clone(), hpc_config(dir.path(), 2, 1));
    let report = scheduler.run(&jobs).await.unwrap();

    assert_eq!(report.len(), 9);
    assert_eq!(report.produced_count(), 9);
    assert_eq!(queue.submitted().len(), 9);
    assert!(queue.peak_outstanding() <= 2);
    assert!(queue.peak_outstanding() >= 1);
}

#[tokio::test]
async fn hpc_concat_keeps_one_output_per_job() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 7);
    let queue = Arc::new(InlineQueue::new());

    let scheduler = HpcScheduler::new(queue.clone(), hpc_config(dir.path(), 10, 3));
    let report = scheduler.run(&jobs).await.unwrap();

    // 7 jobs in groups of 3
    assert_eq!(queue.submitted().len(), 3);
    assert_eq!(report.produced_count(), 7);
    for (i, job) in jobs.iter().enumerate() {
        assert_eq!(
            std::fs::read_to_string(&job.output).unwrap(),
            format!("contact {}\n", i)
        );
    }
}

#[tokio::test]
async fn rejected_submission_releases_its_slot() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 4);
    let queue = Arc::new(InlineQueue::new().rejecting([0]));

    // A single slot: a leaked permit would block the remaining batches forever.
    let scheduler = HpcScheduler::new(queue.clone(), hpc_config(dir.path(), 1, 1));
    let report = tokio::time::timeout(Duration::from_secs(30), scheduler.run(&jobs))
        .await
        .expect("scheduler deadlocked")
        .unwrap();

    assert_eq!(report.len(), 4);
    assert_eq!(queue.attempts(), 4);
    assert_eq!(report.produced_count(), 3);
    assert_eq!(report.missing().count(), 1);
}

#[tokio::test]
async fn status_failures_release_their_slot() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 3);
    let queue = Arc::new(InlineQueue::new().with_failing_status());

    let scheduler = HpcScheduler::new(queue.clone(), hpc_config(dir.path(), 1, 1));
    let report = tokio::time::timeout(Duration::from_secs(30), scheduler.run(&jobs))
        .await
        .expect("scheduler deadlocked")
        .unwrap();

    // scripts ran at submission; only the queue bookkeeping failed
    assert_eq!(queue.submitted().len(), 3);
    assert_eq!(report.produced_count(), 3);
}

#[tokio::test]
async fn batch_timeout_cancels_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let jobs = cat_jobs(dir.path(), 2);
    let queue = Arc::new(InlineQueue::new().with_polls_before_done(usize::MAX));

    let config = HpcConfig {
        batch_timeout: Some(Duration::from_millis(50)),
        ..hpc_config(dir.path(), 1, 1)
    };
    let report = tokio::time::timeout(
        Duration::from_secs(30),
        HpcScheduler::new(queue.clone(), config).run(&jobs),
    )
    .await
    .expect("scheduler deadlocked")
    .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(queue.submitted().len(), 2);
}
