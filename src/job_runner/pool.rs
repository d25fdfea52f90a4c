//! Bounded worker-pool executor for [`Job`]s.
//!
//! Shaped after the teacher's work-stealing executor
//! (`knhk-workflow-engine::concurrency::work_stealing`): named worker
//! threads, an atomic shutdown flag, atomic counters for observability.
//! Replaced its `crossbeam-deque` injector/stealer with a plain
//! `crossbeam-channel` MPMC queue, since per-FOV jobs are independent and
//! don't benefit from work stealing the way the teacher's generic task
//! scheduler does.

use super::job::{Job, JobResult};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Runtime counters for the job runner, useful for tests and observers.
#[derive(Debug, Default)]
pub struct RunnerMetrics {
    /// Total jobs dispatched since construction.
    pub dispatched: AtomicUsize,
    /// Total jobs completed (success or failure) since construction.
    pub completed: AtomicUsize,
    /// `SaveImage` jobs dispatched since construction.
    pub save_dispatched: AtomicUsize,
    /// `QcMetrics` jobs dispatched since construction.
    pub qc_dispatched: AtomicUsize,
}

/// A bounded parallel executor for [`Job`]s. Dispatch returns immediately;
/// results are collected with `poll_results`; `drain` blocks until all
/// outstanding jobs finish.
pub struct JobRunner {
    sender: Mutex<Option<Sender<Job>>>,
    results_rx: Receiver<JobResult>,
    outstanding: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<RunnerMetrics>,
}

impl JobRunner {
    /// Start a pool with `worker_count` threads (default: logical processor
    /// count when `None`).
    pub fn new(worker_count: Option<usize>) -> Self {
        let worker_count = worker_count.unwrap_or_else(num_cpus::get).max(1);
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<JobResult>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let outstanding = Arc::new(AtomicUsize::new(0));
        let metrics = Arc::new(RunnerMetrics::default());

        let mut workers = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let outstanding = Arc::clone(&outstanding);
            let metrics = Arc::clone(&metrics);
            let handle = std::thread::Builder::new()
                .name(format!("acq-job-worker-{id}"))
                .spawn(move || {
                    while let Ok(job) = job_rx.recv() {
                        let kind = job.kind_label();
                        let fov = job.fov_id().clone();
                        let result = job.run();
                        if result.outcome.is_err() {
                            warn!(%fov, kind, "job failed");
                        } else {
                            debug!(%fov, kind, "job completed");
                        }
                        metrics.completed.fetch_add(1, Ordering::Relaxed);
                        outstanding.fetch_sub(1, Ordering::AcqRel);
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn job worker thread");
            workers.push(handle);
        }

        info!(worker_count, "job runner started");

        Self {
            sender: Mutex::new(Some(job_tx)),
            results_rx: result_rx,
            outstanding,
            shutdown,
            workers: Mutex::new(workers),
            metrics,
        }
    }

    /// Enqueue a job for background execution. Returns immediately.
    pub fn dispatch(&self, job: Job) {
        if self.shutdown.load(Ordering::Acquire) {
            error!("dispatch called after shutdown; job dropped");
            return;
        }
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.metrics.dispatched.fetch_add(1, Ordering::Relaxed);
        match &job {
            Job::SaveImage { .. } => self.metrics.save_dispatched.fetch_add(1, Ordering::Relaxed),
            Job::QcMetrics { .. } => self.metrics.qc_dispatched.fetch_add(1, Ordering::Relaxed),
        };
        // unbounded channel: send only fails if every worker has hung up,
        // which only happens after shutdown has already torn down the pool.
        if let Some(sender) = self.sender.lock().as_ref() {
            let _ = sender.send(job);
        }
    }

    /// Drain whatever results are ready without blocking.
    pub fn poll_results(&self) -> Vec<JobResult> {
        self.results_rx.try_iter().collect()
    }

    /// Block until every dispatched job has completed, returning any
    /// results collected while waiting.
    pub fn drain(&self) -> Vec<JobResult> {
        let mut collected = Vec::new();
        while self.outstanding.load(Ordering::Acquire) > 0 {
            match self.results_rx.recv_timeout(std::time::Duration::from_millis(10)) {
                Ok(r) => collected.push(r),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
        collected.extend(self.results_rx.try_iter());
        collected
    }

    /// Number of jobs dispatched but not yet completed.
    pub fn outstanding_count(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Snapshot metrics.
    pub fn metrics(&self) -> (usize, usize) {
        (
            self.metrics.dispatched.load(Ordering::Relaxed),
            self.metrics.completed.load(Ordering::Relaxed),
        )
    }

    /// `(save_dispatched, qc_dispatched)` since construction. Lets callers
    /// check `SaveImage` dispatch counts independently of whether QC is
    /// enabled, since `metrics()` lumps every job kind together.
    pub fn metrics_by_kind(&self) -> (usize, usize) {
        (
            self.metrics.save_dispatched.load(Ordering::Relaxed),
            self.metrics.qc_dispatched.load(Ordering::Relaxed),
        )
    }

    /// Stop accepting new dispatches, drain outstanding jobs, and join
    /// every worker thread.
    pub fn shutdown(&self) -> Vec<JobResult> {
        self.shutdown.store(true, Ordering::Release);
        let drained = self.drain();
        // dropping every sender unblocks each worker's recv loop
        self.sender.lock().take();
        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        info!("job runner shut down");
        drained
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        if !self.shutdown.load(Ordering::Acquire) {
            self.shutdown.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaptureInfo, CapturedImage, FovId, StagePosition};
    use chrono::Utc;
    use ndarray::Array2;

    fn sample_info(idx: u32) -> CaptureInfo {
        CaptureInfo {
            fov_id: FovId::new("A", idx),
            timepoint: 0,
            timestamp: Utc::now(),
            position: StagePosition { x_mm: 0.0, y_mm: 0.0, z_mm: 0.0 },
            piezo_z_um: None,
            channel_id: "DAPI".into(),
        }
    }

    #[test]
    fn dispatch_and_drain_runs_every_job() {
        let runner = JobRunner::new(Some(2));
        for i in 0..5 {
            runner.dispatch(Job::QcMetrics {
                image: CapturedImage::new(Array2::from_elem((2, 2), 1.0)),
                info: sample_info(i),
                focus_score_method: None,
                laser_af_displacement_um: None,
                previous_z_um: None,
            });
        }
        let results = runner.drain();
        assert_eq!(results.len(), 5);
        assert_eq!(runner.outstanding_count(), 0);
        let (dispatched, completed) = runner.metrics();
        assert_eq!(dispatched, 5);
        assert_eq!(completed, 5);
    }

    #[test]
    fn shutdown_joins_workers() {
        let runner = JobRunner::new(Some(1));
        runner.dispatch(Job::QcMetrics {
            image: CapturedImage::new(Array2::from_elem((2, 2), 1.0)),
            info: sample_info(0),
            focus_score_method: None,
            laser_af_displacement_um: None,
            previous_z_um: None,
        });
        let results = runner.shutdown();
        assert_eq!(results.len(), 1);
    }
}
