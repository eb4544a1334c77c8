//! Background queue for discussion-link write-backs.
//!
//! # Responsibility
//! - Run git write-backs off the request path on a single worker thread.
//! - Keep every job's status queryable and let failed jobs be retried.
//!
//! # Invariants
//! - Jobs run one at a time in enqueue order.
//! - A job is terminal once `Succeeded` or `Failed`; only `retry` moves a
//!   failed job back to `Pending`.
//! - `enqueue` never blocks on git work.
//! - At most `retained_succeeded` succeeded jobs stay queryable; older ones
//!   are dropped oldest first. Pending, running and failed jobs are kept.

use crate::authoring::DiscussionWriter;
use crate::model::rfd::RfdId;
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type JobId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed { attempts: u32, error: String },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritebackJob {
    pub id: JobId,
    pub rfd_id: RfdId,
    pub discussion_url: String,
    pub attempts: u32,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritebackError {
    /// The queue was shut down.
    Closed,
    UnknownJob(JobId),
    /// Only failed jobs can be retried.
    NotRetryable { job: JobId, status: JobStatus },
    Poisoned,
}

impl Display for WritebackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "write-back queue is shut down"),
            Self::UnknownJob(job) => write!(f, "unknown write-back job {job}"),
            Self::NotRetryable { job, status } => {
                write!(f, "write-back job {job} is not retryable in status {status:?}")
            }
            Self::Poisoned => write!(f, "write-back job table lock poisoned"),
        }
    }
}

impl Error for WritebackError {}

/// Succeeded jobs kept for status queries by [`WritebackQueue::start`].
pub const DEFAULT_RETAINED_SUCCEEDED: usize = 256;

#[derive(Default)]
struct JobTable {
    next_id: JobId,
    jobs: BTreeMap<JobId, WritebackJob>,
}

impl JobTable {
    /// Drops the oldest succeeded jobs beyond `retained`. Returns how many.
    fn prune_succeeded(&mut self, retained: usize) -> usize {
        let succeeded: Vec<JobId> = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Succeeded)
            .map(|job| job.id)
            .collect();
        let excess = succeeded.len().saturating_sub(retained);
        for id in &succeeded[..excess] {
            self.jobs.remove(id);
        }
        excess
    }
}

struct Shared {
    table: Mutex<JobTable>,
    changed: Condvar,
    retained_succeeded: usize,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, JobTable>, WritebackError> {
        self.table.lock().map_err(|_| WritebackError::Poisoned)
    }

    /// Applies `f` to a job and wakes waiters. Missing jobs are ignored.
    fn update(&self, job: JobId, f: impl FnOnce(&mut WritebackJob)) {
        if let Ok(mut table) = self.table.lock() {
            if let Some(entry) = table.jobs.get_mut(&job) {
                f(entry);
            }
        }
        self.changed.notify_all();
    }

    fn succeed(&self, job: JobId) {
        let mut pruned = 0;
        if let Ok(mut table) = self.table.lock() {
            if let Some(entry) = table.jobs.get_mut(&job) {
                entry.status = JobStatus::Succeeded;
            }
            pruned = table.prune_succeeded(self.retained_succeeded);
        }
        self.changed.notify_all();
        if pruned > 0 {
            info!(
                "event=writeback_prune module=writeback status=ok pruned={}",
                pruned
            );
        }
    }
}

/// Single-worker write-back queue.
pub struct WritebackQueue {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<JobId>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl WritebackQueue {
    /// Starts the worker thread.
    pub fn start(writer: Arc<dyn DiscussionWriter>) -> std::io::Result<Self> {
        Self::with_retention(writer, DEFAULT_RETAINED_SUCCEEDED)
    }

    /// Starts the worker thread keeping at most `retained_succeeded`
    /// succeeded jobs (at least one).
    pub fn with_retention(
        writer: Arc<dyn DiscussionWriter>,
        retained_succeeded: usize,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            table: Mutex::new(JobTable::default()),
            changed: Condvar::new(),
            retained_succeeded: retained_succeeded.max(1),
        });
        let (sender, receiver) = mpsc::channel();
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("rfd-writeback".to_string())
            .spawn(move || run_worker(receiver, worker_shared, writer))?;
        info!("event=writeback_start module=writeback status=ok");

        Ok(Self {
            shared,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues a write-back of `url` into RFD `rfd_id`.
    pub fn enqueue(&self, rfd_id: RfdId, url: &str) -> Result<JobId, WritebackError> {
        let job = {
            let mut table = self.shared.lock()?;
            table.next_id += 1;
            let job = table.next_id;
            table.jobs.insert(
                job,
                WritebackJob {
                    id: job,
                    rfd_id,
                    discussion_url: url.to_string(),
                    attempts: 0,
                    status: JobStatus::Pending,
                },
            );
            job
        };
        self.dispatch(job)?;
        info!(
            "event=writeback_enqueue module=writeback status=ok job={} id={}",
            job, rfd_id
        );
        Ok(job)
    }

    /// Moves a failed job back to `Pending` and queues it again.
    pub fn retry(&self, job: JobId) -> Result<(), WritebackError> {
        {
            let mut table = self.shared.lock()?;
            let entry = table
                .jobs
                .get_mut(&job)
                .ok_or(WritebackError::UnknownJob(job))?;
            if !matches!(entry.status, JobStatus::Failed { .. }) {
                return Err(WritebackError::NotRetryable {
                    job,
                    status: entry.status.clone(),
                });
            }
            entry.status = JobStatus::Pending;
        }
        self.dispatch(job)?;
        info!("event=writeback_retry module=writeback status=ok job={}", job);
        Ok(())
    }

    pub fn job(&self, job: JobId) -> Option<WritebackJob> {
        self.shared.lock().ok()?.jobs.get(&job).cloned()
    }

    pub fn status(&self, job: JobId) -> Option<JobStatus> {
        self.job(job).map(|entry| entry.status)
    }

    /// Retained jobs in enqueue order.
    pub fn jobs(&self) -> Vec<WritebackJob> {
        self.shared
            .lock()
            .map(|table| table.jobs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Jobs whose last attempt failed.
    pub fn failed_jobs(&self) -> Vec<WritebackJob> {
        self.jobs()
            .into_iter()
            .filter(|job| matches!(job.status, JobStatus::Failed { .. }))
            .collect()
    }

    /// Blocks until `job` is terminal or `timeout` elapses.
    ///
    /// Returns the last observed status, `None` for an unknown job.
    pub fn wait(&self, job: JobId, timeout: Duration) -> Option<JobStatus> {
        let deadline = Instant::now() + timeout;
        let mut table = self.shared.lock().ok()?;
        loop {
            let status = table.jobs.get(&job)?.status.clone();
            let now = Instant::now();
            if status.is_terminal() || now >= deadline {
                return Some(status);
            }
            table = match self.shared.changed.wait_timeout(table, deadline - now) {
                Ok((guard, _)) => guard,
                Err(_) => return Some(status),
            };
        }
    }

    /// Stops accepting jobs, lets queued ones finish and joins the worker.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("event=writeback_stop module=writeback status=error error=worker_panicked");
                return;
            }
            info!("event=writeback_stop module=writeback status=ok");
        }
    }

    fn dispatch(&self, job: JobId) -> Result<(), WritebackError> {
        let sender = self.sender.lock().map_err(|_| WritebackError::Poisoned)?;
        let sent = sender
            .as_ref()
            .map(|sender| sender.send(job).is_ok())
            .unwrap_or(false);
        if sent {
            return Ok(());
        }
        self.shared.update(job, |entry| {
            entry.status = JobStatus::Failed {
                attempts: entry.attempts,
                error: WritebackError::Closed.to_string(),
            };
        });
        Err(WritebackError::Closed)
    }
}

impl Drop for WritebackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Receiver<JobId>, shared: Arc<Shared>, writer: Arc<dyn DiscussionWriter>) {
    for job in receiver {
        let Some((rfd_id, url)) = claim(&shared, job) else {
            continue;
        };
        let started_at = Instant::now();
        info!(
            "event=writeback_job module=writeback status=start job={} id={}",
            job, rfd_id
        );

        match writer.write_discussion(rfd_id, &url) {
            Ok(_) => {
                shared.succeed(job);
                info!(
                    "event=writeback_job module=writeback status=ok job={} id={} duration_ms={}",
                    job,
                    rfd_id,
                    started_at.elapsed().as_millis()
                );
            }
            Err(err) => {
                let message = err.to_string();
                shared.update(job, |entry| {
                    entry.status = JobStatus::Failed {
                        attempts: entry.attempts,
                        error: message.clone(),
                    };
                });
                warn!(
                    "event=writeback_job module=writeback status=error job={} id={} duration_ms={} error={}",
                    job,
                    rfd_id,
                    started_at.elapsed().as_millis(),
                    message
                );
            }
        }
    }
}

/// Marks a pending job running and returns what it should write.
fn claim(shared: &Shared, job: JobId) -> Option<(RfdId, String)> {
    let claimed = {
        let mut table = shared.table.lock().ok()?;
        let entry = table.jobs.get_mut(&job)?;
        if entry.status != JobStatus::Pending {
            return None;
        }
        entry.status = JobStatus::Running;
        entry.attempts += 1;
        (entry.rfd_id, entry.discussion_url.clone())
    };
    shared.changed.notify_all();
    Some(claimed)
}
