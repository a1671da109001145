use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::job::{DownloadJob, JobResult, JobSnapshot, JobStatus, ProgressUpdate, QueueStats};

/// Outcome of a successful admission, echoed back to the submitter.
#[derive(Debug, Clone, Serialize)]
pub struct Admission {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub queue_position: usize,
    pub message: String,
}

/// A unit of work handed to a worker: the job id plus the URL to extract.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub url: String,
}

#[derive(Debug)]
struct PendingItem {
    job_id: Uuid,
    url: String,
    /// Set on ceiling bounces; the item is not eligible for dequeue before
    /// this instant.
    not_before: Option<Instant>,
}

enum Command {
    Status {
        job_id: Uuid,
        reply: oneshot::Sender<Option<JobSnapshot>>,
    },
    Begin {
        job_id: Uuid,
    },
    Defer {
        item: WorkItem,
        not_before: Instant,
    },
    Progress(ProgressUpdate),
    Complete {
        job_id: Uuid,
        result: JobResult,
    },
    Fail {
        job_id: Uuid,
        message: String,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
}

type SubmitRequest = (String, oneshot::Sender<Result<Admission>>);
type JobRequest = oneshot::Sender<Option<WorkItem>>;

/// Job store and admission queue, owned by a single actor task.
///
/// All state (the bounded pending FIFO and the job-record map) lives inside
/// the actor; callers interact exclusively through [`JobQueueHandle`]
/// channels, so no caller can ever observe a partially-written record.
#[derive(Debug)]
pub struct JobQueue {
    pending: VecDeque<PendingItem>,
    jobs: HashMap<Uuid, DownloadJob>,
    capacity: usize,
    status_ttl: chrono::Duration,
}

impl JobQueue {
    /// Spawn the queue actor and return the cloneable handle.
    ///
    /// `capacity` bounds the pending FIFO; `status_ttl` is the staleness
    /// horizon after which terminal records are evicted on read.
    pub fn start(capacity: usize, status_ttl: Duration) -> JobQueueHandle {
        let (submit_tx, submit_rx) = mpsc::channel::<SubmitRequest>(16);
        let (request_tx, request_rx) = mpsc::channel::<JobRequest>(16);
        let (command_tx, command_rx) = mpsc::channel::<Command>(64);

        let queue = Self {
            pending: VecDeque::new(),
            jobs: HashMap::new(),
            capacity,
            status_ttl: chrono::Duration::from_std(status_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
        };

        tokio::spawn(queue.run(submit_rx, request_rx, command_rx));

        JobQueueHandle {
            submit_tx,
            request_tx,
            command_tx,
        }
    }

    async fn run(
        mut self,
        mut submit_rx: mpsc::Receiver<SubmitRequest>,
        mut request_rx: mpsc::Receiver<JobRequest>,
        mut command_rx: mpsc::Receiver<Command>,
    ) {
        info!("job queue started (capacity {})", self.capacity);

        loop {
            tokio::select! {
                Some((url, reply)) = submit_rx.recv() => {
                    let _ = reply.send(self.admit(url));
                }

                Some(reply) = request_rx.recv() => {
                    let _ = reply.send(self.next_due());
                }

                Some(command) = command_rx.recv() => {
                    self.handle_command(command);
                }

                else => break,
            }
        }

        info!("job queue stopped");
    }

    /// Admit a new URL, or reject immediately when the FIFO is at capacity.
    ///
    /// The job record is created only on successful admission, so a
    /// `QueueFull` rejection leaves the store untouched.
    fn admit(&mut self, url: String) -> Result<Admission> {
        if self.pending.len() >= self.capacity {
            debug!("submission rejected, queue at capacity {}", self.capacity);
            return Err(CoreError::QueueFull);
        }

        let job = DownloadJob::new(url.clone());
        let job_id = job.id;

        self.pending.push_back(PendingItem {
            job_id,
            url,
            not_before: None,
        });
        let queue_position = self.pending.len();
        let message = job.message.clone();
        self.jobs.insert(job_id, job);

        debug!("job {job_id} admitted at position {queue_position}");

        Ok(Admission {
            job_id,
            status: JobStatus::Queued,
            queue_position,
            message,
        })
    }

    /// Pop the first item whose backoff (if any) has elapsed. Items still
    /// backing off keep their position, preserving FIFO order for the rest.
    fn next_due(&mut self) -> Option<WorkItem> {
        let now = Instant::now();
        let index = self
            .pending
            .iter()
            .position(|item| item.not_before.is_none_or(|t| t <= now))?;
        let item = self.pending.remove(index)?;

        Some(WorkItem {
            job_id: item.job_id,
            url: item.url,
        })
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Status { job_id, reply } => {
                let _ = reply.send(self.snapshot(job_id));
            }
            Command::Begin { job_id } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.mark_downloading();
                }
            }
            Command::Defer { item, not_before } => {
                if let Some(job) = self.jobs.get_mut(&item.job_id) {
                    job.mark_requeued();
                    debug!(
                        "job {} bounced off the ceiling (attempt {})",
                        item.job_id, job.requeue_count
                    );
                }
                // Re-enqueue at the back: an admitted job is never dropped,
                // and the bounce does not count against capacity.
                self.pending.push_back(PendingItem {
                    job_id: item.job_id,
                    url: item.url,
                    not_before: Some(not_before),
                });
            }
            Command::Progress(update) => {
                if let Some(job) = self.jobs.get_mut(&update.job_id) {
                    job.record_progress(update.percent, update.message);
                }
            }
            Command::Complete { job_id, result } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.complete(result);
                    info!("job {job_id} completed");
                } else {
                    warn!("completion for unknown job {job_id}");
                }
            }
            Command::Fail { job_id, message } => {
                if let Some(job) = self.jobs.get_mut(&job_id) {
                    job.fail(message);
                    info!("job {job_id} failed: {}", job.message);
                } else {
                    warn!("failure report for unknown job {job_id}");
                }
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    /// Build a point-in-time snapshot, evicting the record first if it is
    /// terminal and older than the staleness horizon.
    fn snapshot(&mut self, job_id: Uuid) -> Option<JobSnapshot> {
        let job = self.jobs.get(&job_id)?;

        if job.is_terminal() && Utc::now() - job.updated_at > self.status_ttl {
            debug!("evicting stale record for job {job_id}");
            self.jobs.remove(&job_id);
            return None;
        }

        let job = self.jobs.get(&job_id)?;
        let queue_position = if job.status == JobStatus::Queued {
            self.pending
                .iter()
                .position(|item| item.job_id == job_id)
                .map(|index| index + 1)
        } else {
            None
        };

        Some(JobSnapshot {
            job_id: job.id,
            status: job.status,
            queue_position,
            progress: job.progress,
            message: job.message.clone(),
            result: job.result.clone(),
            error: job.failure.clone(),
        })
    }

    fn stats(&self) -> QueueStats {
        let active_downloads = self
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Downloading)
            .count();

        QueueStats {
            queue_depth: self.pending.len(),
            active_downloads,
            total_jobs: self.jobs.len(),
        }
    }
}

/// Cloneable handle for interacting with the queue actor.
#[derive(Debug, Clone)]
pub struct JobQueueHandle {
    submit_tx: mpsc::Sender<SubmitRequest>,
    request_tx: mpsc::Sender<JobRequest>,
    command_tx: mpsc::Sender<Command>,
}

impl JobQueueHandle {
    /// Non-blocking admission attempt; fails with `QueueFull` at capacity.
    pub async fn submit(&self, url: String) -> Result<Admission> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit_tx
            .send((url, reply_tx))
            .await
            .map_err(|_| CoreError::Internal("queue unavailable".to_string()))?;

        reply_rx
            .await
            .map_err(|_| CoreError::Internal("queue dropped the reply".to_string()))?
    }

    /// Pull the next due work item, if any.
    pub async fn next_job(&self) -> Option<WorkItem> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.request_tx.send(reply_tx).await.ok()?;
        reply_rx.await.ok().flatten()
    }

    /// Current snapshot for `job_id`, or `None` for unknown/evicted jobs.
    pub async fn status(&self, job_id: Uuid) -> Option<JobSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Status { job_id, reply: reply_tx })
            .await
            .ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn stats(&self) -> QueueStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Stats { reply: reply_tx })
            .await
            .is_err()
        {
            return QueueStats::default();
        }
        reply_rx.await.unwrap_or_default()
    }

    /// Mark a dequeued job as actively downloading.
    pub async fn begin(&self, job_id: Uuid) {
        self.send(Command::Begin { job_id }).await;
    }

    /// Hand a job back after a ceiling bounce; it re-enters at the back and
    /// becomes eligible again once `backoff` has elapsed.
    pub async fn defer(&self, item: WorkItem, backoff: Duration) {
        self.send(Command::Defer {
            item,
            not_before: Instant::now() + backoff,
        })
        .await;
    }

    /// Deliver a progress event. Lossy by design: under pressure events are
    /// dropped rather than backpressuring the extraction, last value wins.
    pub fn progress(&self, update: ProgressUpdate) {
        let _ = self.command_tx.try_send(Command::Progress(update));
    }

    pub async fn complete(&self, job_id: Uuid, result: JobResult) {
        self.send(Command::Complete { job_id, result }).await;
    }

    pub async fn fail(&self, job_id: Uuid, message: impl Into<String>) {
        self.send(Command::Fail {
            job_id,
            message: message.into(),
        })
        .await;
    }

    async fn send(&self, command: Command) {
        if self.command_tx.send(command).await.is_err() {
            warn!("job queue is gone, dropping command");
        }
    }
}
