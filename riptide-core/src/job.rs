use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Lifecycle state of a download job.
///
/// Transitions are monotonic: `Queued → Downloading → {Success | Error}`.
/// A job bounced off the concurrency ceiling returns to `Queued` (same
/// state, refreshed position), never to a distinct state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Downloading,
    Success,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

/// Payload recorded when a job completes successfully.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub filename: String,
    pub title: String,
    pub filesize: u64,
    pub duration_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Payload recorded when a job fails.
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// A single user-initiated download request tracked through its lifecycle.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: Uuid,
    pub url: String,
    pub status: JobStatus,
    /// Integer percent, meaningful only while `Downloading`.
    pub progress: Option<u8>,
    pub message: String,
    /// Times this job was bounced off the concurrency ceiling.
    pub requeue_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub failure: Option<JobFailure>,
}

impl DownloadJob {
    pub fn new(url: String) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            url,
            status: JobStatus::Queued,
            progress: None,
            message: "Waiting in queue...".to_string(),
            requeue_count: 0,
            created_at: now,
            updated_at: now,
            result: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Enter `Downloading`. No-op from any state other than `Queued`.
    pub fn mark_downloading(&mut self) {
        if self.status != JobStatus::Queued {
            return;
        }
        self.status = JobStatus::Downloading;
        self.progress = Some(0);
        self.message = "Starting download...".to_string();
        self.touch();
    }

    /// Record a ceiling bounce: status stays `Queued`, position is
    /// recomputed by the queue on the next status read.
    pub fn mark_requeued(&mut self) {
        self.requeue_count += 1;
        self.message = "Waiting for a free download slot...".to_string();
        self.touch();
    }

    /// Apply a progress event. Ignored once the job is terminal, so a late
    /// event can never roll a finished job back.
    pub fn record_progress(&mut self, percent: Option<u8>, message: String) {
        if self.status != JobStatus::Downloading {
            return;
        }
        if let Some(percent) = percent {
            self.progress = Some(percent.min(100));
        }
        self.message = message;
        self.touch();
    }

    pub fn complete(&mut self, result: JobResult) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Success;
        self.progress = Some(100);
        self.message = format!("Saved {}", result.filename);
        self.result = Some(result);
        self.failure = None;
        self.touch();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let message = message.into();
        self.status = JobStatus::Error;
        self.progress = None;
        self.message.clone_from(&message);
        self.failure = Some(JobFailure {
            message,
            failed_at: Utc::now(),
        });
        self.result = None;
        self.touch();
    }
}

/// Point-in-time view of a job, as returned to status polls.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}

/// Progress event routed from an extraction in flight to the job store.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job_id: Uuid,
    pub percent: Option<u8>,
    pub message: String,
}

/// Queue-level counters for the health probe.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueStats {
    pub queue_depth: usize,
    pub active_downloads: usize,
    pub total_jobs: usize,
}
