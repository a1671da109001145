//! Worker pool: bounded-concurrency consumers of the admission queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::extract::{ExtractOptions, ExtractProgress, Extraction, MediaExtractor};
use crate::job::{JobResult, ProgressUpdate};
use crate::queue::{JobQueueHandle, WorkItem};
use crate::retention::RetentionSweeper;

/// Execution limits a worker enforces per job.
#[derive(Debug, Clone)]
pub struct WorkerLimits {
    /// Concurrency ceiling: max jobs in `downloading` at once, system-wide.
    pub concurrency: usize,
    pub max_duration_secs: u64,
    pub max_file_bytes: u64,
    /// Overall deadline around one extraction.
    pub job_timeout: Duration,
    /// Backoff applied to a job bounced off the ceiling.
    pub requeue_backoff: Duration,
    /// Idle wait between queue polls.
    pub poll_interval: Duration,
}

/// Everything a worker task needs, cheaply cloneable.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: JobQueueHandle,
    pub extractor: Arc<dyn MediaExtractor>,
    pub sweeper: Arc<RetentionSweeper>,
    pub options: ExtractOptions,
    pub limits: WorkerLimits,
    /// Shared count of jobs currently extracting, CAS-guarded against the
    /// ceiling.
    active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext").finish_non_exhaustive()
    }
}

impl WorkerContext {
    pub fn new(
        queue: JobQueueHandle,
        extractor: Arc<dyn MediaExtractor>,
        sweeper: Arc<RetentionSweeper>,
        options: ExtractOptions,
        limits: WorkerLimits,
    ) -> Self {
        Self {
            queue,
            extractor,
            sweeper,
            options,
            limits,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn try_acquire_slot(&self) -> bool {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.limits.concurrency).then_some(n + 1)
            })
            .is_ok()
    }

    fn release_slot(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Worker {
    id: usize,
    handle: tokio::task::JoinHandle<()>,
    shutdown_tx: mpsc::Sender<()>,
}

/// Pool of worker tasks consuming the admission queue.
pub struct WorkerPool {
    workers: Vec<Worker>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn `worker_count` workers over a shared context.
    pub fn spawn(worker_count: usize, ctx: WorkerContext) -> Self {
        let mut workers = Vec::with_capacity(worker_count);

        for id in 0..worker_count {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            let ctx = ctx.clone();

            let handle = tokio::spawn(async move {
                Self::worker_loop(id, ctx, shutdown_rx).await;
            });

            workers.push(Worker {
                id,
                handle,
                shutdown_tx,
            });
        }

        info!("started {worker_count} download workers");

        Self { workers }
    }

    async fn worker_loop(id: usize, ctx: WorkerContext, mut shutdown_rx: mpsc::Receiver<()>) {
        info!("worker {id} started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("worker {id} shutting down");
                    break;
                }
                item = ctx.queue.next_job() => {
                    match item {
                        Some(item) => Self::handle_item(id, &ctx, item).await,
                        // Idle: bounded wait, then loop so housekeeping
                        // (and shutdown) still get a chance.
                        None => tokio::time::sleep(ctx.limits.poll_interval).await,
                    }
                }
            }
        }
    }

    /// Run one dequeued job to a terminal state. Every failure path ends in
    /// a terminal `error` record; nothing here can take the worker down.
    async fn handle_item(id: usize, ctx: &WorkerContext, item: WorkItem) {
        if !ctx.try_acquire_slot() {
            debug!("worker {id}: ceiling reached, deferring job {}", item.job_id);
            ctx.queue.defer(item, ctx.limits.requeue_backoff).await;
            return;
        }

        let job_id = item.job_id;
        ctx.queue.begin(job_id).await;
        info!("worker {id} processing job {job_id}");

        match timeout(ctx.limits.job_timeout, run_extraction(ctx, &item)).await {
            Ok(Ok(result)) => {
                info!("worker {id} completed job {job_id} ({})", result.filename);
                ctx.queue.complete(job_id, result).await;
            }
            Ok(Err(e)) => {
                warn!("worker {id} failed job {job_id}: {e}");
                ctx.queue.fail(job_id, e.to_string()).await;
            }
            Err(_) => {
                error!("worker {id}: job {job_id} timed out");
                remove_partial_outputs(ctx).await;
                ctx.queue
                    .fail(
                        job_id,
                        format!(
                            "Extraction timed out after {}s",
                            ctx.limits.job_timeout.as_secs()
                        ),
                    )
                    .await;
            }
        }

        ctx.release_slot();

        // Opportunistic reclaim; never fails the job that triggered it.
        if let Err(e) = ctx.sweeper.sweep().await {
            warn!("post-job retention sweep failed: {e:#}");
        }
    }

    /// Shut down all workers and wait for them to finish their current job.
    pub async fn shutdown(self) {
        info!("shutting down worker pool");

        for worker in &self.workers {
            let _ = worker.shutdown_tx.send(()).await;
        }

        for worker in self.workers {
            if worker.handle.await.is_err() {
                warn!("worker {} terminated abnormally", worker.id);
            }
        }

        info!("worker pool shutdown complete");
    }
}

/// Drive one extraction: progress forwarding, the adapter call itself, and
/// output constraint validation.
async fn run_extraction(ctx: &WorkerContext, item: &WorkItem) -> Result<JobResult> {
    let (progress_tx, progress_rx) = mpsc::channel(32);
    let forwarder = tokio::spawn(forward_progress(
        ctx.queue.clone(),
        item.job_id,
        progress_rx,
    ));

    let outcome = ctx
        .extractor
        .extract(&item.url, &ctx.options, progress_tx)
        .await;
    forwarder.abort();

    let extraction = outcome?;
    let filesize = validate_constraints(&extraction, &ctx.limits).await?;

    let filename = extraction
        .output_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| CoreError::Internal("extractor returned a directory path".to_string()))?;

    Ok(JobResult {
        filename,
        title: extraction.title,
        filesize,
        duration_secs: extraction.duration_secs,
        thumbnail: extraction.thumbnail,
        completed_at: Utc::now(),
    })
}

/// Enforce the duration and size ceilings; a violation removes the output
/// file before the job is failed.
async fn validate_constraints(extraction: &Extraction, limits: &WorkerLimits) -> Result<u64> {
    if extraction.duration_secs > limits.max_duration_secs {
        discard(extraction).await;
        return Err(CoreError::ConstraintViolation(format!(
            "Source is {}s long, the limit is {}s ({} minutes)",
            extraction.duration_secs,
            limits.max_duration_secs,
            limits.max_duration_secs / 60
        )));
    }

    let metadata = tokio::fs::metadata(&extraction.output_path).await?;
    let filesize = metadata.len();
    if filesize > limits.max_file_bytes {
        discard(extraction).await;
        return Err(CoreError::ConstraintViolation(format!(
            "Output is {filesize} bytes, the limit is {} bytes",
            limits.max_file_bytes
        )));
    }

    Ok(filesize)
}

async fn discard(extraction: &Extraction) {
    if let Err(e) = tokio::fs::remove_file(&extraction.output_path).await {
        warn!(
            "failed to remove over-limit output {}: {}",
            extraction.output_path.display(),
            e
        );
    }
}

/// Best-effort cleanup of in-progress download leftovers after a timeout.
async fn remove_partial_outputs(ctx: &WorkerContext) {
    let Ok(mut entries) = tokio::fs::read_dir(&ctx.options.download_dir).await else {
        return;
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_partial = path
            .extension()
            .is_some_and(|ext| ext == "part" || ext == "ytdl");
        if is_partial {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("failed to remove partial file {}: {}", path.display(), e);
            }
        }
    }
}

async fn forward_progress(
    queue: JobQueueHandle,
    job_id: Uuid,
    mut rx: mpsc::Receiver<ExtractProgress>,
) {
    while let Some(event) = rx.recv().await {
        queue.progress(ProgressUpdate {
            job_id,
            percent: event.percent,
            message: event.message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::testing::ScriptedExtractor;
    use crate::job::{JobSnapshot, JobStatus};
    use crate::queue::JobQueue;
    use std::path::Path;
    use tempfile::TempDir;

    const URL: &str = "https://www.youtube.com/watch?v=abc123";

    fn limits() -> WorkerLimits {
        WorkerLimits {
            concurrency: 1,
            max_duration_secs: 600,
            max_file_bytes: 100 * 1024 * 1024,
            job_timeout: Duration::from_secs(5),
            requeue_backoff: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn options(dir: &Path) -> ExtractOptions {
        ExtractOptions {
            download_dir: dir.to_path_buf(),
            output_template: "%(title)s.%(ext)s".to_string(),
            audio_format: "mp3".to_string(),
            audio_quality: "192K".to_string(),
            socket_timeout_secs: 30,
            retries: 3,
            player_client: None,
        }
    }

    fn context(
        dir: &Path,
        extractor: ScriptedExtractor,
        limits: WorkerLimits,
    ) -> (JobQueueHandle, WorkerContext) {
        let queue = JobQueue::start(10, Duration::from_secs(3600));
        let sweeper = Arc::new(RetentionSweeper::new(
            dir.to_path_buf(),
            Duration::from_secs(3600),
            100,
        ));
        let ctx = WorkerContext::new(
            queue.clone(),
            Arc::new(extractor),
            sweeper,
            options(dir),
            limits,
        );
        (queue, ctx)
    }

    async fn wait_terminal(queue: &JobQueueHandle, job_id: Uuid) -> JobSnapshot {
        for _ in 0..300 {
            if let Some(snapshot) = queue.status(job_id).await {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not reach a terminal state");
    }

    #[tokio::test]
    async fn successful_extraction_completes_the_job() {
        let dir = TempDir::new().unwrap();
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::succeeding("My Song", 180),
            limits(),
        );
        let pool = WorkerPool::spawn(1, ctx);

        let admission = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, admission.job_id).await;

        assert_eq!(snapshot.status, JobStatus::Success);
        let result = snapshot.result.unwrap();
        assert_eq!(result.filename, "My Song.mp3");
        assert_eq!(result.duration_secs, 180);
        assert!(dir.path().join("My Song.mp3").is_file());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn over_duration_source_fails_and_output_is_removed() {
        let dir = TempDir::new().unwrap();
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::succeeding("Marathon", 700),
            limits(),
        );
        let pool = WorkerPool::spawn(1, ctx);

        let admission = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, admission.job_id).await;

        assert_eq!(snapshot.status, JobStatus::Error);
        let failure = snapshot.error.unwrap();
        assert!(failure.message.contains("600"), "{}", failure.message);
        assert!(!dir.path().join("Marathon.mp3").exists());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn oversized_output_fails_and_is_removed() {
        let dir = TempDir::new().unwrap();
        let mut limits = limits();
        limits.max_file_bytes = 512;
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::succeeding("Big", 60).with_body_bytes(2048),
            limits,
        );
        let pool = WorkerPool::spawn(1, ctx);

        let admission = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, admission.job_id).await;

        assert_eq!(snapshot.status, JobStatus::Error);
        assert!(snapshot.error.unwrap().message.contains("limit"));
        assert!(!dir.path().join("Big.mp3").exists());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn extractor_failure_is_terminal_and_worker_survives() {
        let dir = TempDir::new().unwrap();
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::failing("upstream refused the request"),
            limits(),
        );
        let pool = WorkerPool::spawn(1, ctx);

        let first = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, first.job_id).await;
        assert_eq!(snapshot.status, JobStatus::Error);
        assert!(
            snapshot
                .error
                .unwrap()
                .message
                .contains("upstream refused")
        );

        // The loop keeps consuming after a failure.
        let second = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, second.job_id).await;
        assert_eq!(snapshot.status, JobStatus::Error);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn slow_extraction_hits_the_deadline() {
        let dir = TempDir::new().unwrap();
        let mut limits = limits();
        limits.job_timeout = Duration::from_millis(50);
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::succeeding("Slow", 60).with_delay(Duration::from_secs(2)),
            limits,
        );
        let pool = WorkerPool::spawn(1, ctx);

        let admission = queue.submit(URL.to_string()).await.unwrap();
        let snapshot = wait_terminal(&queue, admission.job_id).await;

        assert_eq!(snapshot.status, JobStatus::Error);
        assert!(snapshot.error.unwrap().message.contains("timed out"));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn ceiling_of_one_never_runs_two_downloads_at_once() {
        let dir = TempDir::new().unwrap();
        // Two workers race over a ceiling of one: the loser defers.
        let (queue, ctx) = context(
            dir.path(),
            ScriptedExtractor::succeeding("Track", 60).with_delay(Duration::from_millis(150)),
            limits(),
        );
        let pool = WorkerPool::spawn(2, ctx);

        let first = queue.submit(URL.to_string()).await.unwrap();
        let second = queue.submit(URL.to_string()).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = queue.stats().await;
            assert!(
                stats.active_downloads <= 1,
                "two jobs were downloading at once"
            );

            let first_done = queue
                .status(first.job_id)
                .await
                .is_some_and(|s| s.status.is_terminal());
            let second_done = queue
                .status(second.job_id)
                .await
                .is_some_and(|s| s.status.is_terminal());
            if first_done && second_done {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "jobs did not finish in time"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        pool.shutdown().await;
    }
}
