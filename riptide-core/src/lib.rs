//! # Riptide Core
//!
//! Core library for the Riptide audio extraction service.
//!
//! ## Overview
//!
//! `riptide-core` owns every piece of the service with real coordination
//! logic:
//!
//! - **Job lifecycle**: download jobs tracked through a small monotonic
//!   state machine (`queued → downloading → success | error`)
//! - **Admission queue**: a bounded FIFO with non-blocking submission,
//!   owned by a single channel-driven actor together with the job store
//! - **Worker pool**: bounded-concurrency consumers that drive the
//!   extraction adapter, enforce output constraints, and never crash on
//!   adapter failures
//! - **Extraction adapter**: the [`extract::MediaExtractor`] port plus a
//!   production `yt-dlp` subprocess driver
//! - **Retention**: age- and count-based eviction of produced audio files,
//!   run periodically and opportunistically after every job
//! - **Disk guard**: pre-admission filesystem utilization checks
//!
//! The HTTP surface lives in `riptide-server`; this crate has no knowledge
//! of routes or status codes.

pub mod config;
pub mod disk;
pub mod error;
pub mod extract;
pub mod job;
pub mod queue;
pub mod retention;
pub mod validate;
pub mod worker;

pub use config::Config;
pub use disk::DiskGuard;
pub use error::{CoreError, Result};
pub use job::{DownloadJob, JobResult, JobSnapshot, JobStatus, QueueStats};
pub use queue::{Admission, JobQueue, JobQueueHandle};
pub use retention::{FileEntry, RetentionCleaner, RetentionSweeper, SweepOutcome};
pub use worker::{WorkerContext, WorkerLimits, WorkerPool};
