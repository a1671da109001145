//! Retention of produced audio files.
//!
//! Listing is pure; eviction happens only in [`RetentionSweeper::sweep`],
//! which runs opportunistically after every job, from the periodic
//! [`RetentionCleaner`] task, and from the disk guard.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};

/// Metadata for one retained output file.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub created: DateTime<Utc>,
}

/// What a sweep pass removed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepOutcome {
    pub removed: usize,
    pub freed_bytes: u64,
}

struct DiskFile {
    path: PathBuf,
    name: String,
    size: u64,
    created: SystemTime,
}

/// Age- and count-based eviction over the download directory.
///
/// The directory listing is the source of truth for what exists; job
/// records are reconciled only eventually.
#[derive(Debug)]
pub struct RetentionSweeper {
    download_dir: PathBuf,
    max_age: Duration,
    max_files: usize,
}

impl RetentionSweeper {
    pub fn new(download_dir: PathBuf, max_age: Duration, max_files: usize) -> Self {
        Self {
            download_dir,
            max_age,
            max_files,
        }
    }

    /// Pure listing of retained audio files, newest first. No side effects.
    pub async fn list(&self) -> Result<Vec<FileEntry>> {
        let mut files = self.collect().await?;
        files.sort_by(|a, b| b.created.cmp(&a.created));

        Ok(files
            .into_iter()
            .map(|file| FileEntry {
                name: file.name,
                size: file.size,
                created: DateTime::<Utc>::from(file.created),
            })
            .collect())
    }

    /// Delete files older than the age horizon, then enforce the retained
    /// count cap (newest kept). Per-file removal failures are logged and
    /// skipped; the pass itself keeps going.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let mut files = self.collect().await?;
        let now = SystemTime::now();
        let mut outcome = SweepOutcome::default();

        // Age pass.
        let mut retained = Vec::with_capacity(files.len());
        for file in files.drain(..) {
            let expired = now
                .duration_since(file.created)
                .map(|age| age > self.max_age)
                .unwrap_or(false);

            if expired {
                match fs::remove_file(&file.path).await {
                    Ok(()) => {
                        info!("removed expired file {}", file.name);
                        outcome.removed += 1;
                        outcome.freed_bytes += file.size;
                    }
                    Err(e) => warn!("failed to remove {}: {}", file.name, e),
                }
            } else {
                retained.push(file);
            }
        }

        // Count cap: keep the newest `max_files`.
        retained.sort_by(|a, b| b.created.cmp(&a.created));
        for file in retained.iter().skip(self.max_files) {
            match fs::remove_file(&file.path).await {
                Ok(()) => {
                    info!("removed file over retention cap: {}", file.name);
                    outcome.removed += 1;
                    outcome.freed_bytes += file.size;
                }
                Err(e) => warn!("failed to remove {}: {}", file.name, e),
            }
        }

        if outcome.removed > 0 {
            debug!(
                "sweep removed {} files, freed {} bytes",
                outcome.removed, outcome.freed_bytes
            );
        }

        Ok(outcome)
    }

    /// Remove one named file. The caller is responsible for validating the
    /// name; this only joins it onto the download directory.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let path = self.download_dir.join(name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("removed file {name}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::NotFound(format!("file {name}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every file in the download directory; returns the count.
    pub async fn purge(&self) -> Result<usize> {
        let mut deleted = 0;
        let mut entries = fs::read_dir(&self.download_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() {
                match fs::remove_file(&path).await {
                    Ok(()) => deleted += 1,
                    Err(e) => warn!("failed to purge {}: {}", path.display(), e),
                }
            }
        }

        info!("purged {deleted} files");
        Ok(deleted)
    }

    /// Collect audio files (flat directory; the extractor never nests).
    async fn collect(&self) -> Result<Vec<DiskFile>> {
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&self.download_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != "mp3") {
                continue;
            }

            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            // Creation time where the filesystem reports it, else mtime
            // (write-once files, so the two coincide in practice).
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };

            files.push(DiskFile {
                path,
                name,
                size: metadata.len(),
                created,
            });
        }

        Ok(files)
    }
}

/// Background periodic sweep task.
#[derive(Debug)]
pub struct RetentionCleaner {
    sweeper: Arc<RetentionSweeper>,
    interval: Duration,
}

impl RetentionCleaner {
    pub fn new(sweeper: Arc<RetentionSweeper>, interval: Duration) -> Self {
        Self { sweeper, interval }
    }

    /// Start the periodic task; aborted via the returned handle on shutdown.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.tick().await; // the first tick fires immediately

            loop {
                interval.tick().await;

                if let Err(e) = self.sweeper.sweep().await {
                    warn!("periodic retention sweep failed: {e:#}");
                }
            }
        })
    }
}
