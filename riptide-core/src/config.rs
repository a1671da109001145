//! Layered service configuration: defaults → TOML file → environment.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::extract::ExtractOptions;
use crate::worker::WorkerLimits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub limits: LimitsConfig,
    pub retention: RetentionConfig,
    pub extractor: ExtractorConfig,
    pub disk: DiskConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub download_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("downloads"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Admission FIFO capacity; submissions beyond it are rejected.
    pub capacity: usize,
    /// Staleness horizon for terminal job records, pruned on read.
    pub status_ttl_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            status_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Concurrency ceiling (and worker count).
    pub concurrency: usize,
    pub max_duration_secs: u64,
    pub max_file_bytes: u64,
    pub job_timeout_secs: u64,
    pub requeue_backoff_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_duration_secs: 600,
            max_file_bytes: 100 * 1024 * 1024,
            job_timeout_secs: 1800,
            requeue_backoff_secs: 5,
            poll_interval_secs: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub max_age_secs: u64,
    pub max_files: usize,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 6 * 3600,
            max_files: 10,
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractorConfig {
    /// Extractor binary, resolved through `PATH` unless absolute.
    pub bin: String,
    pub audio_format: String,
    pub audio_quality: String,
    pub output_template: String,
    pub socket_timeout_secs: u64,
    pub retries: u32,
    pub player_client: Option<String>,
    /// Hosts (and their subdomains) accepted at submission.
    pub allowed_hosts: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            bin: "yt-dlp".to_string(),
            audio_format: "mp3".to_string(),
            audio_quality: "192K".to_string(),
            output_template: "%(title)s.%(ext)s".to_string(),
            socket_timeout_secs: 30,
            retries: 3,
            player_client: None,
            allowed_hosts: vec!["youtube.com".to_string(), "youtu.be".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiskConfig {
    pub max_used_percent: f64,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            max_used_percent: 90.0,
        }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid by the TOML file when given,
    /// overlaid by `RIPTIDE_*` environment variables.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(host) = env_override::<String>("RIPTIDE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_override("RIPTIDE_PORT") {
            self.server.port = port;
        }
        if let Some(dir) = env_override::<PathBuf>("RIPTIDE_DOWNLOAD_DIR") {
            self.storage.download_dir = dir;
        }
        if let Some(capacity) = env_override("RIPTIDE_QUEUE_CAPACITY") {
            self.queue.capacity = capacity;
        }
        if let Some(concurrency) = env_override("RIPTIDE_CONCURRENCY") {
            self.limits.concurrency = concurrency;
        }
        if let Some(bin) = env_override::<String>("RIPTIDE_YTDLP_BIN") {
            self.extractor.bin = bin;
        }
        if let Some(percent) = env_override("RIPTIDE_MAX_USED_PERCENT") {
            self.disk.max_used_percent = percent;
        }
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.storage.download_dir).with_context(|| {
            format!(
                "Failed to create download directory {}",
                self.storage.download_dir.display()
            )
        })
    }

    pub fn extract_options(&self) -> ExtractOptions {
        ExtractOptions {
            download_dir: self.storage.download_dir.clone(),
            output_template: self.extractor.output_template.clone(),
            audio_format: self.extractor.audio_format.clone(),
            audio_quality: self.extractor.audio_quality.clone(),
            socket_timeout_secs: self.extractor.socket_timeout_secs,
            retries: self.extractor.retries,
            player_client: self.extractor.player_client.clone(),
        }
    }

    pub fn worker_limits(&self) -> WorkerLimits {
        WorkerLimits {
            concurrency: self.limits.concurrency,
            max_duration_secs: self.limits.max_duration_secs,
            max_file_bytes: self.limits.max_file_bytes,
            job_timeout: Duration::from_secs(self.limits.job_timeout_secs),
            requeue_backoff: Duration::from_secs(self.limits.requeue_backoff_secs),
            poll_interval: Duration::from_secs(self.limits.poll_interval_secs),
        }
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.queue.status_ttl_secs)
    }

    pub fn retention_max_age(&self) -> Duration {
        Duration::from_secs(self.retention.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention.sweep_interval_secs)
    }
}

fn env_override<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok()?.parse().ok()
}
