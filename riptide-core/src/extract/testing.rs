//! Scripted extractor for lifecycle tests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ExtractError, ExtractOptions, ExtractProgress, Extraction, MediaExtractor};

/// A deterministic stand-in for the subprocess driver: emits a couple of
/// progress events, optionally sleeps, then either writes an output file
/// and succeeds or fails with a scripted message.
#[derive(Debug, Clone)]
pub struct ScriptedExtractor {
    title: String,
    duration_secs: u64,
    body_bytes: usize,
    delay: Duration,
    fail_with: Option<String>,
}

impl ScriptedExtractor {
    pub fn succeeding(title: impl Into<String>, duration_secs: u64) -> Self {
        Self {
            title: title.into(),
            duration_secs,
            body_bytes: 1024,
            delay: Duration::ZERO,
            fail_with: None,
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            title: "unused".to_string(),
            duration_secs: 0,
            body_bytes: 0,
            delay: Duration::ZERO,
            fail_with: Some(message.into()),
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_body_bytes(mut self, bytes: usize) -> Self {
        self.body_bytes = bytes;
        self
    }
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _url: &str,
        options: &ExtractOptions,
        progress: mpsc::Sender<ExtractProgress>,
    ) -> Result<Extraction, ExtractError> {
        let _ = progress.try_send(ExtractProgress {
            percent: Some(0),
            message: "Downloading... 0.0%".to_string(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(message) = &self.fail_with {
            return Err(ExtractError::Failed(message.clone()));
        }

        let _ = progress.try_send(ExtractProgress {
            percent: Some(100),
            message: "Downloading... 100.0%".to_string(),
        });

        let filename = format!("{}.{}", self.title, options.audio_format);
        let output_path = options.download_dir.join(filename);
        tokio::fs::write(&output_path, vec![0u8; self.body_bytes]).await?;

        Ok(Extraction {
            title: self.title.clone(),
            duration_secs: self.duration_secs,
            output_path,
            thumbnail: None,
        })
    }
}
