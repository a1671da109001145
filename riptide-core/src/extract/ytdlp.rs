//! `yt-dlp` subprocess driver for the [`MediaExtractor`] port.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error};

use super::{ExtractError, ExtractOptions, ExtractProgress, Extraction, MediaExtractor};

/// Matches `[download]  42.1% of 3.40MiB at ...` style progress lines.
static PROGRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[download\]\s+(\d{1,3}(?:\.\d+)?)%").expect("valid regex"));

/// Drives a `yt-dlp` binary: one subprocess per extraction, progress parsed
/// from stdout line by line, stderr collected for error reporting.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    bin: String,
}

impl YtDlpExtractor {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    fn build_command(&self, url: &str, options: &ExtractOptions) -> Command {
        let mut cmd = Command::new(&self.bin);

        cmd.arg("--no-playlist");
        cmd.arg("--newline");
        cmd.arg("--no-warnings");
        cmd.arg("--socket-timeout")
            .arg(options.socket_timeout_secs.to_string());
        cmd.arg("--retries").arg(options.retries.to_string());
        cmd.arg("-f").arg("bestaudio/best");
        cmd.arg("--extract-audio");
        cmd.arg("--audio-format").arg(&options.audio_format);
        cmd.arg("--audio-quality").arg(&options.audio_quality);
        cmd.arg("--print-json");
        cmd.arg("-o")
            .arg(options.download_dir.join(&options.output_template));

        if let Some(client) = &options.player_client {
            cmd.arg("--extractor-args")
                .arg(format!("youtube:player_client={client}"));
        }

        cmd.arg(url);
        cmd
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(
        &self,
        url: &str,
        options: &ExtractOptions,
        progress: mpsc::Sender<ExtractProgress>,
    ) -> Result<Extraction, ExtractError> {
        let mut cmd = self.build_command(url, options);
        debug!("starting extractor: {:?}", cmd.as_std());

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The worker wraps this call in a deadline; dropping the future
            // must take the subprocess down with it.
            .kill_on_drop(true)
            .spawn()
            .map_err(ExtractError::Spawn)?;

        // Collect stderr off to the side for error reporting.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buffer).await;
            }
            buffer
        });

        // Progress lines and the final info JSON share stdout.
        let mut info_line = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.starts_with('{') {
                    info_line = Some(line);
                } else if let Some(event) = parse_progress_line(&line, &options.audio_format) {
                    let _ = progress.try_send(event);
                }
            }
        }

        let status = child.wait().await?;
        let stderr_output = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            error!("yt-dlp exited with status {code}: {}", excerpt(&stderr_output));
            return Err(ExtractError::Failed(format!(
                "yt-dlp exited with status {code}: {}",
                excerpt(&stderr_output)
            )));
        }

        let info_line = info_line.ok_or_else(|| {
            ExtractError::Metadata("extractor printed no info JSON".to_string())
        })?;
        let extraction = parse_extraction(&info_line, &options.audio_format)?;

        if !tokio::fs::try_exists(&extraction.output_path)
            .await
            .unwrap_or(false)
        {
            return Err(ExtractError::MissingOutput);
        }

        Ok(extraction)
    }
}

/// Parse a stdout line into a progress event, if it carries one.
fn parse_progress_line(line: &str, audio_format: &str) -> Option<ExtractProgress> {
    if let Some(captures) = PROGRESS_RE.captures(line) {
        let percent: f64 = captures[1].parse().ok()?;
        return Some(ExtractProgress {
            percent: Some(percent.min(100.0) as u8),
            message: format!("Downloading... {percent:.1}%"),
        });
    }

    if line.starts_with("[ExtractAudio]") {
        return Some(ExtractProgress {
            percent: None,
            message: format!("Converting to {audio_format}..."),
        });
    }

    None
}

/// Parse the end-of-run info JSON and resolve the produced audio path.
fn parse_extraction(info_line: &str, audio_format: &str) -> Result<Extraction, ExtractError> {
    let info: Value =
        serde_json::from_str(info_line).map_err(|e| ExtractError::Metadata(e.to_string()))?;

    let title = info
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("audio")
        .replace(['/', '\\'], "-");
    let duration_secs = info
        .get("duration")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .round() as u64;
    let thumbnail = info
        .get("thumbnail")
        .and_then(Value::as_str)
        .map(str::to_string);

    let filename = info
        .get("_filename")
        .or_else(|| info.get("filename"))
        .and_then(Value::as_str)
        .ok_or_else(|| ExtractError::Metadata("info JSON carries no filename".to_string()))?;

    // The downloader names the container file; the audio post-processor
    // swaps the extension in place.
    let output_path = PathBuf::from(filename).with_extension(audio_format);

    Ok(Extraction {
        title,
        duration_secs,
        output_path,
        thumbnail,
    })
}

fn excerpt(output: &str) -> String {
    output.lines().take(10).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExtractOptions {
        ExtractOptions {
            download_dir: PathBuf::from("/tmp/downloads"),
            output_template: "%(title)s.%(ext)s".to_string(),
            audio_format: "mp3".to_string(),
            audio_quality: "192K".to_string(),
            socket_timeout_secs: 30,
            retries: 3,
            player_client: None,
        }
    }

    fn argv(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn command_carries_the_expected_flags() {
        let extractor = YtDlpExtractor::new("yt-dlp");
        let cmd = extractor.build_command("https://youtu.be/abc123", &options());
        let args = argv(&cmd);

        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert!(args.contains(&"mp3".to_string()));
        assert!(args.contains(&"192K".to_string()));
        assert!(args.contains(&"--print-json".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/abc123");
        assert!(!args.iter().any(|a| a.starts_with("--extractor-args")));
    }

    #[test]
    fn player_client_hint_becomes_extractor_args() {
        let extractor = YtDlpExtractor::new("yt-dlp");
        let mut opts = options();
        opts.player_client = Some("android".to_string());
        let args = argv(&extractor.build_command("https://youtu.be/abc123", &opts));

        let position = args
            .iter()
            .position(|a| a == "--extractor-args")
            .expect("hint flag present");
        assert_eq!(args[position + 1], "youtube:player_client=android");
    }

    #[test]
    fn download_lines_yield_percentages() {
        let event =
            parse_progress_line("[download]  42.1% of 3.40MiB at 1.22MiB/s ETA 00:02", "mp3")
                .unwrap();
        assert_eq!(event.percent, Some(42));
        assert!(event.message.contains("42.1%"));

        let done = parse_progress_line("[download] 100% of 3.40MiB in 00:02", "mp3").unwrap();
        assert_eq!(done.percent, Some(100));
    }

    #[test]
    fn non_progress_lines_are_ignored() {
        assert!(parse_progress_line("[download] Destination: downloads/a.webm", "mp3").is_none());
        assert!(parse_progress_line("[youtube] abc123: Downloading webpage", "mp3").is_none());
    }

    #[test]
    fn conversion_phase_is_reported() {
        let event = parse_progress_line("[ExtractAudio] Destination: downloads/a.mp3", "mp3")
            .unwrap();
        assert_eq!(event.percent, None);
        assert!(event.message.contains("Converting"));
    }

    #[test]
    fn info_json_resolves_title_duration_and_output() {
        let info = r#"{"title":"Some / Song","duration":421.4,"thumbnail":"https://i.ytimg.com/vi/abc/hq.jpg","_filename":"downloads/Some _ Song.webm"}"#;
        let extraction = parse_extraction(info, "mp3").unwrap();

        assert_eq!(extraction.title, "Some - Song");
        assert_eq!(extraction.duration_secs, 421);
        assert_eq!(
            extraction.output_path,
            PathBuf::from("downloads/Some _ Song.mp3")
        );
        assert_eq!(
            extraction.thumbnail.as_deref(),
            Some("https://i.ytimg.com/vi/abc/hq.jpg")
        );
    }

    #[test]
    fn info_json_without_filename_is_rejected() {
        let result = parse_extraction(r#"{"title":"x"}"#, "mp3");
        assert!(matches!(result, Err(ExtractError::Metadata(_))));
    }
}
