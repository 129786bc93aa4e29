//! ffmpeg-backed [`MediaMuxer`].

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::muxer::{MediaMuxer, MergeJob, TranscodeJob};
use crate::config::{PipelineConfig, ToolsConfig};
use crate::downloader::ProgressHandle;
use crate::queue::TrimRange;
use crate::utils::process::tokio_command;
use crate::{Error, Result};

/// Number of stderr lines kept for error reports.
const STDERR_TAIL: usize = 20;

/// Containers that benefit from `-movflags +faststart`.
const FASTSTART_CONTAINERS: [&str; 3] = ["mp4", "mov", "m4v"];

#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    ffmpeg_path: String,
    video_codec: String,
    preset: Option<String>,
}

impl FfmpegMuxer {
    pub fn new(ffmpeg_path: impl Into<String>, video_codec: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            video_codec: video_codec.into(),
            preset: None,
        }
    }

    pub fn from_config(tools: &ToolsConfig, pipeline: &PipelineConfig) -> Self {
        Self::new(&tools.ffmpeg_path, &pipeline.video_codec).with_preset(pipeline.preset.clone())
    }

    pub fn with_preset(mut self, preset: Option<String>) -> Self {
        self.preset = preset;
        self
    }

    fn common_args() -> Vec<String> {
        ["-y", "-hide_banner", "-nostats", "-loglevel", "info", "-progress", "pipe:1"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn push_output(args: &mut Vec<String>, time_range: Option<TrimRange>, output: &Path) {
        if let Some(range) = time_range {
            args.extend(["-ss".to_string(), format!("{:.3}", range.start)]);
            args.extend(["-to".to_string(), format!("{:.3}", range.end)]);
        }

        let ext = output
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if FASTSTART_CONTAINERS.contains(&ext.as_str()) {
            args.extend(["-movflags".to_string(), "+faststart".to_string()]);
        }

        args.push(output.to_string_lossy().into_owned());
    }

    /// Arguments for a lossless merge of one video and one audio stream.
    pub fn build_merge_args(&self, job: &MergeJob) -> Vec<String> {
        let mut args = Self::common_args();
        args.extend(["-i".to_string(), job.video.to_string_lossy().into_owned()]);
        args.extend(["-i".to_string(), job.audio.to_string_lossy().into_owned()]);
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        args.extend(["-map".to_string(), "1:a:0".to_string()]);
        args.extend(["-c".to_string(), "copy".to_string()]);
        Self::push_output(&mut args, job.time_range, &job.output);
        args
    }

    /// Arguments for re-encoding a video-only stream.
    pub fn build_transcode_args(&self, job: &TranscodeJob) -> Vec<String> {
        let mut args = Self::common_args();
        args.extend(["-i".to_string(), job.input.to_string_lossy().into_owned()]);
        args.extend(["-map".to_string(), "0:v:0".to_string()]);
        args.extend(["-c:v".to_string(), self.video_codec.clone()]);
        if let Some(preset) = &self.preset {
            args.extend(["-preset".to_string(), preset.clone()]);
        }
        args.push("-an".to_string());
        Self::push_output(&mut args, None, &job.output);
        args
    }

    /// Run ffmpeg, turning `-progress` output into fractions.
    ///
    /// `expected` is the output duration in seconds when already known (a
    /// trim window); otherwise the first `Duration:` line on stderr is used.
    async fn run(&self, args: Vec<String>, expected: Option<f64>, progress: &ProgressHandle) -> Result<()> {
        debug!(ffmpeg = %self.ffmpeg_path, args = ?args, "Spawning ffmpeg");

        let mut child = tokio_command(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::pipeline(format!("ffmpeg not found at '{}'", self.ffmpeg_path))
                }
                _ => Error::pipeline(format!("failed to spawn ffmpeg: {e}")),
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::pipeline("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::pipeline("ffmpeg stderr not captured"))?;
        let mut stdout = BufReader::new(stdout).lines();
        let mut stderr = BufReader::new(stderr).lines();

        let started = Instant::now();
        let mut total = expected.filter(|d| *d > 0.0);
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL);
        let (mut stdout_open, mut stderr_open) = (true, true);

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        if let (Some(total), Some(done)) = (total, parse_out_time(&line)) {
                            progress.report_fraction(done / total, started.elapsed());
                        }
                    }
                    _ => stdout_open = false,
                },
                line = stderr.next_line(), if stderr_open => match line {
                    Ok(Some(line)) => {
                        if total.is_none() {
                            total = parse_duration_line(&line).filter(|d| *d > 0.0);
                        }
                        if line.to_ascii_lowercase().contains("error") {
                            warn!(target: "mediadl::ffmpeg", "{line}");
                        } else {
                            debug!(target: "mediadl::ffmpeg", "{line}");
                        }
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    _ => stderr_open = false,
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::pipeline(format!("failed to wait for ffmpeg: {e}")))?;
        if !status.success() {
            let tail = tail.into_iter().collect::<Vec<_>>().join("\n");
            return Err(Error::pipeline(format!("ffmpeg exited with {status}: {tail}")));
        }

        progress.report_fraction(1.0, started.elapsed());
        info!(duration_ms = started.elapsed().as_millis() as u64, "ffmpeg finished");
        Ok(())
    }
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn merge(&self, job: &MergeJob, progress: &ProgressHandle) -> Result<()> {
        let args = self.build_merge_args(job);
        self.run(args, job.time_range.map(|r| r.duration()), progress)
            .await
    }

    async fn transcode(&self, job: &TranscodeJob, progress: &ProgressHandle) -> Result<()> {
        let args = self.build_transcode_args(job);
        self.run(args, None, progress).await
    }
}

/// Parse `HH:MM:SS(.fff)` into seconds.
pub fn parse_time(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Input duration from a stderr line like `  Duration: 00:01:02.50, start: ...`.
pub fn parse_duration_line(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let value = rest.split(',').next()?.trim();
    parse_time(value)
}

/// Output position in seconds from a `-progress` key/value line.
///
/// `out_time_ms` is in microseconds despite its name.
pub fn parse_out_time(line: &str) -> Option<f64> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "out_time_us" | "out_time_ms" => value
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(|v| v as f64 / 1_000_000.0),
        "out_time" => parse_time(value),
        _ => None,
    }
}
