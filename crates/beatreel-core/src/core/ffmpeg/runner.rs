//! FFmpeg Runner Module
//!
//! Executes FFmpeg/FFprobe as child processes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{FFmpegError, FFmpegInfo, FFmpegResult, TranscodeEngine};
use crate::core::process::engine_command;

/// Number of trailing stderr lines kept in execution errors
const STDERR_TAIL_LINES: usize = 12;

/// Media information extracted by FFprobe
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    /// Duration in seconds (0.0 when unknown)
    pub duration_sec: f64,
    /// First video stream, if present
    pub video: Option<VideoStreamInfo>,
    /// Whether any audio stream is present
    pub has_audio: bool,
    /// Container format name
    pub format: String,
}

impl MediaInfo {
    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }
}

/// Video stream information
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VideoStreamInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate (frames per second)
    pub fps: f64,
    pub codec: String,
}

/// FFmpeg runner backed by detected binaries
#[derive(Debug, Clone)]
pub struct FFmpegRunner {
    info: Arc<FFmpegInfo>,
    timeout: Option<Duration>,
}

impl FFmpegRunner {
    /// Create a new FFmpeg runner
    pub fn new(info: FFmpegInfo) -> Self {
        Self {
            info: Arc::new(info),
            timeout: None,
        }
    }

    /// Bound every engine invocation by `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get FFmpeg info
    pub fn info(&self) -> &FFmpegInfo {
        &self.info
    }

    async fn output(
        &self,
        mut cmd: tokio::process::Command,
    ) -> FFmpegResult<std::process::Output> {
        let fut = cmd.output();
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| FFmpegError::Timeout(limit.as_secs()))?
                .map_err(FFmpegError::ProcessError),
            None => fut.await.map_err(FFmpegError::ProcessError),
        }
    }
}

#[async_trait]
impl TranscodeEngine for FFmpegRunner {
    async fn run(&self, cwd: &Path, args: &[String]) -> FFmpegResult<()> {
        tracing::debug!("ffmpeg {}", args.join(" "));

        let mut cmd = engine_command(&self.info.ffmpeg_path, cwd);
        cmd.arg("-hide_banner").args(args);
        let output = self.output(cmd).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ExecutionFailed(format!(
                "{}: {}",
                output.status,
                stderr_tail(&stderr)
            )));
        }

        Ok(())
    }

    async fn probe(&self, path: &Path) -> FFmpegResult<MediaInfo> {
        if !path.exists() {
            return Err(FFmpegError::InvalidInput(format!(
                "Input file does not exist: {}",
                path.display()
            )));
        }

        let cwd = path.parent().unwrap_or_else(|| Path::new("."));
        let mut cmd = engine_command(&self.info.ffprobe_path, cwd);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path);
        let output = self.output(cmd).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FFmpegError::ProbeError(format!(
                "FFprobe failed: {}",
                stderr_tail(&stderr)
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

/// Parse FFprobe JSON output
fn parse_probe_output(json_str: &str) -> FFmpegResult<MediaInfo> {
    let probe: ProbeOutput = serde_json::from_str(json_str)
        .map_err(|e| FFmpegError::ParseError(format!("Failed to parse FFprobe output: {}", e)))?;

    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = probe
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    // Container duration first, then the video stream's own duration.
    let duration_sec = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video_stream.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite())
        .unwrap_or(0.0);

    let video = video_stream.map(|s| VideoStreamInfo {
        width: s.width.unwrap_or(0),
        height: s.height.unwrap_or(0),
        fps: s
            .r_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .unwrap_or(30.0),
        codec: s.codec_name.clone().unwrap_or_else(|| "unknown".to_string()),
    });

    Ok(MediaInfo {
        duration_sec,
        video,
        has_audio,
        format: probe
            .format
            .and_then(|f| f.format_name)
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Parses `"30/1"`, `"30000/1001"` or a plain number.
fn parse_frame_rate(value: &str) -> Option<f64> {
    match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => value.trim().parse().ok(),
    }
}
