//! FFmpeg Integration Module
//!
//! The assembly pipeline talks to the transcoding engine through the
//! [`TranscodeEngine`] trait: one call runs an argument vector inside a working
//! directory, the other probes a media file. [`FFmpegRunner`] is the real
//! implementation backed by system `ffmpeg`/`ffprobe` binaries.

mod detection;
mod runner;

use std::path::Path;

use async_trait::async_trait;

pub use detection::*;
pub use runner::{FFmpegRunner, MediaInfo, VideoStreamInfo};

/// FFmpeg-related error types
#[derive(Debug, thiserror::Error)]
pub enum FFmpegError {
    #[error("FFmpeg not found. Please install FFmpeg or set ffmpegPath in settings.")]
    NotFound,

    #[error("FFmpeg execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input file: {0}")]
    InvalidInput(String),

    #[error("FFprobe error: {0}")]
    ProbeError(String),

    #[error("Process error: {0}")]
    ProcessError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Timeout: engine did not finish within {0} seconds")]
    Timeout(u64),
}

pub type FFmpegResult<T> = Result<T, FFmpegError>;

/// Transcoding engine used by the assembly pipeline.
///
/// `args` never include the program name. Relative paths in `args` resolve
/// against `cwd`.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    /// Runs the engine once and waits for it to exit.
    async fn run(&self, cwd: &Path, args: &[String]) -> FFmpegResult<()>;

    /// Measures a media file.
    async fn probe(&self, path: &Path) -> FFmpegResult<MediaInfo>;
}
