//! FFmpeg Detection Module
//!
//! Locates the `ffmpeg` and `ffprobe` binaries: explicit settings first, then
//! common install directories, then the `PATH` lookup tool of the platform.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::{FFmpegError, FFmpegResult};
use crate::core::process::configure_std_command;
use crate::core::settings::FFmpegSettings;

/// Information about detected FFmpeg installation
#[derive(Debug, Clone)]
pub struct FFmpegInfo {
    /// Path to ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// Path to ffprobe binary
    pub ffprobe_path: PathBuf,
    /// FFmpeg version string
    pub version: String,
}

/// Detect FFmpeg honoring explicit paths from settings.
pub fn detect_ffmpeg(settings: &FFmpegSettings) -> FFmpegResult<FFmpegInfo> {
    let ffmpeg_path = match &settings.ffmpeg_path {
        Some(path) => explicit_binary(path)?,
        None => find_binary("ffmpeg")?,
    };
    let ffprobe_path = match &settings.ffprobe_path {
        Some(path) => explicit_binary(path)?,
        None => find_binary("ffprobe")?,
    };

    let version = get_ffmpeg_version(&ffmpeg_path)?;
    tracing::info!(
        "Using FFmpeg {} at {}",
        version,
        ffmpeg_path.display()
    );

    Ok(FFmpegInfo {
        ffmpeg_path,
        ffprobe_path,
        version,
    })
}

/// Detect FFmpeg from common install locations and the system PATH.
pub fn detect_system_ffmpeg() -> FFmpegResult<FFmpegInfo> {
    detect_ffmpeg(&FFmpegSettings::default())
}

fn explicit_binary(path: &Path) -> FFmpegResult<PathBuf> {
    if path.is_file() {
        Ok(path.to_path_buf())
    } else {
        Err(FFmpegError::InvalidInput(format!(
            "Configured binary does not exist: {}",
            path.display()
        )))
    }
}

fn binary_file_name(name: &str) -> String {
    if cfg!(target_os = "windows") {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn find_binary(name: &str) -> FFmpegResult<PathBuf> {
    let file_name = binary_file_name(name);
    if let Some(found) = get_common_ffmpeg_paths()
        .into_iter()
        .map(|dir| dir.join(&file_name))
        .find(|candidate| candidate.is_file())
    {
        return Ok(found);
    }

    let lookup = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let mut cmd = Command::new(lookup);
    cmd.arg(name);
    configure_std_command(&mut cmd);
    let output = cmd.output().map_err(|_| FFmpegError::NotFound)?;

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(first_line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) {
            return Ok(PathBuf::from(first_line));
        }
    }

    Err(FFmpegError::NotFound)
}

/// Get common FFmpeg installation paths for the current platform
fn get_common_ffmpeg_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from(r"C:\ffmpeg\bin"));
        paths.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        if let Ok(programdata) = std::env::var("ProgramData") {
            paths.push(PathBuf::from(programdata).join("chocolatey").join("bin"));
        }
        if let Ok(userprofile) = std::env::var("USERPROFILE") {
            paths.push(PathBuf::from(userprofile).join("scoop").join("shims"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/opt/homebrew/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/opt/local/bin"));
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        paths.push(PathBuf::from("/usr/bin"));
        paths.push(PathBuf::from("/usr/local/bin"));
        paths.push(PathBuf::from("/snap/bin"));
    }

    paths
}

fn get_ffmpeg_version(ffmpeg_path: &Path) -> FFmpegResult<String> {
    let mut cmd = Command::new(ffmpeg_path);
    cmd.arg("-version");
    configure_std_command(&mut cmd);
    let output = cmd.output().map_err(FFmpegError::ProcessError)?;

    if !output.status.success() {
        return Err(FFmpegError::ExecutionFailed(
            "Failed to get FFmpeg version".to_string(),
        ));
    }

    parse_version_line(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts the version token from `ffmpeg -version` output.
fn parse_version_line(output: &str) -> FFmpegResult<String> {
    let first_line = output
        .lines()
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| FFmpegError::ParseError("Could not parse FFmpeg version".to_string()))?;

    Ok(first_line
        .strip_prefix("ffmpeg version ")
        .and_then(|rest| rest.split_whitespace().next())
        .unwrap_or(first_line)
        .to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_paths_not_empty() {
        assert!(!get_common_ffmpeg_paths().is_empty());
    }

    #[test]
    fn test_parse_version_line() {
        let out = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc";
        assert_eq!(parse_version_line(out).unwrap(), "6.1.1-3ubuntu5");

        assert_eq!(parse_version_line("custom build").unwrap(), "custom build");
        assert!(parse_version_line("").is_err());
    }

    #[test]
    fn test_explicit_missing_binary_is_rejected() {
        let settings = FFmpegSettings {
            ffmpeg_path: Some(PathBuf::from("/definitely/not/here/ffmpeg")),
            ffprobe_path: None,
        };
        let err = detect_ffmpeg(&settings).unwrap_err();
        assert!(matches!(err, FFmpegError::InvalidInput(_)));
    }

    #[test]
    fn test_detect_system_ffmpeg() {
        // Passes whether or not FFmpeg is installed on this machine
        match detect_system_ffmpeg() {
            Ok(info) => {
                assert!(info.ffmpeg_path.exists());
                assert!(!info.version.is_empty());
            }
            Err(e) => {
                assert!(matches!(
                    e,
                    FFmpegError::NotFound
                        | FFmpegError::ProcessError(_)
                        | FFmpegError::ExecutionFailed(_)
                ));
            }
        }
    }
}
