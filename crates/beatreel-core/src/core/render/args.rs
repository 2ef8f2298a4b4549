//! Engine argument vectors for each export stage.
//!
//! File names are relative to the job workspace.

use crate::core::settings::ExportSettings;
use crate::core::TimeSec;

pub const CONCAT_MANIFEST: &str = "concat.txt";
pub const CONCATENATED_RAW: &str = "concatenated_raw.mp4";
pub const CONCATENATED: &str = "concatenated.mp4";
pub const FINAL_OUTPUT: &str = "final.mp4";

pub fn input_clip_name(index: usize) -> String {
    format!("input_{}.mp4", index)
}

pub fn processed_clip_name(index: usize) -> String {
    format!("processed_{}.mp4", index)
}

pub fn audio_input_name(extension: &str) -> String {
    format!("audio.{}", extension)
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Scales clip timestamps by `rate`, drops audio and clamps to `target`.
pub fn retime_args(input: &str, output: &str, rate: f64, target: TimeSec) -> Vec<String> {
    owned(&[
        "-i",
        input,
        "-filter:v",
        &format!("setpts={:.4}*PTS", rate),
        "-t",
        &format!("{:.4}", target),
        "-an",
        "-y",
        output,
    ])
}

/// Concat demuxer manifest listing `files` in order.
pub fn concat_manifest<S: AsRef<str>>(files: &[S]) -> String {
    files
        .iter()
        .map(|f| format!("file '{}'", f.as_ref().replace('\'', r"'\''")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Joins the manifest's clips by stream copy.
pub fn concat_args(manifest: &str, output: &str) -> Vec<String> {
    owned(&[
        "-f", "concat", "-safe", "0", "-i", manifest, "-c", "copy", "-y", output,
    ])
}

/// The single re-encode: truncate to `expected` and force the nominal frame rate.
pub fn drift_correct_args(
    input: &str,
    output: &str,
    expected: TimeSec,
    settings: &ExportSettings,
) -> Vec<String> {
    owned(&[
        "-i",
        input,
        "-t",
        &format!("{:.4}", expected),
        "-c:v",
        &settings.video_codec,
        "-preset",
        &settings.preset,
        "-crf",
        &settings.crf.to_string(),
        "-r",
        &settings.output_fps.to_string(),
        "-y",
        output,
    ])
}

/// Audio seek value; offsets at or below zero start from the beginning.
pub fn format_seek(offset: TimeSec) -> String {
    if offset > 0.0 {
        format!("{:.3}", offset)
    } else {
        "0".to_string()
    }
}

/// Muxes video with audio seeked forward by `beat_offset`, ending at the shorter stream.
pub fn mux_args(
    video: &str,
    audio: &str,
    beat_offset: TimeSec,
    output: &str,
    settings: &ExportSettings,
) -> Vec<String> {
    let mut args = owned(&[
        "-i",
        video,
        "-ss",
        &format_seek(beat_offset),
        "-i",
        audio,
        "-c:v",
        "copy",
        "-c:a",
        &settings.audio_codec,
    ]);
    if settings.audio_fade_in_sec > 0.0 {
        args.push("-af".to_string());
        args.push(format!("afade=t=in:st=0:d={:.3}", settings.audio_fade_in_sec));
    }
    args.extend(owned(&[
        "-map",
        "0:v:0",
        "-map",
        "1:a:0",
        "-shortest",
        "-y",
        output,
    ]));
    args
}

/// Copies the corrected video unchanged when there is no audio.
pub fn passthrough_args(video: &str, output: &str) -> Vec<String> {
    owned(&["-i", video, "-c", "copy", "-y", output])
}
