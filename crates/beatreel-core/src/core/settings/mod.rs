//! Settings Persistence System
//!
//! Provides persistent engine settings with:
//! - Atomic file writes (temp file + rename)
//! - Tolerant loading with per-section defaults
//! - Normalization that clamps out-of-range values instead of failing
//!
//! Storage location: {config_dir}/beatreel/settings.json

use std::fs;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::fs::atomic_write_json_pretty;
use crate::core::{CoreError, CoreResult};

/// Settings schema version for migration support
pub const SETTINGS_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE: &str = "settings.json";

/// Lock file name (advisory lock to prevent concurrent writers)
pub const SETTINGS_LOCK_FILE: &str = "settings.json.lock";

/// Upper bound for the generation concurrency limit
pub const MAX_CONCURRENCY_LIMIT: usize = 16;

const X264_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
];

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Schema version for migrations
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub generation: GenerationSettings,

    #[serde(default)]
    pub export: ExportSettings,

    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub ffmpeg: FFmpegSettings,
}

fn default_version() -> u32 {
    SETTINGS_VERSION
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            generation: GenerationSettings::default(),
            export: ExportSettings::default(),
            relay: RelaySettings::default(),
            ffmpeg: FFmpegSettings::default(),
        }
    }
}

impl AppSettings {
    /// Normalizes and clamps settings so persisted state is always valid.
    pub fn normalize(&mut self) {
        self.version = SETTINGS_VERSION;

        let generation = &mut self.generation;
        generation.concurrency_limit = generation.concurrency_limit.clamp(1, MAX_CONCURRENCY_LIMIT);
        generation.request_timeout_sec = generation.request_timeout_sec.clamp(5, 600);
        generation.poll_interval_ms = generation.poll_interval_ms.clamp(100, 60_000);
        generation.max_poll_sec = generation.max_poll_sec.clamp(10, 3_600);
        if generation.image_model.trim().is_empty() {
            generation.image_model = default_image_model();
        }
        if generation.video_model.trim().is_empty() {
            generation.video_model = default_video_model();
        }
        if generation.queue_base_url.trim().is_empty() {
            generation.queue_base_url = default_queue_base_url();
        }
        generation.video_resolution = normalize_enum(
            &generation.video_resolution,
            &["480p", "720p", "1080p"],
            default_video_resolution(),
        );

        let export = &mut self.export;
        export.output_fps = export.output_fps.clamp(1, 120);
        export.crf = export.crf.min(51);
        export.preset = normalize_enum(&export.preset, X264_PRESETS, default_preset());
        if export.video_codec.trim().is_empty() {
            export.video_codec = default_video_codec();
        }
        if export.audio_codec.trim().is_empty() {
            export.audio_codec = default_audio_codec();
        }
        export.source_clip_duration_sec = clamp_f64(export.source_clip_duration_sec, 0.1, 60.0);
        export.audio_fade_in_sec = clamp_f64(export.audio_fade_in_sec, 0.0, 10.0);
        if export.engine_timeout_sec == Some(0) {
            export.engine_timeout_sec = None;
        }

        self.relay.timeout_sec = self.relay.timeout_sec.clamp(1, 120);
        if self.relay.user_agent.trim().is_empty() {
            self.relay.user_agent = default_user_agent();
        }
    }
}

fn clamp_f64(value: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return min;
    }
    value.clamp(min, max)
}

fn normalize_enum(value: &str, allowed: &[&str], fallback: String) -> String {
    if allowed.iter().any(|v| v.eq_ignore_ascii_case(value)) {
        value.to_ascii_lowercase()
    } else {
        fallback
    }
}

fn default_true() -> bool {
    true
}

/// Remote generation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Maximum in-flight generation requests per batch
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    #[serde(default = "default_image_model")]
    pub image_model: String,

    #[serde(default = "default_video_model")]
    pub video_model: String,

    #[serde(default = "default_video_resolution")]
    pub video_resolution: String,

    /// Prepended to every scene prompt for image-to-video requests
    #[serde(default = "default_motion_prompt_prefix")]
    pub motion_prompt_prefix: String,

    #[serde(default = "default_queue_base_url")]
    pub queue_base_url: String,

    /// Per-HTTP-request timeout
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Give up on a queued request after this long
    #[serde(default = "default_max_poll_sec")]
    pub max_poll_sec: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            image_model: default_image_model(),
            video_model: default_video_model(),
            video_resolution: default_video_resolution(),
            motion_prompt_prefix: default_motion_prompt_prefix(),
            queue_base_url: default_queue_base_url(),
            request_timeout_sec: default_request_timeout_sec(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_sec: default_max_poll_sec(),
        }
    }
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_image_model() -> String {
    "xai/grok-imagine".to_string()
}

fn default_video_model() -> String {
    "xai/grok-imagine-video/image-to-video".to_string()
}

fn default_video_resolution() -> String {
    "720p".to_string()
}

fn default_motion_prompt_prefix() -> String {
    "subtle cinematic motion, gentle camera movement, ".to_string()
}

fn default_queue_base_url() -> String {
    "https://queue.fal.run".to_string()
}

fn default_request_timeout_sec() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_poll_sec() -> u64 {
    600
}

/// Assembly pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExportSettings {
    /// Nominal frame rate forced by drift correction
    #[serde(default = "default_output_fps")]
    pub output_fps: u32,

    #[serde(default = "default_video_codec")]
    pub video_codec: String,

    /// Encoder preset for the drift-correction re-encode
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant rate factor (0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Contractual length of every generated clip
    #[serde(default = "default_source_clip_duration_sec")]
    pub source_clip_duration_sec: f64,

    /// Measure each fetched clip and retime from its real length
    #[serde(default = "default_true")]
    pub probe_source_clips: bool,

    /// Measure the drift-corrected video and warn when it misses the expected length
    #[serde(default = "default_true")]
    pub verify_corrected_duration: bool,

    /// Fade-in applied to the muxed audio; 0 disables
    #[serde(default)]
    pub audio_fade_in_sec: f64,

    /// Bound for a single engine invocation; none waits indefinitely
    #[serde(default)]
    pub engine_timeout_sec: Option<u64>,

    /// Parent directory for per-job scratch space; none uses the system temp dir
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_fps: default_output_fps(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            source_clip_duration_sec: default_source_clip_duration_sec(),
            probe_source_clips: true,
            verify_corrected_duration: true,
            audio_fade_in_sec: 0.0,
            engine_timeout_sec: None,
            scratch_dir: None,
        }
    }
}

fn default_output_fps() -> u32 {
    30
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_source_clip_duration_sec() -> f64 {
    crate::core::timing::SOURCE_CLIP_DURATION_SEC
}

/// Fetch relay settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    #[serde(default = "default_relay_timeout_sec")]
    pub timeout_sec: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            timeout_sec: default_relay_timeout_sec(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_relay_timeout_sec() -> u64 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; ImageProxy/1.0)".to_string()
}

/// Explicit engine binary locations
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FFmpegSettings {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

/// Default directory holding `settings.json`
pub fn default_settings_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("beatreel")
}

/// Settings manager for loading, saving, and resetting settings
pub struct SettingsManager {
    settings_path: PathBuf,
}

impl SettingsManager {
    /// Create a new settings manager rooted at `settings_dir`
    pub fn new(settings_dir: impl AsRef<Path>) -> Self {
        Self {
            settings_path: settings_dir.as_ref().join(SETTINGS_FILE),
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.settings_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())?;

        let locked = if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
        } else {
            fs2::FileExt::lock_shared(&lock_file)
        };
        locked.map_err(|e| CoreError::Internal(format!("Failed to lock settings file: {}", e)))?;

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("Failed to unlock settings lock file: {}", e);
        }

        result
    }

    /// Get the settings file path
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// Load settings from disk, returning defaults if the file is missing or unreadable
    pub fn load(&self) -> AppSettings {
        let result = self.with_lock(false, || {
            if !self.settings_path.exists() {
                info!("Settings file not found, using defaults");
                return Ok(AppSettings::default());
            }

            let content = fs::read_to_string(&self.settings_path)?;
            let mut settings = serde_json::from_str::<AppSettings>(&content)?;
            if settings.version < SETTINGS_VERSION {
                info!(
                    "Migrating settings from version {} to {}",
                    settings.version, SETTINGS_VERSION
                );
            }
            settings.normalize();
            Ok(settings)
        });

        result.unwrap_or_else(|e| {
            warn!("Failed to load settings, using defaults: {}", e);
            AppSettings::default()
        })
    }

    /// Normalize and persist settings, returning what was written
    pub fn save(&self, settings: &AppSettings) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            let mut normalized = settings.clone();
            normalized.normalize();
            atomic_write_json_pretty(&self.settings_path, &normalized)?;
            info!("Settings saved to {:?}", self.settings_path);
            Ok(normalized)
        })
    }

    /// Reset settings to defaults and delete the settings file
    pub fn reset(&self) -> CoreResult<AppSettings> {
        self.with_lock(true, || {
            if self.settings_path.exists() {
                fs::remove_file(&self.settings_path)?;
                info!("Settings file deleted");
            }
            Ok(AppSettings::default())
        })
    }
}
