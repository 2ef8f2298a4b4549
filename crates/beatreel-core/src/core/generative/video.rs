//! Video Generation Types
//!
//! Image-to-video generation of fixed-length clips.

use serde::{Deserialize, Serialize};

use super::image::MAX_PROMPT_LEN;

/// Clip length requested from the video collaborator, in whole seconds.
pub const FIXED_CLIP_SECONDS: u32 = 1;

/// Parameters for image-to-video generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationParams {
    /// Source image to animate
    pub image_url: String,
    /// Motion description
    pub motion_prompt: String,
    /// Clip duration in seconds
    pub duration_sec: u32,
    /// Output resolution label (e.g. "720p")
    pub resolution: String,
    /// Model ID override
    pub model_id: Option<String>,
}

impl VideoGenerationParams {
    /// Creates params for a fixed one-second clip
    pub fn new(image_url: impl Into<String>, motion_prompt: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            motion_prompt: motion_prompt.into(),
            duration_sec: FIXED_CLIP_SECONDS,
            resolution: "720p".to_string(),
            model_id: None,
        }
    }

    /// Builds the motion prompt for a scene.
    pub fn for_scene(image_url: &str, motion_prefix: &str, scene_prompt: &str) -> Self {
        Self::new(image_url, format!("{}{}", motion_prefix, scene_prompt))
    }

    /// Sets the resolution label
    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = resolution.into();
        self
    }

    /// Sets the model ID
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.image_url.trim().is_empty() {
            return Err("Image-to-video requires a source image".to_string());
        }
        let trimmed = self.motion_prompt.trim();
        if trimmed.is_empty() {
            return Err("Motion prompt cannot be empty".to_string());
        }
        if trimmed.len() > MAX_PROMPT_LEN {
            return Err(format!(
                "Motion prompt too long (max {} characters)",
                MAX_PROMPT_LEN
            ));
        }
        if !(1..=15).contains(&self.duration_sec) {
            return Err(format!(
                "Clip duration must be between 1 and 15 seconds (got {})",
                self.duration_sec
            ));
        }
        Ok(())
    }
}

/// Result of video generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoGenerationResult {
    /// Remote URL of the generated clip
    pub video_url: String,
    /// Model that produced it
    pub model_used: String,
    /// Wall time of the remote call in milliseconds
    pub generation_time_ms: u64,
}
