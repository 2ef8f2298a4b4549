//! Image Generation
//!
//! Parameters and results for text-to-image generation.

use serde::{Deserialize, Serialize};

use crate::core::AspectRatio;

/// Maximum prompt length accepted by generation requests
pub const MAX_PROMPT_LEN: usize = 4096;

/// Parameters for image generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationParams {
    /// Full prompt (scene prompt plus style suffix)
    pub prompt: String,
    /// Requested aspect ratio
    pub aspect_ratio: AspectRatio,
    /// Model ID override
    pub model_id: Option<String>,
}

impl ImageGenerationParams {
    /// Creates new params with just a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: AspectRatio::default(),
            model_id: None,
        }
    }

    /// Builds the prompt for a scene by appending the style suffix.
    pub fn for_scene(scene_prompt: &str, style_suffix: &str, aspect_ratio: AspectRatio) -> Self {
        Self {
            prompt: format!("{}{}", scene_prompt, style_suffix),
            aspect_ratio,
            model_id: None,
        }
    }

    /// Sets the aspect ratio
    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    /// Sets the model ID
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    /// Validate parameters
    pub fn validate(&self) -> Result<(), String> {
        let trimmed = self.prompt.trim();
        if trimmed.is_empty() {
            return Err("Prompt cannot be empty".to_string());
        }
        if trimmed.len() > MAX_PROMPT_LEN {
            return Err(format!(
                "Prompt too long (max {} characters)",
                MAX_PROMPT_LEN
            ));
        }
        Ok(())
    }
}

/// Result of image generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageGenerationResult {
    /// Remote URL of the generated image
    pub image_url: String,
    /// Model that produced it
    pub model_used: String,
    /// Wall time of the remote call in milliseconds
    pub generation_time_ms: u64,
}
