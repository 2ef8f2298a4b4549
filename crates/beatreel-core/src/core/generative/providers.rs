//! Generative AI Providers
//!
//! Provider abstraction for remote generation services.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::image::{ImageGenerationParams, ImageGenerationResult};
use super::video::{VideoGenerationParams, VideoGenerationResult};
use crate::core::{CoreError, CoreResult};

/// Capabilities supported by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    /// Text-to-image generation
    ImageGeneration,
    /// Image-to-video generation
    VideoGeneration,
}

impl std::fmt::Display for ProviderCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderCapability::ImageGeneration => write!(f, "Image Generation"),
            ProviderCapability::VideoGeneration => write!(f, "Video Generation"),
        }
    }
}

/// Trait for generative AI providers
///
/// Implementations must not retry on their own: every failure is surfaced to the
/// caller verbatim so the scheduler can record it on the scene.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Returns the provider name
    fn name(&self) -> &str;

    /// Returns supported capabilities
    fn capabilities(&self) -> Vec<ProviderCapability>;

    /// Checks if provider supports a capability
    fn supports(&self, capability: ProviderCapability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// Checks if the provider is available (configured correctly)
    fn is_available(&self) -> bool;

    /// Generates an image
    async fn generate_image(
        &self,
        _params: &ImageGenerationParams,
    ) -> CoreResult<ImageGenerationResult> {
        Err(CoreError::NotSupported(format!(
            "{} does not support image generation",
            self.name()
        )))
    }

    /// Animates an image into a short clip
    async fn generate_video(
        &self,
        _params: &VideoGenerationParams,
    ) -> CoreResult<VideoGenerationResult> {
        Err(CoreError::NotSupported(format!(
            "{} does not support video generation",
            self.name()
        )))
    }
}

// ============================================================================
// Mock Provider for Testing
// ============================================================================

/// Mock provider for testing
///
/// Prompts containing any registered failure marker are rejected. Every call can be
/// delayed to simulate remote latency, and the peak number of overlapping calls is
/// recorded.
#[derive(Debug)]
pub struct MockGenerativeProvider {
    name: String,
    available: bool,
    capabilities: Vec<ProviderCapability>,
    delay: Duration,
    failure_markers: HashSet<String>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockGenerativeProvider {
    /// Creates a new mock provider
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            capabilities: vec![
                ProviderCapability::ImageGeneration,
                ProviderCapability::VideoGeneration,
            ],
            delay: Duration::ZERO,
            failure_markers: HashSet::new(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets availability
    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Restricts what the provider advertises
    pub fn with_capabilities(mut self, capabilities: Vec<ProviderCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets simulated latency
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fails any request whose prompt contains `marker`
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.failure_markers.insert(marker.into());
        self
    }

    /// Highest number of calls observed running at once
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Total calls made
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self, prompt: &str) -> CoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failure_markers.iter().any(|m| prompt.contains(m.as_str())) {
            return Err(CoreError::GenerationFailed(format!(
                "{} rejected prompt '{}'",
                self.name, prompt
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerativeProvider for MockGenerativeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<ProviderCapability> {
        self.capabilities.clone()
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate_image(
        &self,
        params: &ImageGenerationParams,
    ) -> CoreResult<ImageGenerationResult> {
        params.validate().map_err(CoreError::ValidationError)?;
        self.simulate(&params.prompt).await?;

        Ok(ImageGenerationResult {
            image_url: format!("mock://image/{}", ulid::Ulid::new()),
            model_used: "mock-image".to_string(),
            generation_time_ms: self.delay.as_millis() as u64,
        })
    }

    async fn generate_video(
        &self,
        params: &VideoGenerationParams,
    ) -> CoreResult<VideoGenerationResult> {
        params.validate().map_err(CoreError::ValidationError)?;
        self.simulate(&params.motion_prompt).await?;

        Ok(VideoGenerationResult {
            video_url: format!("mock://video/{}", ulid::Ulid::new()),
            model_used: "mock-video".to_string(),
            generation_time_ms: self.delay.as_millis() as u64,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
