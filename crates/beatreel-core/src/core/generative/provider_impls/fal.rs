//! fal.ai Queue Provider
//!
//! Adapter for fal.ai hosted models (text-to-image and image-to-video) using the
//! queue REST API: submit a request, poll its status URL, then fetch the result.
//!
//! Requests are never retried here. A failed submit, poll or result fetch is
//! returned to the caller as-is.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::generative::image::{ImageGenerationParams, ImageGenerationResult};
use crate::core::generative::providers::{GenerativeProvider, ProviderCapability};
use crate::core::generative::video::{VideoGenerationParams, VideoGenerationResult};
use crate::core::settings::GenerationSettings;
use crate::core::{CoreError, CoreResult};

// =============================================================================
// API Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ImageInput<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
}

#[derive(Debug, Serialize)]
struct VideoInput<'a> {
    image_url: &'a str,
    prompt: &'a str,
    duration: u32,
    resolution: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueueTicket {
    request_id: String,
    #[serde(default)]
    status_url: Option<String>,
    #[serde(default)]
    response_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueueStatusResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageOutput {
    #[serde(default)]
    images: Vec<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct VideoOutput {
    #[serde(default)]
    video: Option<MediaRef>,
}

#[derive(Debug, Deserialize)]
struct MediaRef {
    url: String,
}

/// Queue state of a submitted request
#[derive(Debug, Clone, PartialEq, Eq)]
enum QueueState {
    InQueue,
    InProgress,
    Completed,
    Failed(String),
}

// =============================================================================
// FalProvider
// =============================================================================

/// fal.ai queue-backed provider
pub struct FalProvider {
    /// HTTP client with configured timeout
    client: reqwest::Client,
    /// API key for authentication
    api_key: String,
    /// Queue base URL
    base_url: String,
    /// Text-to-image model
    image_model: String,
    /// Image-to-video model
    video_model: String,
    /// Resolution label for video requests
    video_resolution: String,
    /// Delay between status polls
    poll_interval: Duration,
    /// Give up polling after this long
    max_poll: Duration,
}

impl std::fmt::Debug for FalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FalProvider")
            .field("base_url", &self.base_url)
            .field("image_model", &self.image_model)
            .field("video_model", &self.video_model)
            .finish_non_exhaustive()
    }
}

impl FalProvider {
    /// Create a provider from generation settings
    pub fn new(api_key: impl Into<String>, settings: &GenerationSettings) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_sec))
            .build()
            .map_err(|e| CoreError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: settings.queue_base_url.trim_end_matches('/').to_string(),
            image_model: settings.image_model.clone(),
            video_model: settings.video_model.clone(),
            video_resolution: settings.video_resolution.clone(),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            max_poll: Duration::from_secs(settings.max_poll_sec),
        })
    }

    /// Set custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the submit URL for a model
    fn submit_url(&self, model: &str) -> String {
        format!("{}/{}", self.base_url, model)
    }

    /// Status URL, preferring the one returned by the queue
    fn status_url(&self, model: &str, ticket: &QueueTicket) -> String {
        ticket.status_url.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/requests/{}/status",
                self.base_url, model, ticket.request_id
            )
        })
    }

    /// Result URL, preferring the one returned by the queue
    fn response_url(&self, model: &str, ticket: &QueueTicket) -> String {
        ticket.response_url.clone().unwrap_or_else(|| {
            format!("{}/{}/requests/{}", self.base_url, model, ticket.request_id)
        })
    }

    fn parse_queue_state(response: &QueueStatusResponse) -> QueueState {
        match response.status.as_str() {
            "IN_QUEUE" => QueueState::InQueue,
            "IN_PROGRESS" => QueueState::InProgress,
            "COMPLETED" => match &response.error {
                Some(err) if !err.is_empty() => QueueState::Failed(err.clone()),
                _ => QueueState::Completed,
            },
            other => QueueState::Failed(
                response
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("Unexpected queue status: {}", other)),
            ),
        }
    }

    /// Parse an error response body
    fn parse_api_error(status: StatusCode, body: &str) -> CoreError {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(detail) = value.get("detail") {
                let detail = match detail {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                return CoreError::GenerationFailed(format!(
                    "fal.ai API error ({}): {}",
                    status, detail
                ));
            }
        }

        let truncated: String = body.chars().take(500).collect();
        CoreError::GenerationFailed(format!("fal.ai API error ({}): {}", status, truncated))
    }

    fn extract_image_url(body: &serde_json::Value) -> CoreResult<String> {
        let output: ImageOutput = serde_json::from_value(body.clone())
            .map_err(|e| CoreError::GenerationFailed(format!("Malformed image result: {}", e)))?;
        output
            .images
            .into_iter()
            .next()
            .map(|m| m.url)
            .ok_or_else(|| CoreError::GenerationFailed("No image generated".to_string()))
    }

    fn extract_video_url(body: &serde_json::Value) -> CoreResult<String> {
        let output: VideoOutput = serde_json::from_value(body.clone())
            .map_err(|e| CoreError::GenerationFailed(format!("Malformed video result: {}", e)))?;
        output
            .video
            .map(|m| m.url)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CoreError::GenerationFailed("No video generated".to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> CoreResult<T> {
        let resp = self
            .client
            .get(url)
            .header("Authorization", format!("Key {}", self.api_key))
            .send()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("Network error: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Self::parse_api_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| CoreError::GenerationFailed(format!("Failed to parse response: {}", e)))
    }

    /// Submits `input` to `model` and waits for the queued result.
    async fn run<I: Serialize>(&self, model: &str, input: &I) -> CoreResult<serde_json::Value> {
        let started = Instant::now();

        let resp = self
            .client
            .post(self.submit_url(model))
            .header("Authorization", format!("Key {}", self.api_key))
            .json(input)
            .send()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("Network error: {}", e)))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| CoreError::GenerationFailed(format!("Failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(Self::parse_api_error(status, &body));
        }
        let ticket: QueueTicket = serde_json::from_str(&body)
            .map_err(|e| CoreError::GenerationFailed(format!("Failed to parse ticket: {}", e)))?;

        info!("fal.ai request submitted: model={} id={}", model, ticket.request_id);

        let status_url = self.status_url(model, &ticket);
        loop {
            let response: QueueStatusResponse = self.get_json(&status_url).await?;
            match Self::parse_queue_state(&response) {
                QueueState::Completed => break,
                QueueState::Failed(error) => {
                    return Err(CoreError::GenerationFailed(error));
                }
                state => {
                    debug!("fal.ai request {} is {:?}", ticket.request_id, state);
                }
            }

            if started.elapsed() > self.max_poll {
                warn!(
                    "fal.ai request {} still pending after {:?}",
                    ticket.request_id, self.max_poll
                );
                return Err(CoreError::GenerationFailed(format!(
                    "Generation did not finish within {} seconds",
                    self.max_poll.as_secs()
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.get_json(&self.response_url(model, &ticket)).await
    }
}

#[async_trait]
impl GenerativeProvider for FalProvider {
    fn name(&self) -> &str {
        "fal"
    }

    fn capabilities(&self) -> Vec<ProviderCapability> {
        vec![
            ProviderCapability::ImageGeneration,
            ProviderCapability::VideoGeneration,
        ]
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate_image(
        &self,
        params: &ImageGenerationParams,
    ) -> CoreResult<ImageGenerationResult> {
        params.validate().map_err(CoreError::ValidationError)?;
        let model = params.model_id.as_deref().unwrap_or(&self.image_model);
        let started = Instant::now();

        let body = self
            .run(
                model,
                &ImageInput {
                    prompt: &params.prompt,
                    aspect_ratio: params.aspect_ratio.as_str(),
                },
            )
            .await?;

        Ok(ImageGenerationResult {
            image_url: Self::extract_image_url(&body)?,
            model_used: model.to_string(),
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn generate_video(
        &self,
        params: &VideoGenerationParams,
    ) -> CoreResult<VideoGenerationResult> {
        params.validate().map_err(CoreError::ValidationError)?;
        let model = params.model_id.as_deref().unwrap_or(&self.video_model);
        let resolution = if params.resolution.is_empty() {
            self.video_resolution.as_str()
        } else {
            params.resolution.as_str()
        };
        let started = Instant::now();

        let body = self
            .run(
                model,
                &VideoInput {
                    image_url: &params.image_url,
                    prompt: &params.motion_prompt,
                    duration: params.duration_sec,
                    resolution,
                },
            )
            .await?;

        Ok(VideoGenerationResult {
            video_url: Self::extract_video_url(&body)?,
            model_used: model.to_string(),
            generation_time_ms: started.elapsed().as_millis() as u64,
        })
    }
}
