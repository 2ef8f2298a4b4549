//! Scene Generation Batches
//!
//! Fills image and video slots on the scene board through a generative
//! provider. Each job claims its scene by id when a worker admits it and
//! writes the result back by the same id, so completion order never matters
//! and a failure lands only on the scene that caused it.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{PoolProgress, TaskPool};
use crate::core::generative::{
    GenerativeProvider, ImageGenerationParams, ProviderCapability, VideoGenerationParams,
};
use crate::core::scenes::{GenerationPhase, SceneBoard, SceneStatus};
use crate::core::settings::GenerationSettings;
use crate::core::{AspectRatio, CoreError, CoreResult, SceneId};

/// Price of one generated image in USD
pub const IMAGE_COST_USD: f64 = 0.02;

/// Price of one generated one-second clip in USD
pub const VIDEO_COST_USD: f64 = 0.052;

/// Image prompt styling shared by every scene in a batch
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStyle {
    /// Appended to every scene prompt
    #[serde(default)]
    pub style_suffix: String,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
}

/// Result of one batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub phase: GenerationPhase,
    /// Scenes that reached the ready state for this phase
    pub succeeded: Vec<SceneId>,
    /// Scenes that ended in error, with their messages
    pub failed: Vec<(SceneId, String)>,
    /// Requested scenes that could not be claimed (missing, in flight, not eligible)
    pub skipped: Vec<SceneId>,
}

impl BatchReport {
    fn new(phase: GenerationPhase) -> Self {
        Self {
            phase,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Outcome of one scene job, before it is folded into the report
enum SceneJob {
    Done,
    Failed(String),
    Skipped,
}

/// Spend estimate for a board
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    /// Images the next image batch would request
    pub pending_images: usize,
    /// Clips the next video batch would request
    pub pending_videos: usize,
    /// Cost of the next image and video batches
    pub pending_usd: f64,
    /// Cost of generating every scene from scratch
    pub full_usd: f64,
}

impl CostEstimate {
    pub fn for_board(board: &SceneBoard) -> Self {
        let pending_images = board.eligible_ids(GenerationPhase::Image).len();
        let pending_videos = board.eligible_ids(GenerationPhase::Video).len();
        Self {
            pending_images,
            pending_videos,
            pending_usd: pending_images as f64 * IMAGE_COST_USD
                + pending_videos as f64 * VIDEO_COST_USD,
            full_usd: board.len() as f64 * (IMAGE_COST_USD + VIDEO_COST_USD),
        }
    }
}

fn lock(board: &Mutex<SceneBoard>) -> MutexGuard<'_, SceneBoard> {
    board.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives generation batches over a scene board
pub struct SceneGenerator {
    provider: Arc<dyn GenerativeProvider>,
    pool: TaskPool,
    motion_prompt_prefix: String,
    video_resolution: String,
}

impl SceneGenerator {
    pub fn new(provider: Arc<dyn GenerativeProvider>, settings: &GenerationSettings) -> Self {
        Self {
            provider,
            pool: TaskPool::new(settings.concurrency_limit),
            motion_prompt_prefix: settings.motion_prompt_prefix.clone(),
            video_resolution: settings.video_resolution.clone(),
        }
    }

    /// Override the concurrency limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.pool = TaskPool::new(limit);
        self
    }

    /// Generates images for every eligible scene on the board.
    pub async fn generate_images(
        &self,
        board: &Mutex<SceneBoard>,
        style: &ImageStyle,
        on_progress: impl Fn(PoolProgress),
    ) -> CoreResult<BatchReport> {
        let ids = lock(board).eligible_ids(GenerationPhase::Image);
        self.run_batch(board, ids, GenerationPhase::Image, style, on_progress)
            .await
    }

    /// Generates clips for every eligible scene on the board.
    pub async fn generate_videos(
        &self,
        board: &Mutex<SceneBoard>,
        on_progress: impl Fn(PoolProgress),
    ) -> CoreResult<BatchReport> {
        let ids = lock(board).eligible_ids(GenerationPhase::Video);
        self.run_batch(
            board,
            ids,
            GenerationPhase::Video,
            &ImageStyle::default(),
            on_progress,
        )
        .await
    }

    /// Re-runs one scene in the phase it last failed in, or the phase it is waiting on.
    pub async fn retry_scene(
        &self,
        board: &Mutex<SceneBoard>,
        id: &str,
        style: &ImageStyle,
    ) -> CoreResult<BatchReport> {
        let phase = {
            let board = lock(board);
            let scene = board
                .get(id)
                .ok_or_else(|| CoreError::SceneNotFound(id.to_string()))?;
            match (scene.status, scene.failed_phase) {
                (SceneStatus::Error, Some(phase)) => phase,
                (SceneStatus::ImageReady, _) => GenerationPhase::Video,
                _ => GenerationPhase::Image,
            }
        };
        self.run_batch(board, vec![id.to_string()], phase, style, |_| {})
            .await
    }

    /// Runs one batch over explicit scene ids. Duplicate ids are admitted once.
    pub async fn run_batch(
        &self,
        board: &Mutex<SceneBoard>,
        ids: Vec<SceneId>,
        phase: GenerationPhase,
        style: &ImageStyle,
        on_progress: impl Fn(PoolProgress),
    ) -> CoreResult<BatchReport> {
        if !self.provider.is_available() {
            return Err(CoreError::ValidationError(format!(
                "Provider '{}' is not configured",
                self.provider.name()
            )));
        }
        let capability = match phase {
            GenerationPhase::Image => ProviderCapability::ImageGeneration,
            GenerationPhase::Video => ProviderCapability::VideoGeneration,
        };
        if !self.provider.supports(capability) {
            return Err(CoreError::NotSupported(format!(
                "Provider '{}' does not support {}",
                self.provider.name(),
                capability
            )));
        }

        let mut seen = HashSet::new();
        let ids: Vec<SceneId> = ids.into_iter().filter(|id| seen.insert(id.clone())).collect();

        info!(
            "Starting {} batch: {} scene(s), limit {}",
            phase,
            ids.len(),
            self.pool.limit()
        );

        let outcomes = self
            .pool
            .run(
                ids.clone(),
                |id| self.generate_one(board, id, phase, style),
                on_progress,
            )
            .await;

        let mut report = BatchReport::new(phase);
        let mut by_index: Vec<_> = outcomes.into_iter().collect();
        by_index.sort_by_key(|o| o.index);
        for outcome in by_index {
            let id = ids[outcome.index].clone();
            match outcome.result {
                Ok(SceneJob::Done) => report.succeeded.push(id),
                Ok(SceneJob::Failed(message)) => report.failed.push((id, message)),
                Ok(SceneJob::Skipped) => report.skipped.push(id),
                Err(e) => report.failed.push((id, e.to_string())),
            }
        }

        info!(
            "{} batch finished: {} succeeded, {} failed, {} skipped",
            phase,
            report.succeeded.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn generate_one(
        &self,
        board: &Mutex<SceneBoard>,
        id: SceneId,
        phase: GenerationPhase,
        style: &ImageStyle,
    ) -> CoreResult<SceneJob> {
        // Claim under the lock; the scene leaves the eligible set immediately.
        let claimed = lock(board).update(&id, |scene| {
            scene.begin(phase)?;
            Ok((scene.prompt.clone(), scene.image_url.clone()))
        });
        let (prompt, image_url) = match claimed {
            Ok(claim) => claim,
            Err(e) => {
                warn!("Skipping scene {}: {}", id, e);
                return Ok(SceneJob::Skipped);
            }
        };

        let generated = match phase {
            GenerationPhase::Image => {
                let params =
                    ImageGenerationParams::for_scene(&prompt, &style.style_suffix, style.aspect_ratio);
                self.provider
                    .generate_image(&params)
                    .await
                    .map(|r| r.image_url)
            }
            GenerationPhase::Video => match image_url {
                Some(image_url) => {
                    let params =
                        VideoGenerationParams::for_scene(&image_url, &self.motion_prompt_prefix, &prompt)
                            .with_resolution(self.video_resolution.clone());
                    self.provider
                        .generate_video(&params)
                        .await
                        .map(|r| r.video_url)
                }
                None => Err(CoreError::ValidationError(format!(
                    "Scene {} has no image to animate",
                    id
                ))),
            },
        };

        let mut board = lock(board);
        match generated {
            Ok(url) => {
                board.update(&id, |scene| scene.complete(phase, url))?;
                info!("Scene {} {} ready", id, phase);
                Ok(SceneJob::Done)
            }
            Err(e) => {
                let message = e.to_string();
                board.update(&id, |scene| scene.fail(phase, message.clone()))?;
                warn!("Scene {} {} generation failed: {}", id, phase, message);
                Ok(SceneJob::Failed(message))
            }
        }
    }
}
