//! Scene Model
//!
//! A scene is one narrative unit backed by a generated image and then a generated
//! short video clip. Scenes are only ever mutated through the transitions below,
//! and always looked up by id so concurrent completions cannot touch the wrong one.

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, SceneId};

// =============================================================================
// Status
// =============================================================================

/// Which remote generation a scene is going through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GenerationPhase {
    Image,
    Video,
}

impl std::fmt::Display for GenerationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationPhase::Image => write!(f, "image"),
            GenerationPhase::Video => write!(f, "video"),
        }
    }
}

/// Scene lifecycle status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SceneStatus {
    #[default]
    Pending,
    GeneratingImage,
    ImageReady,
    GeneratingVideo,
    VideoReady,
    Error,
}

impl SceneStatus {
    /// Status a scene holds while the given phase is in flight.
    pub fn generating(phase: GenerationPhase) -> Self {
        match phase {
            GenerationPhase::Image => SceneStatus::GeneratingImage,
            GenerationPhase::Video => SceneStatus::GeneratingVideo,
        }
    }

    /// Status a scene reaches when the given phase succeeds.
    pub fn ready(phase: GenerationPhase) -> Self {
        match phase {
            GenerationPhase::Image => SceneStatus::ImageReady,
            GenerationPhase::Video => SceneStatus::VideoReady,
        }
    }

    pub fn is_generating(&self) -> bool {
        matches!(
            self,
            SceneStatus::GeneratingImage | SceneStatus::GeneratingVideo
        )
    }
}

impl std::fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SceneStatus::Pending => "pending",
            SceneStatus::GeneratingImage => "generating-image",
            SceneStatus::ImageReady => "image-ready",
            SceneStatus::GeneratingVideo => "generating-video",
            SceneStatus::VideoReady => "video-ready",
            SceneStatus::Error => "error",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Scene
// =============================================================================

/// One narrative unit of the final cut
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// Unique scene ID
    pub id: SceneId,
    /// Text prompt describing the scene
    pub prompt: String,
    /// Generated image reference (present from image-ready onwards)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Generated clip reference (present only when video-ready)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Current status
    #[serde(default)]
    pub status: SceneStatus,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Phase that produced the last failure; a retry re-enters this phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<GenerationPhase>,
}

impl Scene {
    /// Creates a pending scene with a fresh id
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            prompt: prompt.into(),
            image_url: None,
            video_url: None,
            status: SceneStatus::Pending,
            error: None,
            failed_phase: None,
        }
    }

    pub fn is_video_ready(&self) -> bool {
        self.status == SceneStatus::VideoReady && self.video_url.is_some()
    }

    /// Whether a batch for `phase` should pick this scene up.
    pub fn is_eligible_for(&self, phase: GenerationPhase) -> bool {
        match (phase, self.status) {
            (GenerationPhase::Image, SceneStatus::Pending) => true,
            (GenerationPhase::Video, SceneStatus::ImageReady) => self.image_url.is_some(),
            (GenerationPhase::Image, SceneStatus::Error) => {
                self.failed_phase != Some(GenerationPhase::Video)
            }
            (GenerationPhase::Video, SceneStatus::Error) => {
                self.failed_phase == Some(GenerationPhase::Video) && self.image_url.is_some()
            }
            _ => false,
        }
    }

    fn transition_error(&self, to: SceneStatus) -> CoreError {
        CoreError::InvalidSceneTransition {
            scene_id: self.id.clone(),
            from: self.status,
            to,
        }
    }

    /// Claims the scene for a generation phase.
    ///
    /// Fails if the scene is already in flight or not eligible, so a scene can never
    /// be generating twice at once.
    pub fn begin(&mut self, phase: GenerationPhase) -> CoreResult<()> {
        let to = SceneStatus::generating(phase);
        if !self.is_eligible_for(phase) {
            return Err(self.transition_error(to));
        }
        if phase == GenerationPhase::Image {
            self.image_url = None;
        }
        self.video_url = None;
        self.error = None;
        self.failed_phase = None;
        self.status = to;
        Ok(())
    }

    /// Records a successful generation.
    pub fn complete(&mut self, phase: GenerationPhase, url: impl Into<String>) -> CoreResult<()> {
        let to = SceneStatus::ready(phase);
        if self.status != SceneStatus::generating(phase) {
            return Err(self.transition_error(to));
        }
        match phase {
            GenerationPhase::Image => self.image_url = Some(url.into()),
            GenerationPhase::Video => self.video_url = Some(url.into()),
        }
        self.status = to;
        Ok(())
    }

    /// Records a failed generation on this scene only.
    pub fn fail(&mut self, phase: GenerationPhase, message: impl Into<String>) -> CoreResult<()> {
        if self.status != SceneStatus::generating(phase) {
            return Err(self.transition_error(SceneStatus::Error));
        }
        self.video_url = None;
        self.status = SceneStatus::Error;
        self.error = Some(message.into());
        self.failed_phase = Some(phase);
        Ok(())
    }

    /// Sends a finished or failed scene back to pending for a fresh image.
    pub fn regenerate(&mut self) -> CoreResult<()> {
        if self.status.is_generating() {
            return Err(self.transition_error(SceneStatus::Pending));
        }
        self.image_url = None;
        self.video_url = None;
        self.error = None;
        self.failed_phase = None;
        self.status = SceneStatus::Pending;
        Ok(())
    }

    /// Checks the reference invariants for the current status.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.video_url.is_some() && self.status != SceneStatus::VideoReady {
            return Err(format!(
                "scene {} has a video reference while {}",
                self.id, self.status
            ));
        }
        let needs_image = matches!(
            self.status,
            SceneStatus::ImageReady | SceneStatus::GeneratingVideo | SceneStatus::VideoReady
        ) || (self.status == SceneStatus::Error
            && self.failed_phase == Some(GenerationPhase::Video));
        if needs_image && self.image_url.is_none() {
            return Err(format!(
                "scene {} is {} without an image reference",
                self.id, self.status
            ));
        }
        if self.status == SceneStatus::VideoReady && self.video_url.is_none() {
            return Err(format!("scene {} is video-ready without a clip", self.id));
        }
        Ok(())
    }
}

// =============================================================================
// Scene Board
// =============================================================================

/// Per-status scene counts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneCounts {
    pub pending: usize,
    pub generating: usize,
    pub image_ready: usize,
    pub video_ready: usize,
    pub error: usize,
}

/// Ordered scenes of one session. Order is the final cut order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneBoard {
    scenes: Vec<Scene>,
}

impl SceneBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_scenes(scenes: Vec<Scene>) -> Self {
        Self { scenes }
    }

    /// Appends a pending scene and returns its id
    pub fn add(&mut self, prompt: impl Into<String>) -> SceneId {
        let scene = Scene::new(prompt);
        let id = scene.id.clone();
        self.scenes.push(scene);
        id
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == id)
    }

    /// Applies `f` to the scene with the given id.
    pub fn update<T>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut Scene) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let scene = self
            .scenes
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| CoreError::SceneNotFound(id.to_string()))?;
        f(scene)
    }

    /// Removes a scene. In-flight scenes cannot be removed.
    pub fn remove(&mut self, id: &str) -> CoreResult<Scene> {
        let index = self
            .scenes
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| CoreError::SceneNotFound(id.to_string()))?;
        if self.scenes[index].status.is_generating() {
            return Err(CoreError::ValidationError(format!(
                "Scene {} is generating and cannot be removed",
                id
            )));
        }
        Ok(self.scenes.remove(index))
    }

    /// Moves the scene at `from` so it ends up at index `to`.
    pub fn move_scene(&mut self, from: usize, to: usize) -> CoreResult<()> {
        let len = self.scenes.len();
        if from >= len || to >= len {
            return Err(CoreError::ValidationError(format!(
                "Scene index out of range: {} -> {} (len {})",
                from, to, len
            )));
        }
        let scene = self.scenes.remove(from);
        self.scenes.insert(to, scene);
        Ok(())
    }

    /// Ids eligible for a generation batch, in board order, without duplicates.
    pub fn eligible_ids(&self, phase: GenerationPhase) -> Vec<SceneId> {
        self.scenes
            .iter()
            .filter(|s| s.is_eligible_for(phase))
            .map(|s| s.id.clone())
            .collect()
    }

    /// Video-ready scenes in cut order.
    pub fn video_ready_in_order(&self) -> Vec<Scene> {
        self.scenes
            .iter()
            .filter(|s| s.is_video_ready())
            .cloned()
            .collect()
    }

    pub fn counts(&self) -> SceneCounts {
        let mut counts = SceneCounts::default();
        for scene in &self.scenes {
            match scene.status {
                SceneStatus::Pending => counts.pending += 1,
                SceneStatus::GeneratingImage | SceneStatus::GeneratingVideo => {
                    counts.generating += 1
                }
                SceneStatus::ImageReady => counts.image_ready += 1,
                SceneStatus::VideoReady => counts.video_ready += 1,
                SceneStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    /// Scenes left mid-flight by an interrupted process go back to where a retry can
    /// pick them up.
    pub fn recover_interrupted(&mut self) -> usize {
        let mut recovered = 0;
        for scene in &mut self.scenes {
            if scene.status.is_generating() {
                let phase = if scene.status == SceneStatus::GeneratingImage {
                    GenerationPhase::Image
                } else {
                    GenerationPhase::Video
                };
                let _ = scene.fail(phase, "Interrupted before completion");
                recovered += 1;
            }
        }
        recovered
    }

    pub fn check_invariants(&self) -> Result<(), String> {
        self.scenes.iter().try_for_each(Scene::check_invariants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_ready(board: &mut SceneBoard, prompt: &str) -> SceneId {
        let id = board.add(prompt);
        board
            .update(&id, |s| {
                s.begin(GenerationPhase::Image)?;
                s.complete(GenerationPhase::Image, format!("https://img/{prompt}"))
            })
            .unwrap();
        id
    }

    #[test]
    fn test_new_scene_is_pending() {
        let scene = Scene::new("a neon city");
        assert_eq!(scene.status, SceneStatus::Pending);
        assert!(!scene.id.is_empty());
        assert!(scene.check_invariants().is_ok());
    }

    #[test]
    fn test_full_happy_path() {
        let mut scene = Scene::new("dawn");
        scene.begin(GenerationPhase::Image).unwrap();
        assert_eq!(scene.status, SceneStatus::GeneratingImage);
        scene.complete(GenerationPhase::Image, "img").unwrap();
        assert_eq!(scene.status, SceneStatus::ImageReady);
        scene.begin(GenerationPhase::Video).unwrap();
        assert_eq!(scene.status, SceneStatus::GeneratingVideo);
        assert!(scene.check_invariants().is_ok());
        scene.complete(GenerationPhase::Video, "vid").unwrap();
        assert!(scene.is_video_ready());
        assert!(scene.check_invariants().is_ok());
    }

    #[test]
    fn test_cannot_claim_twice() {
        let mut scene = Scene::new("x");
        scene.begin(GenerationPhase::Image).unwrap();
        let err = scene.begin(GenerationPhase::Image).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSceneTransition { .. }));
    }

    #[test]
    fn test_video_requires_image() {
        let mut scene = Scene::new("x");
        assert!(scene.begin(GenerationPhase::Video).is_err());
    }

    #[test]
    fn test_video_failure_retries_video_phase_and_keeps_image() {
        let mut board = SceneBoard::new();
        let id = image_ready(&mut board, "forest");
        board
            .update(&id, |s| {
                s.begin(GenerationPhase::Video)?;
                s.fail(GenerationPhase::Video, "rate limited")
            })
            .unwrap();

        let scene = board.get(&id).unwrap();
        assert_eq!(scene.status, SceneStatus::Error);
        assert_eq!(scene.error.as_deref(), Some("rate limited"));
        assert!(scene.image_url.is_some());
        assert!(scene.check_invariants().is_ok());

        assert!(board.eligible_ids(GenerationPhase::Image).is_empty());
        assert_eq!(board.eligible_ids(GenerationPhase::Video), vec![id.clone()]);

        board
            .update(&id, |s| s.begin(GenerationPhase::Video))
            .unwrap();
        assert!(board.get(&id).unwrap().error.is_none());
    }

    #[test]
    fn test_image_failure_retries_image_phase() {
        let mut board = SceneBoard::new();
        let id = board.add("ocean");
        board
            .update(&id, |s| {
                s.begin(GenerationPhase::Image)?;
                s.fail(GenerationPhase::Image, "No image generated")
            })
            .unwrap();
        assert_eq!(board.eligible_ids(GenerationPhase::Image), vec![id]);
        assert!(board.eligible_ids(GenerationPhase::Video).is_empty());
    }

    #[test]
    fn test_complete_rejects_wrong_phase() {
        let mut scene = Scene::new("x");
        scene.begin(GenerationPhase::Image).unwrap();
        assert!(scene.complete(GenerationPhase::Video, "vid").is_err());
        assert!(scene.video_url.is_none());
    }

    #[test]
    fn test_regenerate_clears_references() {
        let mut board = SceneBoard::new();
        let id = image_ready(&mut board, "desert");
        board.update(&id, |s| s.regenerate()).unwrap();
        let scene = board.get(&id).unwrap();
        assert_eq!(scene.status, SceneStatus::Pending);
        assert!(scene.image_url.is_none());
    }

    #[test]
    fn test_board_move_and_remove() {
        let mut board = SceneBoard::new();
        let a = board.add("a");
        let b = board.add("b");
        let c = board.add("c");

        board.move_scene(0, 2).unwrap();
        let order: Vec<_> = board.scenes().iter().map(|s| s.id.clone()).collect();
        assert_eq!(order, vec![b.clone(), c.clone(), a.clone()]);

        board.remove(&c).unwrap();
        assert_eq!(board.len(), 2);
        assert!(board.move_scene(0, 5).is_err());
        assert!(matches!(
            board.remove("missing"),
            Err(CoreError::SceneNotFound(_))
        ));
    }

    #[test]
    fn test_cannot_remove_in_flight_scene() {
        let mut board = SceneBoard::new();
        let id = board.add("a");
        board
            .update(&id, |s| s.begin(GenerationPhase::Image))
            .unwrap();
        assert!(board.remove(&id).is_err());
    }

    #[test]
    fn test_counts_and_video_ready_order() {
        let mut board = SceneBoard::new();
        board.add("pending");
        let first = image_ready(&mut board, "first");
        let second = image_ready(&mut board, "second");
        for id in [&second, &first] {
            board
                .update(id, |s| {
                    s.begin(GenerationPhase::Video)?;
                    s.complete(GenerationPhase::Video, format!("https://vid/{id}"))
                })
                .unwrap();
        }

        let counts = board.counts();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.video_ready, 2);

        let ready: Vec<_> = board
            .video_ready_in_order()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ready, vec![first, second]);
    }

    #[test]
    fn test_recover_interrupted() {
        let mut board = SceneBoard::new();
        let id = board.add("a");
        board
            .update(&id, |s| s.begin(GenerationPhase::Image))
            .unwrap();
        assert_eq!(board.recover_interrupted(), 1);
        assert_eq!(board.get(&id).unwrap().status, SceneStatus::Error);
        assert_eq!(board.eligible_ids(GenerationPhase::Image), vec![id]);
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&SceneStatus::GeneratingVideo).unwrap(),
            "\"generating-video\""
        );
        assert_eq!(SceneStatus::VideoReady.to_string(), "video-ready");
    }
}
