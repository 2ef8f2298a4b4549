//! Session Persistence
//!
//! A session is everything one music video project needs between runs: the scene
//! board, tempo inputs, the source audio and the last exported artifact.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::audio::AudioSource;
use crate::core::fs::atomic_write_json_pretty;
use crate::core::jobs::{CostEstimate, ImageStyle};
use crate::core::render::{ExportArtifact, ExportRequest};
use crate::core::scenes::SceneBoard;
use crate::core::timing::{scenes_fitting, BeatsPerScene, TempoDescriptor};
use crate::core::{AspectRatio, CoreError, CoreResult, TimeSec};

const SESSION_VERSION: u32 = 1;

/// Persisted project state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub scenes: SceneBoard,
    /// Detected or user-entered tempo; none until analysis has run
    #[serde(default)]
    pub bpm: Option<f64>,
    #[serde(default)]
    pub beat_offset: TimeSec,
    #[serde(default)]
    pub beats_per_scene: BeatsPerScene,
    #[serde(default)]
    pub aspect_ratio: AspectRatio,
    #[serde(default)]
    pub audio: Option<AudioSource>,
    #[serde(default)]
    pub style_suffix: String,
    #[serde(default)]
    pub last_artifact: Option<ExportArtifact>,
}

fn default_version() -> u32 {
    SESSION_VERSION
}

impl Session {
    pub fn new() -> Self {
        Self {
            version: SESSION_VERSION,
            ..Self::default()
        }
    }

    /// Loads a session file.
    ///
    /// Scenes a crashed run left generating are moved to error so a retry can
    /// pick them up.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Err(CoreError::SessionNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)?;
        let mut session: Session = serde_json::from_str(&content)?;

        let recovered = session.scenes.recover_interrupted();
        if recovered > 0 {
            warn!(
                "Recovered {} interrupted scene(s) in {}",
                recovered,
                path.display()
            );
        }
        if let Err(e) = session.scenes.check_invariants() {
            return Err(CoreError::ValidationError(format!(
                "Corrupt session {}: {}",
                path.display(),
                e
            )));
        }

        session.version = SESSION_VERSION;
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        atomic_write_json_pretty(path, self)?;
        info!("Saved session to {}", path.display());
        Ok(())
    }

    /// Saves this session with `scenes` in place of its own board.
    ///
    /// Used while a batch holds the board, so every settled scene reaches disk.
    pub fn checkpoint(&self, scenes: &SceneBoard, path: &Path) -> CoreResult<()> {
        let snapshot = Session {
            scenes: scenes.clone(),
            ..self.clone()
        };
        atomic_write_json_pretty(path, &snapshot)
    }

    /// Tempo for export, when a bpm is known.
    pub fn tempo(&self) -> CoreResult<TempoDescriptor> {
        let bpm = self.bpm.ok_or(CoreError::MissingTempo)?;
        TempoDescriptor::new(bpm, self.beat_offset, self.beats_per_scene)
    }

    /// A bpm is known and at least one scene has a clip.
    pub fn can_export(&self) -> bool {
        self.bpm.is_some_and(|bpm| bpm > 0.0)
            && self.scenes.scenes().iter().any(|s| s.is_video_ready())
    }

    pub fn image_style(&self) -> ImageStyle {
        ImageStyle {
            style_suffix: self.style_suffix.clone(),
            aspect_ratio: self.aspect_ratio,
        }
    }

    pub fn cost_estimate(&self) -> CostEstimate {
        CostEstimate::for_board(&self.scenes)
    }

    /// Scenes the analyzed audio has room for, if analysis is present.
    pub fn scene_capacity(&self) -> Option<u64> {
        let analysis = self.audio.as_ref()?.analysis.as_ref()?;
        let tempo = self.tempo().ok()?;
        scenes_fitting(analysis.duration_seconds, &tempo).ok()
    }

    /// Builds an export request over the current video-ready scenes.
    ///
    /// The tempo is left empty when no bpm is known so the pipeline reports it.
    pub fn export_request(&self, output_path: PathBuf) -> ExportRequest {
        ExportRequest {
            scenes: self.scenes.video_ready_in_order(),
            tempo: self.tempo().ok(),
            aspect_ratio: self.aspect_ratio,
            audio: self.audio.clone(),
            output_path,
        }
    }
}
