//! beatreel Error Definitions
//!
//! Defines error types used throughout the project.

use thiserror::Error;

use super::{
    ffmpeg::FFmpegError, relay::RelayError, render::ExportStage, scenes::SceneStatus, SceneId,
};

/// Core engine error types
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Input Validation Errors
    // =========================================================================
    #[error("Invalid tempo: bpm must be greater than zero (got {0})")]
    InvalidTempo(f64),

    #[error("Invalid beat offset: {0} seconds")]
    InvalidBeatOffset(f64),

    #[error("Invalid beats per scene: {0} (expected 1 or 2)")]
    InvalidBeatsPerScene(u8),

    #[error("No tempo detected: analyze the audio before exporting")]
    MissingTempo,

    #[error("No video-ready scenes to export")]
    NoReadyScenes,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    // =========================================================================
    // Scene Errors
    // =========================================================================
    #[error("Scene not found: {0}")]
    SceneNotFound(SceneId),

    #[error("Scene {scene_id} cannot move from {from} to {to}")]
    InvalidSceneTransition {
        scene_id: SceneId,
        from: SceneStatus,
        to: SceneStatus,
    },

    // =========================================================================
    // Generation Errors
    // =========================================================================
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    // =========================================================================
    // Pipeline Errors
    // =========================================================================
    #[error("{stage} failed: {message}")]
    StageFailed { stage: ExportStage, message: String },

    #[error("Transcoding engine error: {0}")]
    Engine(#[from] FFmpegError),

    // =========================================================================
    // Relay Errors
    // =========================================================================
    #[error("Fetch relay error: {0}")]
    Relay(#[from] RelayError),

    // =========================================================================
    // General Errors
    // =========================================================================
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Core engine result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse failure classes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any engine call; no side effects.
    InputValidation,
    /// Isolated to one scene; the batch continues.
    Generation,
    /// Fatal to the whole export job.
    Pipeline,
    /// Network fetch failure (timeout is distinguished inside `RelayError`).
    Relay,
    /// Local IO, serialization and invariant violations.
    Internal,
}

impl CoreError {
    /// Classifies the error into the caller-visible taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::InvalidTempo(_)
            | CoreError::InvalidBeatOffset(_)
            | CoreError::InvalidBeatsPerScene(_)
            | CoreError::MissingTempo
            | CoreError::NoReadyScenes
            | CoreError::ValidationError(_)
            | CoreError::SessionNotFound(_) => ErrorClass::InputValidation,
            CoreError::SceneNotFound(_)
            | CoreError::InvalidSceneTransition { .. }
            | CoreError::GenerationFailed(_)
            | CoreError::NotSupported(_) => ErrorClass::Generation,
            CoreError::StageFailed { .. } | CoreError::Engine(_) => ErrorClass::Pipeline,
            CoreError::Relay(_) => ErrorClass::Relay,
            CoreError::IoError(_) | CoreError::JsonError(_) | CoreError::Internal(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// Wraps any error as a failure of the given pipeline stage.
    pub fn stage(stage: ExportStage, err: impl std::fmt::Display) -> Self {
        CoreError::StageFailed {
            stage,
            message: err.to_string(),
        }
    }
}
