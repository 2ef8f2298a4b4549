//! Audio Analysis Contract
//!
//! Decoding and beat detection happen outside this crate. This module holds the
//! shape of their result and turns it into a validated tempo.

use serde::{Deserialize, Serialize};

use crate::core::{
    timing::{BeatsPerScene, TempoDescriptor},
    CoreError, CoreResult, TimeSec,
};

/// Result of analyzing the source audio.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioAnalysis {
    /// Detected tempo, rounded to a whole number of beats per minute
    pub bpm: u32,
    /// Time of the first detected beat
    #[serde(default)]
    pub beat_offset_seconds: TimeSec,
    /// Length of the decoded audio
    pub duration_seconds: TimeSec,
}

impl AudioAnalysis {
    pub fn new(bpm: u32, beat_offset_seconds: TimeSec, duration_seconds: TimeSec) -> Self {
        Self {
            bpm,
            beat_offset_seconds,
            duration_seconds,
        }
    }

    /// Rejects results no export could use.
    pub fn validate(&self) -> CoreResult<()> {
        if self.bpm == 0 {
            return Err(CoreError::InvalidTempo(0.0));
        }
        if !self.beat_offset_seconds.is_finite() || self.beat_offset_seconds < 0.0 {
            return Err(CoreError::InvalidBeatOffset(self.beat_offset_seconds));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds <= 0.0 {
            return Err(CoreError::ValidationError(format!(
                "Audio duration must be positive (got {})",
                self.duration_seconds
            )));
        }
        Ok(())
    }

    /// Builds the tempo descriptor used by the export pipeline.
    pub fn tempo(&self, beats_per_scene: BeatsPerScene) -> CoreResult<TempoDescriptor> {
        self.validate()?;
        TempoDescriptor::new(
            f64::from(self.bpm),
            self.beat_offset_seconds,
            beats_per_scene,
        )
    }
}

/// Source audio attached to an export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSource {
    /// Local path or URL of the raw audio asset
    pub reference: String,
    /// Analysis of that asset, when available
    #[serde(default)]
    pub analysis: Option<AudioAnalysis>,
}

impl AudioSource {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            analysis: None,
        }
    }

    pub fn with_analysis(mut self, analysis: AudioAnalysis) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// File extension to use when staging the asset, defaulting to mp3.
    pub fn extension(&self) -> String {
        let path = self
            .reference
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        std::path::Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty() && e.len() <= 5 && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "mp3".to_string())
    }
}
