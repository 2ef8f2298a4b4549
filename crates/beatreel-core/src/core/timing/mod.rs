//! Beat Timing Module
//!
//! Pure arithmetic mapping a detected tempo to per-scene and total durations,
//! and to the playback-rate multiplier applied to each generated clip.

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, TimeSec};

/// Duration of every clip returned by the video generation collaborator.
pub const SOURCE_CLIP_DURATION_SEC: TimeSec = 1.0;

/// How many beats each scene spans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BeatsPerScene {
    #[default]
    One,
    Two,
}

impl BeatsPerScene {
    pub fn count(self) -> u8 {
        match self {
            BeatsPerScene::One => 1,
            BeatsPerScene::Two => 2,
        }
    }
}

impl TryFrom<u8> for BeatsPerScene {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(BeatsPerScene::One),
            2 => Ok(BeatsPerScene::Two),
            other => Err(CoreError::InvalidBeatsPerScene(other)),
        }
    }
}

impl From<BeatsPerScene> for u8 {
    fn from(value: BeatsPerScene) -> Self {
        value.count()
    }
}

/// Tempo information driving the cut grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempoDescriptor {
    /// Beats per minute (> 0)
    pub bpm: f64,
    /// Seconds from audio start to the first detected beat (>= 0)
    pub beat_offset: TimeSec,
    /// Beats each scene spans
    pub beats_per_scene: BeatsPerScene,
}

impl TempoDescriptor {
    /// Creates a validated descriptor.
    pub fn new(bpm: f64, beat_offset: TimeSec, beats_per_scene: BeatsPerScene) -> CoreResult<Self> {
        let tempo = Self {
            bpm,
            beat_offset,
            beats_per_scene,
        };
        tempo.validate()?;
        Ok(tempo)
    }

    /// Checks the bpm and offset ranges.
    pub fn validate(&self) -> CoreResult<()> {
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(CoreError::InvalidTempo(self.bpm));
        }
        if !self.beat_offset.is_finite() || self.beat_offset < 0.0 {
            return Err(CoreError::InvalidBeatOffset(self.beat_offset));
        }
        Ok(())
    }

    /// Seconds each scene occupies on the final cut.
    pub fn scene_duration(&self) -> CoreResult<TimeSec> {
        scene_duration(self.bpm, self.beats_per_scene)
    }

    /// Seconds the final cut runs for `scene_count` scenes.
    pub fn total_duration(&self, scene_count: usize) -> CoreResult<TimeSec> {
        Ok(total_duration(self.scene_duration()?, scene_count))
    }
}

/// `60 / bpm * beats_per_scene`
pub fn scene_duration(bpm: f64, beats_per_scene: BeatsPerScene) -> CoreResult<TimeSec> {
    Ok(beat_duration(bpm)? * f64::from(beats_per_scene.count()))
}

/// `scene_duration * count`
pub fn total_duration(scene_duration: TimeSec, count: usize) -> TimeSec {
    scene_duration * count as f64
}

/// Multiplier applied to a clip's timestamps.
///
/// Values above 1 stretch (slow down) the clip, values below 1 compress it.
pub fn playback_rate(source_duration: TimeSec, target_duration: TimeSec) -> CoreResult<f64> {
    if !source_duration.is_finite() || source_duration <= 0.0 {
        return Err(CoreError::ValidationError(format!(
            "Source clip duration must be positive (got {})",
            source_duration
        )));
    }
    Ok(target_duration / source_duration)
}

/// Seconds per beat.
pub fn beat_duration(bpm: f64) -> CoreResult<TimeSec> {
    if !bpm.is_finite() || bpm <= 0.0 {
        return Err(CoreError::InvalidTempo(bpm));
    }
    Ok(60.0 / bpm)
}

/// Whole beats contained in `duration`.
pub fn beats_in(duration: TimeSec, bpm: f64) -> CoreResult<u64> {
    let beat = beat_duration(bpm)?;
    Ok((duration.max(0.0) / beat).floor() as u64)
}

/// How many scenes fit in the audio after the first beat.
pub fn scenes_fitting(audio_duration: TimeSec, tempo: &TempoDescriptor) -> CoreResult<u64> {
    let scene = tempo.scene_duration()?;
    let usable = (audio_duration - tempo.beat_offset).max(0.0);
    Ok((usable / scene).floor() as u64)
}

/// Duration of the muxed artifact: video length is authoritative, audio after the
/// offset may cut it short.
pub fn muxed_duration(video_duration: TimeSec, audio_duration: TimeSec, beat_offset: TimeSec) -> TimeSec {
    video_duration.min((audio_duration - beat_offset).max(0.0))
}
