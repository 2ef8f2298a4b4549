//! Render Pipeline Module
//!
//! Assembles video-ready scenes into one beat-locked artifact.
//!
//! # Modules
//!
//! - `args`: argument vectors and the concat manifest for each engine stage
//! - `workspace`: per-job scratch directory
//! - `assembly`: the export job itself

mod args;
mod assembly;
mod workspace;

pub use args::*;
pub use assembly::*;
pub use workspace::ExportWorkspace;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult, ExportJobId};

/// Engine-backed stage of an export job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportStage {
    Retiming,
    Concatenating,
    DriftCorrecting,
    Muxing,
    Publishing,
}

impl std::fmt::Display for ExportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ExportStage::Retiming => "Clip retiming",
            ExportStage::Concatenating => "Concatenation",
            ExportStage::DriftCorrecting => "Drift correction",
            ExportStage::Muxing => "Audio mux",
            ExportStage::Publishing => "Publishing",
        };
        f.write_str(label)
    }
}

/// Export job state
///
/// `Idle -> Retiming(1..=N) -> Concatenating -> DriftCorrecting -> Muxing -> Complete`,
/// with `Error` reachable from any non-terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExportState {
    Idle,
    Retiming { index: usize, total: usize },
    Concatenating,
    DriftCorrecting,
    Muxing,
    Complete,
    Error { stage: ExportStage, message: String },
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExportState::Complete | ExportState::Error { .. })
    }

    /// Human-readable label for progress lines
    pub fn step_label(&self) -> String {
        match self {
            ExportState::Idle => "Preparing export...".to_string(),
            ExportState::Retiming { index, total } => {
                format!("Adjusting video speeds ({}/{})...", index, total)
            }
            ExportState::Concatenating => "Combining videos...".to_string(),
            ExportState::DriftCorrecting => "Adjusting timing...".to_string(),
            ExportState::Muxing => "Adding audio...".to_string(),
            ExportState::Complete => "Complete!".to_string(),
            ExportState::Error { stage, .. } => format!("{} failed", stage),
        }
    }

    fn can_advance_to(&self, next: &ExportState) -> bool {
        use ExportState::*;
        match (self, next) {
            (from, Error { .. }) => !from.is_terminal(),
            (Idle, Retiming { index: 1, .. }) => true,
            (Retiming { index, total }, Retiming { index: n, total: t }) => {
                t == total && *n == index + 1 && *n <= *total
            }
            (Retiming { index, total }, Concatenating) => index == total,
            (Concatenating, DriftCorrecting) => true,
            (DriftCorrecting, Muxing) => true,
            (Muxing, Complete) => true,
            _ => false,
        }
    }
}

/// Export progress update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportProgress {
    pub job_id: ExportJobId,
    /// Current status message
    pub step_label: String,
    /// Progress percentage (0-100)
    pub percent: f32,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub state: ExportState,
}

/// Tracks the state machine and step count of one export job.
#[derive(Debug)]
pub struct ExportTracker {
    job_id: ExportJobId,
    state: ExportState,
    completed_steps: usize,
    total_steps: usize,
}

impl ExportTracker {
    /// A job over `clip_count` clips has `clip_count + 3` steps.
    pub fn new(job_id: impl Into<ExportJobId>, clip_count: usize) -> Self {
        Self {
            job_id: job_id.into(),
            state: ExportState::Idle,
            completed_steps: 0,
            total_steps: clip_count + 3,
        }
    }

    pub fn state(&self) -> &ExportState {
        &self.state
    }

    pub fn advance(&mut self, next: ExportState) -> CoreResult<()> {
        if !self.state.can_advance_to(&next) {
            return Err(CoreError::Internal(format!(
                "Invalid export transition: {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Marks the current step as finished
    pub fn complete_step(&mut self) {
        self.completed_steps = (self.completed_steps + 1).min(self.total_steps);
    }

    pub fn fail(&mut self, stage: ExportStage, message: impl Into<String>) {
        if !self.state.is_terminal() {
            self.state = ExportState::Error {
                stage,
                message: message.into(),
            };
        }
    }

    pub fn percent(&self) -> f32 {
        if self.total_steps == 0 {
            return 0.0;
        }
        self.completed_steps as f32 / self.total_steps as f32 * 100.0
    }

    pub fn snapshot(&self) -> ExportProgress {
        ExportProgress {
            job_id: self.job_id.clone(),
            step_label: self.state.step_label(),
            percent: self.percent(),
            completed_steps: self.completed_steps,
            total_steps: self.total_steps,
            state: self.state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_labels() {
        assert_eq!(ExportStage::DriftCorrecting.to_string(), "Drift correction");
        assert_eq!(ExportStage::Muxing.to_string(), "Audio mux");
    }

    #[test]
    fn test_full_walk_reaches_hundred_percent() {
        let mut tracker = ExportTracker::new("job", 2);
        assert_eq!(tracker.snapshot().total_steps, 5);

        tracker.advance(ExportState::Retiming { index: 1, total: 2 }).unwrap();
        tracker.complete_step();
        tracker.advance(ExportState::Retiming { index: 2, total: 2 }).unwrap();
        tracker.complete_step();
        assert_eq!(tracker.percent(), 40.0);

        tracker.advance(ExportState::Concatenating).unwrap();
        tracker.complete_step();
        tracker.advance(ExportState::DriftCorrecting).unwrap();
        tracker.complete_step();
        tracker.advance(ExportState::Muxing).unwrap();
        tracker.complete_step();
        tracker.advance(ExportState::Complete).unwrap();

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.percent, 100.0);
        assert_eq!(snapshot.step_label, "Complete!");
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut tracker = ExportTracker::new("job", 3);
        assert!(tracker.advance(ExportState::Concatenating).is_err());

        tracker.advance(ExportState::Retiming { index: 1, total: 3 }).unwrap();
        // Cannot skip clips or leave retiming early
        assert!(tracker
            .advance(ExportState::Retiming { index: 3, total: 3 })
            .is_err());
        assert!(tracker.advance(ExportState::Concatenating).is_err());
    }

    #[test]
    fn test_error_is_terminal() {
        let mut tracker = ExportTracker::new("job", 1);
        tracker.advance(ExportState::Retiming { index: 1, total: 1 }).unwrap();
        tracker.fail(ExportStage::Retiming, "exit status 1");

        assert!(tracker.state().is_terminal());
        assert_eq!(tracker.snapshot().step_label, "Clip retiming failed");
        assert!(tracker.advance(ExportState::Concatenating).is_err());

        // A second failure does not overwrite the first
        tracker.fail(ExportStage::Muxing, "later");
        assert!(matches!(
            tracker.state(),
            ExportState::Error {
                stage: ExportStage::Retiming,
                ..
            }
        ));
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let tracker = ExportTracker::new("job-1", 4);
        let json = serde_json::to_value(tracker.snapshot()).unwrap();
        assert_eq!(json["jobId"], "job-1");
        assert_eq!(json["totalSteps"], 7);
        assert_eq!(json["state"]["type"], "idle");
    }
}
