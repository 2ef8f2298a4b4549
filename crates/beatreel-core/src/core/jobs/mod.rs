//! Job System Module
//!
//! Bounded-concurrency execution of remote generation jobs. The [`TaskPool`]
//! is generic over work items; [`SceneGenerator`] drives it over the scene
//! board for image and video batches.

mod generation;
mod pool;

pub use generation::*;
pub use pool::*;

use serde::{Deserialize, Serialize};

/// Progress of a pool run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolProgress {
    /// Items that have settled (success or failure)
    pub completed: usize,
    /// Items submitted to this run
    pub total: usize,
}

impl PoolProgress {
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f32 / self.total as f32 * 100.0
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}
