//! beatreel Core Type Definitions
//!
//! Fundamental types shared across modules.

use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Scene unique identifier (ULID)
pub type SceneId = String;

/// Export job unique identifier (ULID)
pub type ExportJobId = String;

// =============================================================================
// Time Types
// =============================================================================

/// Time in seconds (floating point)
pub type TimeSec = f64;

// =============================================================================
// Aspect Ratio
// =============================================================================

/// Output aspect ratio requested from image generation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    /// Wire representation used by generation APIs
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "9:16",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "16:9" => Ok(AspectRatio::Landscape),
            "1:1" => Ok(AspectRatio::Square),
            "9:16" => Ok(AspectRatio::Portrait),
            other => Err(format!(
                "Unsupported aspect ratio '{}'. Expected 16:9, 1:1 or 9:16",
                other
            )),
        }
    }
}
