//! beatreel Core Engine
//!
//! Timing arithmetic, scene state, generation scheduling and the media assembly pipeline.

pub mod audio;
pub mod ffmpeg;
pub mod fs;
pub mod generative;
pub mod jobs;
pub mod process;
pub mod relay;
pub mod render;
pub mod scenes;
pub mod session;
pub mod settings;
pub mod timing;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
