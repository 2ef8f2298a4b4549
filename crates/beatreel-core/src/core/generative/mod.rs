//! Generative AI Integration
//!
//! Remote image and image-to-video generation used to fill scene media slots.

pub mod image;
pub mod provider_impls;
pub mod providers;
pub mod video;

// Re-export main types
pub use image::{ImageGenerationParams, ImageGenerationResult};
pub use provider_impls::FalProvider;
pub use providers::{GenerativeProvider, MockGenerativeProvider, ProviderCapability};
pub use video::{VideoGenerationParams, VideoGenerationResult};
