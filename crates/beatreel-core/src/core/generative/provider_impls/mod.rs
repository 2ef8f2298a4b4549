//! Concrete generative provider implementations.

pub mod fal;

pub use fal::FalProvider;
