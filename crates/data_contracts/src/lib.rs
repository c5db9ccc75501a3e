//! Shared data contracts for the Mask R-CNN pipeline: the model configuration
//! every stage reads its tunables from, and the per-image metadata needed to
//! map normalized boxes back to original image pixels.

pub mod config;
pub mod meta;

pub use config::{ConfigError, MaskConfig};
pub use meta::ImageMeta;
